//! Lockstep slot replicas and the parallel runner.
//!
//! Every graph operation is mirrored across all N slots through
//! [`Slots::invoke`]; because each replica performs the same insertions in
//! the same order, the per-slot results (typically arena ids) agree and are
//! collapsed back into one shared value with [`Slots::unify`]. The layer is
//! purely structural — threads are only spawned by [`run_slots`].

use parking_lot::Mutex;
use tally_core::{Error, Result};

/// An ordered vector of N replicas, one per slot.
pub struct Slots<T> {
    inner: Vec<T>,
}

impl<T> Slots<T> {
    pub fn new(inner: Vec<T>) -> Self {
        debug_assert!(!inner.is_empty(), "a dataflow needs at least one slot");
        Slots { inner }
    }

    pub fn width(&self) -> usize {
        self.inner.len()
    }

    /// The slot-0 replica, used for merging and result shape.
    pub fn model(&self) -> &T {
        &self.inner[0]
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        self.inner.get(slot)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.inner.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.inner.iter_mut()
    }

    /// Call `f` on every replica in slot order, collecting the results.
    pub fn invoke<R>(&mut self, mut f: impl FnMut(usize, &mut T) -> R) -> Slots<R> {
        Slots::new(
            self.inner
                .iter_mut()
                .enumerate()
                .map(|(slot, replica)| f(slot, replica))
                .collect(),
        )
    }

    /// Fallible [`Slots::invoke`]; the first error wins.
    pub fn try_invoke<R>(
        &mut self,
        mut f: impl FnMut(usize, &mut T) -> Result<R>,
    ) -> Result<Slots<R>> {
        let mut results = Vec::with_capacity(self.inner.len());
        for (slot, replica) in self.inner.iter_mut().enumerate() {
            results.push(f(slot, replica)?);
        }
        Ok(Slots::new(results))
    }

    /// Call `f` on every replica for its side effects.
    pub fn apply(&mut self, mut f: impl FnMut(usize, &mut T)) {
        for (slot, replica) in self.inner.iter_mut().enumerate() {
            f(slot, replica);
        }
    }
}

impl<R: PartialEq + std::fmt::Debug> Slots<R> {
    /// Collapse lockstep per-slot results into the single shared value.
    pub fn unify(mut self) -> R {
        let first = self.inner.remove(0);
        debug_assert!(
            self.inner.iter().all(|result| *result == first),
            "slots out of lockstep"
        );
        first
    }
}

/// Run every slot, either sequentially in slot order or each on a dedicated
/// worker thread.
///
/// In the threaded case the first error reported by any worker is kept and
/// returned once all workers have finished; a panic in a user hook unwinds
/// out of the scope on the calling thread, also after all workers finished.
pub fn run_slots<T, F>(slots: &mut Slots<T>, parallel: bool, run: F) -> Result<()>
where
    T: Send,
    F: Fn(&mut T) -> Result<()> + Sync,
{
    if parallel && slots.width() > 1 {
        let first_error: Mutex<Option<Error>> = Mutex::new(None);
        let mut panic_payload: Option<Box<dyn std::any::Any + Send>> = None;
        std::thread::scope(|scope| {
            let handles: Vec<_> = slots
                .iter_mut()
                .map(|slot| {
                    let run = &run;
                    let first_error = &first_error;
                    scope.spawn(move || {
                        if let Err(error) = run(slot) {
                            let mut guard = first_error.lock();
                            if guard.is_none() {
                                *guard = Some(error);
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                if let Err(payload) = handle.join() {
                    if panic_payload.is_none() {
                        panic_payload = Some(payload);
                    }
                }
            }
        });
        if let Some(payload) = panic_payload {
            std::panic::resume_unwind(payload);
        }
        match first_error.into_inner() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    } else {
        for slot in slots.iter_mut() {
            run(slot)?;
        }
        Ok(())
    }
}
