//! Multithreading configuration.
//!
//! A [`Multithread`] value fixes the number of worker slots a dataflow is
//! built with. Requests are clamped to the hardware parallelism of the host;
//! a concurrency of one means the run executes sequentially on the calling
//! thread.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

static HARDWARE: Lazy<usize> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
});

/// Number of logical cores available to the process.
pub fn hardware_concurrency() -> usize {
    *HARDWARE
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Multithread {
    concurrency: usize,
}

impl Multithread {
    /// Enable up to `suggested` worker slots, clamped to the hardware.
    /// Zero or one slots fall back to a sequential run.
    pub fn enable(suggested: usize) -> Self {
        let concurrency = match suggested {
            0 | 1 => 1,
            n => n.min(hardware_concurrency()),
        };
        Multithread { concurrency }
    }

    /// Enable as many worker slots as the hardware offers.
    pub fn enable_all() -> Self {
        Multithread {
            concurrency: hardware_concurrency(),
        }
    }

    /// A single sequential slot.
    pub fn disable() -> Self {
        Multithread { concurrency: 1 }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Whether the run executes on dedicated worker threads.
    pub fn is_enabled(&self) -> bool {
        self.concurrency > 1
    }
}

impl Default for Multithread {
    fn default() -> Self {
        Multithread::disable()
    }
}
