//! Shared progress accounting for a dataset pass.

use std::sync::atomic::{AtomicU64, Ordering};

/// Row counter shared by all worker slots of one run.
#[derive(Debug)]
pub struct Progress {
    processed: AtomicU64,
    total: AtomicU64,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        Progress {
            processed: AtomicU64::new(0),
            total: AtomicU64::new(total),
        }
    }

    /// Record one processed row.
    pub fn tick(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Fraction of rows processed so far, in percent.
    pub fn percent(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        self.processed() as f64 / total as f64 * 100.0
    }

    pub fn is_done(&self) -> bool {
        self.processed() >= self.total()
    }

    /// Rearm the counter for another pass.
    pub fn reset(&self, total: u64) {
        self.processed.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }
}
