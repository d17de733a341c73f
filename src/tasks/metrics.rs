// src/tasks/metrics.rs

//! GC pass metrics

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

pub struct TaskMetrics {
    passes: AtomicUsize,
    purged: AtomicU64,
    errors: AtomicUsize,
    last_duration: RwLock<Option<Duration>>,
    last_error: RwLock<Option<String>>,
}

impl TaskMetrics {
    pub fn new() -> Self {
        Self {
            passes: AtomicUsize::new(0),
            purged: AtomicU64::new(0),
            errors: AtomicUsize::new(0),
            last_duration: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    pub fn record_pass(&self, purged: u64, duration: Duration) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.purged.fetch_add(purged, Ordering::Relaxed);
        *self.last_duration.write() = Some(duration);
    }

    pub fn record_error(&self, error: impl ToString) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write() = Some(error.to_string());
    }

    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn purged(&self) -> u64 {
        self.purged.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn report(&self) {
        info!(
            "Session GC: passes={}, purged={}, errors={}, last pass {:?}",
            self.passes(),
            self.purged(),
            self.errors(),
            *self.last_duration.read()
        );
    }
}

impl Default for TaskMetrics {
    fn default() -> Self {
        Self::new()
    }
}
