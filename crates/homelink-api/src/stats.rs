//! Usage counters sampled by the statistics task.

use std::sync::atomic::{AtomicU64, Ordering};

/// API-call and event counters, reset on every statistics flush.
#[derive(Default)]
pub struct Stats {
    api: AtomicU64,
    events: AtomicU64,
}

impl Stats {
    pub fn count_api_call(&self) {
        self.api.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    /// Read and reset both counters: (api calls, events).
    pub fn take(&self) -> (u64, u64) {
        (
            self.api.swap(0, Ordering::Relaxed),
            self.events.swap(0, Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_resets_counters() {
        let stats = Stats::default();
        stats.count_api_call();
        stats.count_api_call();
        stats.count_event();

        assert_eq!(stats.take(), (2, 1));
        assert_eq!(stats.take(), (0, 0));
    }
}
