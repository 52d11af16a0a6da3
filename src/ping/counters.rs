//! Counters shared between the emitter thread and the correlator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// `sent` is only written by the emitter and `received` only by the
/// correlator. Neither side ever waits on them, so relaxed atomics suffice.
#[derive(Debug, Clone, Default)]
pub struct SessionCounters {
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of both counters.
    pub fn snapshot(&self) -> CounterSnapshot {
        // Read `received` first so a concurrent send can only make `sent` larger.
        let received = self.received();
        let sent = self.sent();
        CounterSnapshot { sent, received }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub sent: u64,
    pub received: u64,
}

impl CounterSnapshot {
    /// `1 - received / sent`, or `1.0` when nothing was sent.
    pub fn loss_ratio(&self) -> f64 {
        if self.sent == 0 {
            return 1.0;
        }
        (1.0 - self.received as f64 / self.sent as f64).clamp(0.0, 1.0)
    }

    pub fn loss_percent(&self) -> f64 {
        self.loss_ratio() * 100.0
    }

    /// Every transmitted probe came back.
    pub fn is_complete(&self) -> bool {
        self.received == self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let counters = SessionCounters::new();
        let emitter_side = counters.clone();

        emitter_side.increment_sent();
        emitter_side.increment_sent();
        counters.increment_received();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot, CounterSnapshot { sent: 2, received: 1 });
        assert!((snapshot.loss_percent() - 50.0).abs() < 1e-9);
        assert!(!snapshot.is_complete());
    }

    #[test]
    fn test_nothing_sent_is_total_loss() {
        let snapshot = CounterSnapshot { sent: 0, received: 0 };
        assert_eq!(snapshot.loss_ratio(), 1.0);
        assert_eq!(format!("{:.2}", snapshot.loss_percent()), "100.00");
    }

    #[test]
    fn test_all_received_is_zero_loss() {
        let snapshot = CounterSnapshot { sent: 30, received: 30 };
        assert_eq!(snapshot.loss_percent(), 0.0);
        assert!(snapshot.is_complete());
    }

    proptest! {
        #[test]
        fn test_loss_percent_in_range(sent in 0u64..10_000, received_frac in 0.0f64..=1.0) {
            let received = (sent as f64 * received_frac).floor() as u64;
            let loss = CounterSnapshot { sent, received }.loss_percent();
            prop_assert!((0.0..=100.0).contains(&loss));
        }
    }
}
