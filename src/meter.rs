//! Inbound traffic meter feeding the live TPS metric.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter of consumed stream records.
///
/// The stats broadcaster drains it once per interval; `tps` is the drained
/// count divided by the elapsed interval, rounded down.
#[derive(Debug, Default)]
pub struct TrafficMeter {
    counter: AtomicU64,
}

impl TrafficMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `n` consumed records.
    pub fn add(&self, n: u64) {
        self.counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Drain the counter, returning the count accumulated since the last drain.
    pub fn get_and_reset(&self) -> u64 {
        self.counter.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_reset() {
        let meter = TrafficMeter::new();
        meter.add(3);
        meter.add(7);

        assert_eq!(meter.get_and_reset(), 10);
        assert_eq!(meter.get_and_reset(), 0);
    }
}
