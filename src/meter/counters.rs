//! Lock-free per-meter traffic counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters bumped from the transport worker that drives a meter.
///
/// Plain `Relaxed` atomics: they are only ever read as totals once the run
/// is over, never used to order anything.
#[derive(Debug, Default)]
pub struct MeterCounters {
    probes_sent: AtomicU64,
    probes_received: AtomicU64,
    errors: AtomicU64,
}

impl MeterCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_sent(&self) {
        self.probes_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_received(&self) {
        self.probes_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MeterStats {
        MeterStats {
            probes_sent: self.probes_sent.load(Ordering::Relaxed),
            probes_received: self.probes_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Final meter statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterStats {
    pub probes_sent: u64,
    pub probes_received: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters() {
        let counters = MeterCounters::new();

        counters.increment_received();
        counters.increment_sent();
        counters.increment_sent();
        counters.increment_error();

        assert_eq!(
            counters.snapshot(),
            MeterStats {
                probes_sent: 2,
                probes_received: 1,
                errors: 1,
            }
        );
    }

    #[test]
    fn test_counters_from_many_threads() {
        let counters = Arc::new(MeterCounters::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        counters.increment_received();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.snapshot().probes_received, 40_000);
    }
}
