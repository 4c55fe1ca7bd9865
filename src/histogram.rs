//! Fixed-boundary latency histogram
//!
//! Bucket bounds are fixed at construction; only the counts move, and they are
//! plain atomics so the client and server meters can record concurrently
//! without a lock.

use crate::error::{BenchError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub struct Histogram {
    upper_bounds: Box<[u64]>,
    counts: Box<[AtomicU64]>,
    overflow: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Create a histogram over strictly increasing, inclusive bucket upper bounds
    pub fn new(upper_bounds: Vec<u64>) -> Result<Self> {
        if upper_bounds.is_empty() {
            return Err(BenchError::Config(
                "histogram needs at least one bucket".into(),
            ));
        }
        if let Some(pair) = upper_bounds.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(BenchError::Config(format!(
                "histogram bounds must be strictly increasing, found {} followed by {}",
                pair[0], pair[1]
            )));
        }

        debug!(
            buckets = upper_bounds.len(),
            first_bound = upper_bounds[0],
            last_bound = upper_bounds[upper_bounds.len() - 1],
            "Histogram created"
        );

        let counts = upper_bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            upper_bounds: upper_bounds.into_boxed_slice(),
            counts,
            overflow: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        })
    }

    /// Bounds `width, 2*width, ..., buckets*width`, optionally closing with `u64::MAX`
    pub fn linear_bounds(width: u64, buckets: usize, overflow_bucket: bool) -> Vec<u64> {
        let mut bounds: Vec<u64> = (1..=buckets as u64)
            .map(|i| width.saturating_mul(i))
            .collect();
        if overflow_bucket {
            if let Some(last) = bounds.last_mut() {
                *last = u64::MAX;
            }
        }
        bounds
    }

    /// Record one observation in the first bucket whose bound is >= `value`
    pub fn add_observation(&self, value: u64) {
        let idx = self.upper_bounds.partition_point(|&bound| bound < value);
        match self.counts.get(idx) {
            Some(count) => count.fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    pub fn bucket_count(&self) -> usize {
        self.upper_bounds.len()
    }

    pub fn upper_bound_at(&self, idx: usize) -> u64 {
        self.upper_bounds[idx]
    }

    pub fn count_at(&self, idx: usize) -> u64 {
        self.counts[idx].load(Ordering::Relaxed)
    }

    /// Observations that exceeded the last bound
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Total observations, including overflow
    pub fn count(&self) -> u64 {
        self.counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum::<u64>()
            + self.overflow_count()
    }

    pub fn min(&self) -> Option<u64> {
        match self.min.load(Ordering::Relaxed) {
            u64::MAX if self.count() == 0 => None,
            value => Some(value),
        }
    }

    pub fn max(&self) -> Option<u64> {
        (self.count() > 0).then(|| self.max.load(Ordering::Relaxed))
    }

    /// Mean estimated from bucket midpoints, clipped to the observed min/max.
    ///
    /// Overflowed observations contribute the observed maximum.
    pub fn mean(&self) -> Option<f64> {
        let (min, max) = (self.min()?, self.max()?);
        let mut weighted = 0f64;
        let mut lower = min;
        let mut total = 0u64;

        for (idx, &bound) in self.upper_bounds.iter().enumerate() {
            let count = self.count_at(idx);
            if count > 0 {
                let upper = bound.min(max);
                let lo = lower.min(upper);
                let midpoint = lo as f64 + (upper - lo) as f64 / 2.0;
                weighted += midpoint * count as f64;
                total += count;
            }
            lower = bound.max(min);
        }

        let overflow = self.overflow_count();
        weighted += max as f64 * overflow as f64;
        total += overflow;

        (total > 0).then(|| weighted / total as f64)
    }

    /// Upper bound of the bucket holding the `factor` quantile, e.g. 0.99.
    ///
    /// Returns the observed maximum when the quantile falls into overflow.
    pub fn upper_bound_for_factor(&self, factor: f64) -> Option<u64> {
        let total = self.count();
        if total == 0 {
            return None;
        }
        let factor = factor.clamp(0.0, 1.0);
        let target = ((total as f64 * factor).ceil() as u64).max(1);

        let mut cumulative = 0u64;
        for (idx, &bound) in self.upper_bounds.iter().enumerate() {
            cumulative += self.count_at(idx);
            if cumulative >= target {
                return Some(bound);
            }
        }
        self.max()
    }

    /// Point-in-time copy of every bucket, in ascending bound order
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self
                .upper_bounds
                .iter()
                .enumerate()
                .map(|(idx, &upper_bound)| Bucket {
                    upper_bound,
                    count: self.count_at(idx),
                })
                .collect(),
            overflow: self.overflow_count(),
        }
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram")
            .field("buckets", &self.bucket_count())
            .field("count", &self.count())
            .field("overflow", &self.overflow_count())
            .finish()
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Histogram{{count={}, min={:?}, max={:?}, mean={:?}, 99%={:?}, 99.99%={:?}, [",
            self.count(),
            self.min(),
            self.max(),
            self.mean().map(|m| m.round() as u64),
            self.upper_bound_for_factor(0.99),
            self.upper_bound_for_factor(0.9999),
        )?;
        let mut first = true;
        for bucket in self.snapshot().buckets.iter().filter(|b| b.count > 0) {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", bucket.upper_bound, bucket.count)?;
            first = false;
        }
        write!(f, "], overflow={}}}", self.overflow_count())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub upper_bound: u64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub buckets: Vec<Bucket>,
    pub overflow: u64,
}

impl HistogramSnapshot {
    pub fn counts(&self) -> Vec<u64> {
        self.buckets.iter().map(|b| b.count).collect()
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum::<u64>() + self.overflow
    }
}

/// One `upper_bound<TAB>count` line per bucket, then the overflow line
impl fmt::Display for HistogramSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bucket in &self.buckets {
            writeln!(f, "{}\t{}", bucket.upper_bound, bucket.count)?;
        }
        writeln!(f, "overflow\t{}", self.overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_scenario_bucket_assignment() -> Result<()> {
        let hist = Histogram::new(vec![100, 200, 300])?;
        for value in [50, 150, 250, 500] {
            hist.add_observation(value);
        }

        let snapshot = hist.snapshot();
        assert_eq!(snapshot.counts(), vec![1, 1, 1]);
        assert_eq!(snapshot.overflow, 1);
        assert_eq!(hist.count(), 4);
        Ok(())
    }

    #[test]
    fn test_bounds_are_inclusive() -> Result<()> {
        let hist = Histogram::new(vec![100, 200])?;
        hist.add_observation(100);
        hist.add_observation(101);
        hist.add_observation(200);
        hist.add_observation(201);

        assert_eq!(hist.count_at(0), 1);
        assert_eq!(hist.count_at(1), 2);
        assert_eq!(hist.overflow_count(), 1);
        Ok(())
    }

    #[test]
    fn test_zero_lands_in_lowest_bucket() -> Result<()> {
        let hist = Histogram::new(vec![10, 20])?;
        hist.add_observation(0);
        assert_eq!(hist.count_at(0), 1);
        assert_eq!(hist.min(), Some(0));
        Ok(())
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        assert!(Histogram::new(vec![]).is_err());
        assert!(Histogram::new(vec![100, 100]).is_err());
        assert!(Histogram::new(vec![200, 100]).is_err());
    }

    #[test]
    fn test_empty_histogram_statistics() -> Result<()> {
        let hist = Histogram::new(vec![100])?;
        assert_eq!(hist.count(), 0);
        assert_eq!(hist.min(), None);
        assert_eq!(hist.max(), None);
        assert_eq!(hist.mean(), None);
        assert_eq!(hist.upper_bound_for_factor(0.99), None);
        Ok(())
    }

    #[test]
    fn test_summary_statistics() -> Result<()> {
        let hist = Histogram::new(vec![100, 200, 300, 400])?;
        for value in [100, 100, 100, 150, 350] {
            hist.add_observation(value);
        }

        assert_eq!(hist.min(), Some(100));
        assert_eq!(hist.max(), Some(350));
        assert_eq!(hist.upper_bound_for_factor(0.5), Some(100));
        assert_eq!(hist.upper_bound_for_factor(0.8), Some(200));
        assert_eq!(hist.upper_bound_for_factor(1.0), Some(400));

        let mean = hist.mean().unwrap();
        assert!((100.0..=350.0).contains(&mean), "mean {} out of range", mean);
        Ok(())
    }

    #[test]
    fn test_percentile_in_overflow_reports_max() -> Result<()> {
        let hist = Histogram::new(vec![10])?;
        hist.add_observation(5);
        hist.add_observation(1_000);
        assert_eq!(hist.upper_bound_for_factor(0.99), Some(1_000));
        Ok(())
    }

    #[test]
    fn test_linear_bounds() {
        assert_eq!(
            Histogram::linear_bounds(50_000, 3, false),
            vec![50_000, 100_000, 150_000]
        );
        assert_eq!(
            Histogram::linear_bounds(50_000, 3, true),
            vec![50_000, 100_000, u64::MAX]
        );

        let default = Histogram::linear_bounds(50_000, 256, false);
        assert_eq!(default.len(), 256);
        assert_eq!(default[255], 256 * 50_000);
    }

    #[test]
    fn test_overflow_bucket_catches_everything() -> Result<()> {
        let hist = Histogram::new(Histogram::linear_bounds(10, 4, true))?;
        hist.add_observation(u64::MAX);
        assert_eq!(hist.overflow_count(), 0);
        assert_eq!(hist.count_at(3), 1);
        Ok(())
    }

    #[test]
    fn test_concurrent_observations() -> Result<()> {
        let hist = Arc::new(Histogram::new(vec![100, 200, 300])?);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let hist = Arc::clone(&hist);
                thread::spawn(move || {
                    for i in 0..10_000u64 {
                        hist.add_observation((i + t) % 400);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(hist.count(), 40_000);
        assert_eq!(hist.snapshot().total(), 40_000);
        Ok(())
    }

    #[test]
    fn test_snapshot_dump_is_ordered() -> Result<()> {
        let hist = Histogram::new(vec![100, 200])?;
        hist.add_observation(150);
        hist.add_observation(900);

        let dump = hist.snapshot().to_string();
        assert_eq!(dump, "100\t0\n200\t1\noverflow\t1\n");
        Ok(())
    }

    #[test]
    fn test_display_lists_non_empty_buckets() -> Result<()> {
        let hist = Histogram::new(vec![100, 200, 300])?;
        hist.add_observation(150);
        let text = hist.to_string();
        assert!(text.contains("200=1"));
        assert!(!text.contains("100=0"));
        Ok(())
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_every_observation_counted_once(values in prop::collection::vec(0u64..2_000, 0..200)) {
            let hist = Histogram::new(vec![100, 500, 1_000]).unwrap();
            for &value in &values {
                hist.add_observation(value);
            }
            prop_assert_eq!(hist.count(), values.len() as u64);
        }

        #[test]
        fn test_observation_goes_to_first_bound_at_or_above(value in 0u64..2_000) {
            let bounds = vec![100u64, 500, 1_000];
            let hist = Histogram::new(bounds.clone()).unwrap();
            hist.add_observation(value);

            match bounds.iter().position(|&b| b >= value) {
                Some(idx) => prop_assert_eq!(hist.count_at(idx), 1),
                None => prop_assert_eq!(hist.overflow_count(), 1),
            }
        }
    }
}
