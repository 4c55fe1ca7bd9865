use crate::constants::{LIVE_STATS_UPDATE_INTERVAL, PROGRESS_TICK_INTERVAL_MS};
use crate::error::{BenchError, Result};
use crate::meter::ProbeObserver;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Progress bar with live round-trip figures, fed by the probe loop
pub struct ProgressTracker {
    pb: ProgressBar,
    start: Instant,
    update_interval: usize,
    total_ns: u128,
    samples: u64,
}

impl ProgressTracker {
    pub fn new(probe_count: usize, update_interval: usize) -> Result<Self> {
        let pb = ProgressBar::new(probe_count as u64);
        pb.set_style(
            ProgressStyle::with_template("{msg}\n{bar:40.cyan/blue} {pos:>7}/{len:7} [{elapsed_precise}]")
                .map_err(|e| BenchError::Measurement(format!("Failed to create progress style: {}", e)))?
                .progress_chars("█░"),
        );
        pb.enable_steady_tick(Duration::from_millis(PROGRESS_TICK_INTERVAL_MS));

        Ok(Self {
            pb,
            start: Instant::now(),
            update_interval: update_interval.max(1),
            total_ns: 0,
            samples: 0,
        })
    }

    pub fn with_default_interval(probe_count: usize) -> Result<Self> {
        Self::new(probe_count, LIVE_STATS_UPDATE_INTERVAL)
    }

    fn colorize_us(value_us: f64) -> ColoredString {
        let text = format!("{:.1}", value_us);
        if value_us < 500.0 {
            text.green()
        } else if value_us < 1_000.0 {
            text.yellow()
        } else {
            text.red()
        }
    }

    fn update_live_stats(&self, completed: usize, server_ns: u64, client_ns: u64) {
        let mean_us = if self.samples > 0 {
            self.total_ns as f64 / self.samples as f64 / 1_000.0
        } else {
            0.0
        };
        let elapsed = self.start.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };

        let lines = [
            format!(
                "→ server {}µs  client {}µs",
                Self::colorize_us(server_ns as f64 / 1_000.0),
                Self::colorize_us(client_ns as f64 / 1_000.0)
            ),
            format!("Mean: {}µs", Self::colorize_us(mean_us)),
            format!("Rate: {:.1}k probes/s", rate / 1_000.0),
        ];
        self.pb.set_message(lines.join("\n"));
    }
}

impl ProbeObserver for ProgressTracker {
    fn on_round_trip(&mut self, completed: usize, server_ns: u64, client_ns: u64) {
        self.pb.inc(1);
        self.total_ns += u128::from(server_ns) + u128::from(client_ns);
        self.samples += 2;

        if completed % self.update_interval == 0 {
            self.update_live_stats(completed, server_ns, client_ns);
        }
    }

    fn on_finish(&mut self, _completed: usize) {
        self.pb.finish();
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        // an interrupted run never reaches on_finish
        if !self.pb.is_finished() {
            self.pb.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts_round_trips() -> Result<()> {
        let mut tracker = ProgressTracker::new(4, 2)?;
        for completed in 1..=4 {
            tracker.on_round_trip(completed, 1_000, 3_000);
        }
        tracker.on_finish(4);

        assert_eq!(tracker.pb.position(), 4);
        assert_eq!(tracker.samples, 8);
        assert_eq!(tracker.total_ns, 16_000);
        assert!(tracker.pb.is_finished());
        Ok(())
    }

    #[test]
    fn test_zero_interval_is_clamped() -> Result<()> {
        let mut tracker = ProgressTracker::new(1, 0)?;
        tracker.on_round_trip(1, 10, 10);
        Ok(())
    }
}
