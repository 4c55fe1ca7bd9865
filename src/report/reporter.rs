use crate::driver::RunReport;
use crate::error::Result;
use crate::histogram::HistogramSnapshot;
use crate::meter::ProbeOutcome;
use colored::*;
use tracing::{debug, info, warn};

/// Prints run results to stdout
pub struct Reporter;

const HISTOGRAM_BAR_WIDTH: usize = 30;

// Percentage thresholds for color coding
const HIGH_PERCENTAGE_THRESHOLD: f64 = 50.0;
const MEDIUM_PERCENTAGE_THRESHOLD: f64 = 10.0;

// Percentage thresholds for formatting precision
const LOW_PERCENTAGE_THRESHOLD: f64 = 0.1;
const MEDIUM_PRECISION_THRESHOLD: f64 = 1.0;

// Width for bucket labels (must be consistent for alignment)
const LABEL_WIDTH: usize = 12;

impl Reporter {
    /// Bar scaled against the largest percentage; tiny non-zero values still get a sliver
    fn render_bar_from_percentage(percentage: f64, max_percentage: f64, bar_width: usize) -> String {
        if percentage <= 0.0 {
            return String::new();
        }

        let bar_length_fractional = if max_percentage > 0.0 {
            (percentage / max_percentage) * bar_width as f64
        } else {
            0.0
        };
        let bar_length = bar_length_fractional as usize;

        if bar_length >= bar_width {
            "█".repeat(bar_width)
        } else if bar_length >= 1 {
            "█".repeat(bar_length)
        } else {
            match bar_length_fractional.fract() {
                f if f >= 0.875 => "▉".to_string(),
                f if f >= 0.75 => "▊".to_string(),
                f if f >= 0.625 => "▋".to_string(),
                f if f >= 0.5 => "▌".to_string(),
                f if f >= 0.375 => "▍".to_string(),
                f if f >= 0.25 => "▎".to_string(),
                _ => "▏".to_string(),
            }
        }
    }

    /// Smaller percentages get more decimal places
    fn format_percentage(percentage: f64) -> String {
        if percentage < LOW_PERCENTAGE_THRESHOLD {
            format!("{:5.3}%", percentage)
        } else if percentage < MEDIUM_PRECISION_THRESHOLD {
            format!("{:5.2}%", percentage)
        } else {
            format!("{:5.1}%", percentage)
        }
    }

    /// Counts of a thousand or more are shown with a "k" suffix
    fn format_count(count: u64) -> String {
        if count >= 1000 {
            format!("{:>6}k", count / 1000)
        } else {
            format!("{:>7}", count)
        }
    }

    fn colorize_label(label: &str, percentage: f64) -> String {
        let padded_label = format!("{:>width$}", label, width = LABEL_WIDTH);
        if percentage > HIGH_PERCENTAGE_THRESHOLD {
            padded_label.green().to_string()
        } else if percentage > MEDIUM_PERCENTAGE_THRESHOLD {
            padded_label.cyan().to_string()
        } else {
            padded_label
        }
    }

    fn bucket_label(upper_bound: u64) -> String {
        if upper_bound == u64::MAX {
            "catch-all".to_string()
        } else {
            format!("≤{} µs", upper_bound / 1_000)
        }
    }

    fn ns_to_us(ns: u64) -> f64 {
        ns as f64 / 1_000.0
    }

    pub fn print_results(&self, report: &RunReport) -> Result<()> {
        let histogram = &report.histogram;
        debug!(
            requested = report.requested,
            completed = report.completed,
            observations = histogram.count(),
            "Printing measurement results"
        );

        println!("\n{}", "┌─────────────────────────────┐".cyan());
        println!("{}", "│  Latency Results            │".cyan());
        println!("{}", "└─────────────────────────────┘".cyan());
        println!();

        let elapsed_secs = report.elapsed.as_secs_f64();
        println!(
            "Probes:   {} requested, {} completed",
            report.requested, report.completed
        );
        match &report.outcome {
            ProbeOutcome::Completed => {}
            ProbeOutcome::Interrupted(e) => {
                println!("          {} {}", "└─ run interrupted:".yellow(), e)
            }
            ProbeOutcome::SendFailed(e) => {
                println!("          {} {}", "└─ send failed:".red(), e)
            }
        }
        if elapsed_secs > 0.0 {
            println!(
                "Duration: {:.2}s ({:.1}k round trips/second)",
                elapsed_secs,
                report.completed as f64 / elapsed_secs / 1000.0
            );
        }
        println!(
            "Client:   {} sent, {} received, {} errors",
            report.client.probes_sent, report.client.probes_received, report.client.errors
        );
        println!(
            "Server:   {} sent, {} received, {} errors",
            report.server.probes_sent, report.server.probes_received, report.server.errors
        );
        for (role, failure) in [("client", &report.client_failure), ("server", &report.server_failure)] {
            if let Some(failure) = failure {
                println!("          {} {}: {}", "✗".red(), role, failure);
            }
        }
        println!();

        if histogram.count() == 0 {
            warn!("No observations recorded");
            println!("{}", "No observations recorded.".red());
            return Ok(());
        }

        println!("Latency Statistics (one observation per meter per probe):");
        if let (Some(min), Some(max)) = (histogram.min(), histogram.max()) {
            println!("  Min:       {:>10.1} µs", Self::ns_to_us(min));
            println!("  Max:       {:>10.1} µs", Self::ns_to_us(max));
        }
        if let Some(mean) = histogram.mean() {
            println!("  Mean:      {:>10.1} µs  ← bucket midpoints", mean / 1_000.0);
        }
        for (label, factor) in [("P50", 0.5), ("P90", 0.9), ("P99", 0.99)] {
            if let Some(bound) = histogram.upper_bound_for_factor(factor) {
                println!(
                    "  {:<10} {:>10}  ← upper bound of the bucket",
                    format!("{}:", label),
                    Self::bucket_label(bound)
                );
            }
        }
        if histogram.overflow_count() > 0 {
            println!(
                "  ⚠ {} observation(s) exceeded the last bucket bound",
                histogram.overflow_count()
            );
        }
        println!();

        self.print_bucket_distribution(&histogram.snapshot());

        info!(
            completed = report.completed,
            observations = histogram.count(),
            mean_ns = histogram.mean().unwrap_or_default(),
            "Results reported"
        );
        Ok(())
    }

    /// Non-empty buckets only, plus the overflow count when there is one
    pub fn print_bucket_distribution(&self, snapshot: &HistogramSnapshot) {
        println!("Latency Distribution (observations by bucket):");
        println!();

        let total = snapshot.total();
        if total == 0 {
            return;
        }
        let percentage = |count: u64| count as f64 / total as f64 * 100.0;
        let max_percentage = snapshot
            .buckets
            .iter()
            .map(|bucket| percentage(bucket.count))
            .chain(std::iter::once(percentage(snapshot.overflow)))
            .fold(0.0f64, f64::max);

        for bucket in snapshot.buckets.iter().filter(|bucket| bucket.count > 0) {
            let pct = percentage(bucket.count);
            println!(
                "  {}:  {:30} {} ({} observations)",
                Self::colorize_label(&Self::bucket_label(bucket.upper_bound), pct),
                Self::render_bar_from_percentage(pct, max_percentage, HISTOGRAM_BAR_WIDTH),
                Self::format_percentage(pct),
                Self::format_count(bucket.count)
            );
        }

        if snapshot.overflow > 0 {
            let pct = percentage(snapshot.overflow);
            let label = format!("{:>width$}", "overflow", width = LABEL_WIDTH);
            println!(
                "  {}:  {:30} {} ({} observations)",
                label.red().bold(),
                Self::render_bar_from_percentage(pct, max_percentage, HISTOGRAM_BAR_WIDTH),
                Self::format_percentage(pct),
                Self::format_count(snapshot.overflow)
            );
        }
    }

    /// Deterministic `bound<TAB>count` dump, one line per bucket
    pub fn print_raw(&self, snapshot: &HistogramSnapshot) {
        print!("{}", snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Histogram;
    use crate::meter::{MeterStats, WaitError};
    use std::sync::Arc;
    use std::time::Duration;

    fn report(observations: &[u64], outcome: ProbeOutcome) -> RunReport {
        let histogram = Arc::new(Histogram::new(Histogram::linear_bounds(50_000, 8, false)).unwrap());
        for &value in observations {
            histogram.add_observation(value);
        }
        RunReport {
            histogram,
            requested: 5,
            completed: observations.len() / 2,
            outcome,
            elapsed: Duration::from_millis(10),
            client: MeterStats::default(),
            server: MeterStats::default(),
            client_failure: None,
            server_failure: Some("Channel closed".into()),
        }
    }

    #[test]
    fn test_print_results_empty() -> Result<()> {
        Reporter.print_results(&report(&[], ProbeOutcome::Interrupted(WaitError::Cancelled)))
    }

    #[test]
    fn test_print_results_with_data() -> Result<()> {
        let observations = [10_000, 20_000, 60_000, 120_000, 900_000, 40_000];
        Reporter.print_results(&report(&observations, ProbeOutcome::Completed))
    }

    #[test]
    fn test_format_count() {
        assert_eq!(Reporter::format_count(100), "    100");
        assert_eq!(Reporter::format_count(1000), "     1k");
        assert_eq!(Reporter::format_count(5000), "     5k");
    }

    #[test]
    fn test_bucket_label() {
        assert_eq!(Reporter::bucket_label(50_000), "≤50 µs");
        assert_eq!(Reporter::bucket_label(u64::MAX), "catch-all");
    }

    #[test]
    fn test_bar_scaling() {
        assert_eq!(Reporter::render_bar_from_percentage(0.0, 50.0, 10), "");
        assert_eq!(Reporter::render_bar_from_percentage(50.0, 50.0, 10), "█".repeat(10));
        assert_eq!(Reporter::render_bar_from_percentage(25.0, 50.0, 10), "█".repeat(5));
        assert_eq!(Reporter::render_bar_from_percentage(1.0, 50.0, 10), "▏");
    }
}
