use anyhow::{Context, Result};
use clap::Parser;
use multistream_latency::logging::init_logging;
use multistream_latency::meter::{NullObserver, ProbeObserver};
use multistream_latency::report::{ProgressTracker, Reporter};
use multistream_latency::{BenchConfig, BenchmarkDriver};
use tracing::{error, info};

fn main() {
    let config = BenchConfig::parse();

    init_logging(&config.log_level, config.is_json_format());

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config) {
        error!(error = %e, "Benchmark failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(config: BenchConfig) -> Result<()> {
    let settings = config.settings().context("Failed to build benchmark settings")?;
    let (server_factory, client_factory) = config.transport_factories();
    let mut driver = BenchmarkDriver::new(settings, server_factory, client_factory)
        .context("Failed to create benchmark driver")?;

    info!(
        transport = ?config.transport,
        probes = config.probes,
        "Starting latency benchmark"
    );

    let mut observer: Box<dyn ProbeObserver> = if config.quiet || config.raw {
        Box::new(NullObserver)
    } else {
        Box::new(ProgressTracker::with_default_interval(config.probes)?)
    };

    let report = driver
        .run_observed(config.probes, observer.as_mut())
        .with_context(|| format!("Benchmark over {:?} transport failed", config.transport))?;
    drop(observer);

    let reporter = Reporter;
    if config.raw {
        reporter.print_raw(&report.histogram.snapshot());
    } else {
        reporter.print_results(&report)?;
    }
    Ok(())
}
