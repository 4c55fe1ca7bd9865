//! Multi-stream latency benchmark
//!
//! Measures round-trip latency between a client and a server meter over a
//! pluggable transport. On multi-stream associations outbound probes are
//! spread round-robin over a stream range, and inbound traffic is filtered
//! to that range and checked for completeness before it is timed.

pub mod clock;
pub mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod histogram;
pub mod logging;
pub mod meter;
pub mod protocol;
pub mod report;
pub mod stream;
pub mod transport;

pub use config::BenchConfig;
pub use driver::{transport_factory, BenchSettings, BenchmarkDriver, RunReport, TransportFactory};
pub use error::{BenchError, Result};
pub use histogram::Histogram;
