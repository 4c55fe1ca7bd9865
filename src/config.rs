//! Command-line configuration for the `perf` binary

use crate::constants::*;
use crate::driver::{transport_factory, BenchSettings, TransportFactory};
use crate::error::{BenchError, Result};
use crate::histogram::Histogram;
use crate::meter::StreamMode;
use crate::stream::StreamRange;
use crate::transport::{MemoryTransport, MultiStreamTransport, TcpTransport, Transport};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain TCP, bare 8-byte frames
    Tcp,
    /// Multi-stream association framing over TCP
    Multistream,
    /// In-process association, no sockets
    Memory,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "perf")]
#[command(about = "Round-trip latency benchmark over single and multi-stream associations")]
pub struct BenchConfig {
    /// Transport to measure
    #[arg(long, value_enum, default_value_t = TransportKind::Multistream)]
    pub transport: TransportKind,

    /// Number of probes to exchange
    #[arg(long, default_value_t = DEFAULT_PROBE_COUNT)]
    pub probes: usize,

    /// Application protocol identifier carried on every message
    #[arg(long, default_value_t = 0)]
    pub protocol_id: u32,

    /// Lowest stream id of the range (inclusive)
    #[arg(long, default_value_t = DEFAULT_MIN_STREAM)]
    pub min_stream: u16,

    /// Highest stream id of the range (inclusive)
    #[arg(long, default_value_t = DEFAULT_MAX_STREAM)]
    pub max_stream: u16,

    /// Reassemble fragmented messages before they reach the stream decoder
    #[arg(long)]
    pub reassemble: bool,

    /// Split outbound payloads larger than this many bytes into fragments
    #[arg(long)]
    pub fragment_size: Option<usize>,

    /// Width of each histogram bucket in nanoseconds
    #[arg(long, default_value_t = DEFAULT_BUCKET_WIDTH_NS)]
    pub bucket_width_ns: u64,

    /// Number of histogram buckets
    #[arg(long, default_value_t = DEFAULT_BUCKET_COUNT)]
    pub buckets: usize,

    /// Make the last bucket a catch-all instead of counting overflow separately
    #[arg(long)]
    pub overflow_bucket: bool,

    /// Give up on a probe after this many milliseconds (0 waits forever)
    #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT_MS)]
    pub probe_timeout_ms: u64,

    /// Address the server side binds to
    #[arg(long, default_value = "127.0.0.1:0")]
    pub bind: SocketAddr,

    /// Disable the progress bar
    #[arg(long)]
    pub quiet: bool,

    /// Print the raw bucket dump instead of the formatted report
    #[arg(long)]
    pub raw: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Log format (text or json)
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub log_format: String,
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        debug!("Validating configuration");
        if self.probes == 0 {
            return Err(BenchError::Config("probes must be > 0".into()));
        }
        if self.min_stream > self.max_stream {
            return Err(BenchError::InvalidStreamRange {
                min: self.min_stream,
                max: self.max_stream,
            });
        }
        if self.bucket_width_ns == 0 {
            return Err(BenchError::Config("bucket_width_ns must be > 0".into()));
        }
        if self.buckets == 0 {
            return Err(BenchError::Config("buckets must be > 0".into()));
        }
        if self.fragment_size == Some(0) {
            return Err(BenchError::Config("fragment_size must be > 0".into()));
        }
        if self.fragment_size.is_some() && self.transport == TransportKind::Tcp {
            return Err(BenchError::Config(
                "fragment_size needs a transport that carries completion flags".into(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(BenchError::Config(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }
        debug!("Configuration validated successfully");
        Ok(())
    }

    pub fn is_json_format(&self) -> bool {
        self.log_format.to_lowercase() == "json"
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        (self.probe_timeout_ms > 0).then(|| Duration::from_millis(self.probe_timeout_ms))
    }

    /// `width, 2*width, ...` for the configured bucket count
    pub fn bucket_bounds(&self) -> Vec<u64> {
        Histogram::linear_bounds(self.bucket_width_ns, self.buckets, self.overflow_bucket)
    }

    pub fn stream_mode(&self) -> Result<StreamMode> {
        Ok(match self.transport {
            TransportKind::Tcp => StreamMode::Single,
            TransportKind::Multistream | TransportKind::Memory => StreamMode::Multi {
                range: StreamRange::new(self.protocol_id, self.min_stream, self.max_stream)?,
                reassemble: self.reassemble,
            },
        })
    }

    pub fn settings(&self) -> Result<BenchSettings> {
        Ok(BenchSettings {
            bucket_bounds: self.bucket_bounds(),
            stream_mode: self.stream_mode()?,
            bind_addr: self.bind,
            probe_timeout: self.probe_timeout(),
        })
    }

    /// Server and client factories for the selected transport
    pub fn transport_factories(&self) -> (TransportFactory, TransportFactory) {
        match self.transport {
            TransportKind::Tcp => (
                transport_factory(|| Ok(Arc::new(TcpTransport::new()) as Arc<dyn Transport>)),
                transport_factory(|| Ok(Arc::new(TcpTransport::new()) as Arc<dyn Transport>)),
            ),
            TransportKind::Multistream => {
                let fragment_size = self.fragment_size;
                let build = move || -> Result<Arc<dyn Transport>> {
                    let transport = match fragment_size {
                        Some(size) => MultiStreamTransport::new().with_fragment_size(size),
                        None => MultiStreamTransport::new(),
                    };
                    Ok(Arc::new(transport) as Arc<dyn Transport>)
                };
                (transport_factory(build), transport_factory(build))
            }
            TransportKind::Memory => {
                let mut transport = MemoryTransport::new();
                if let Some(size) = self.fragment_size {
                    transport = transport.with_fragment_size(size);
                }
                let server = transport.clone();
                (
                    transport_factory(move || Ok(Arc::new(server.clone()) as Arc<dyn Transport>)),
                    transport_factory(move || Ok(Arc::new(transport.clone()) as Arc<dyn Transport>)),
                )
            }
        }
    }
}
