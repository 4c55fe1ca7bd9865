use crate::protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid stream range: min_stream ({min}) must be <= max_stream ({max})")]
    InvalidStreamRange { min: u16, max: u16 },

    #[error("Failed to {op} {addr}: {source}")]
    Connection {
        op: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid benchmark state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Measurement error: {0}")]
    Measurement(String),
}

impl BenchError {
    pub(crate) fn connection(op: &'static str, addr: impl ToString, source: std::io::Error) -> Self {
        BenchError::Connection {
            op,
            addr: addr.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
