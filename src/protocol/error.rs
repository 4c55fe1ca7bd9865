use thiserror::Error;

/// Protocol-level errors for frame encoding/decoding and inbound validation
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid frame size: expected {expected}, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    #[error("Unknown control frame: {0:#018x}")]
    UnknownControlFrame(u64),

    #[error(
        "Received incomplete message on stream {stream_id} (protocol {protocol_id}), \
         add a FragmentReassembler in the pipeline before the stream decoder"
    )]
    IncompleteMessage { protocol_id: u32, stream_id: u16 },

    #[error("Frame payload too large: {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Reassembly buffer overflow on stream {stream_id}: {size} bytes exceeds limit of {limit}")]
    ReassemblyOverflow {
        stream_id: u16,
        size: usize,
        limit: usize,
    },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
