use crate::protocol::error::{ProtocolError, Result};
use bytes::Bytes;
use tracing::debug;

/// Size of a probe frame in bytes
pub const FRAME_SIZE: usize = 8;

/// Reserved payload marking the end of a measurement run
pub const LAST_PING: u64 = 0xBABE;

/// Top bit of a frame flags it as a control frame rather than a timestamp
pub const TERMINAL_FLAG: u64 = 1 << 63;

/// A single probe frame: either a monotonic timestamp or the terminal marker.
///
/// Timestamps are encoded with [`TERMINAL_FLAG`] clear and the sentinel with it
/// set, so the two can never collide regardless of clock value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Timestamp(u64),
    LastPing,
}

impl Probe {
    pub fn timestamp(nanos: u64) -> Self {
        Probe::Timestamp(nanos & !TERMINAL_FLAG)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Probe::LastPing)
    }

    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let raw = match *self {
            Probe::Timestamp(nanos) => nanos & !TERMINAL_FLAG,
            Probe::LastPing => TERMINAL_FLAG | LAST_PING,
        };
        raw.to_be_bytes()
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.encode())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FRAME_SIZE {
            debug!(
                expected = FRAME_SIZE,
                actual = bytes.len(),
                "Invalid frame size"
            );
            return Err(ProtocolError::InvalidFrameSize {
                expected: FRAME_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = [0u8; FRAME_SIZE];
        buf.copy_from_slice(bytes);
        let raw = u64::from_be_bytes(buf);

        if raw & TERMINAL_FLAG == 0 {
            return Ok(Probe::Timestamp(raw));
        }
        if raw == TERMINAL_FLAG | LAST_PING {
            debug!("Terminal frame decoded");
            return Ok(Probe::LastPing);
        }
        Err(ProtocolError::UnknownControlFrame(raw))
    }
}

/// A message as seen by a transport: payload plus association addressing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressedMessage {
    pub protocol_id: u32,
    pub stream_id: u16,
    pub is_complete: bool,
    pub payload: Bytes,
}

impl AddressedMessage {
    /// A complete message
    pub fn new(protocol_id: u32, stream_id: u16, payload: Bytes) -> Self {
        Self {
            protocol_id,
            stream_id,
            is_complete: true,
            payload,
        }
    }

    pub fn fragment(protocol_id: u32, stream_id: u16, payload: Bytes, is_complete: bool) -> Self {
        Self {
            protocol_id,
            stream_id,
            is_complete,
            payload,
        }
    }

    /// Splits the payload into fragments of at most `max_payload` bytes.
    ///
    /// Every fragment but the last is marked incomplete. A payload that already
    /// fits is returned as-is.
    pub fn split(self, max_payload: usize) -> Vec<AddressedMessage> {
        if max_payload == 0 || self.payload.len() <= max_payload {
            return vec![self];
        }

        let mut remaining = self.payload;
        let mut fragments = Vec::with_capacity(remaining.len().div_ceil(max_payload));
        while remaining.len() > max_payload {
            let head = remaining.split_to(max_payload);
            fragments.push(Self::fragment(self.protocol_id, self.stream_id, head, false));
        }
        fragments.push(Self::fragment(
            self.protocol_id,
            self.stream_id,
            remaining,
            self.is_complete,
        ));
        fragments
    }
}
