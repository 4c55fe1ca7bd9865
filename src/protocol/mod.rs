//! Wire-level types: the 8-byte probe frame and the addressed message exchanged with transports

pub mod error;
pub mod message;

pub use error::{ProtocolError, Result as ProtocolResult};
pub use message::{AddressedMessage, Probe, FRAME_SIZE, LAST_PING, TERMINAL_FLAG};
