//! Transport capability traits and their concrete variants
//!
//! A transport is only expected to bind, connect, move addressed messages and
//! report what happens on a channel; framing, stream filtering and timing all
//! live above it.

pub mod framing;
pub mod memory;
pub mod socket;

use crate::error::{BenchError, Result};
use crate::protocol::AddressedMessage;
use std::net::SocketAddr;
use std::sync::Arc;

pub use framing::{AssociationFraming, FixedLengthFraming, Framing};
pub use memory::{Direction, MemoryTransport};
pub use socket::{MultiStreamTransport, SocketTransport, TcpTransport};

/// Sending half of one live association
pub trait Channel: Send + Sync {
    /// Send a message to the peer
    fn send(&self, msg: AddressedMessage) -> Result<()>;

    /// Close the association; closing twice is a no-op
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Receives the events of a channel, invoked from the transport's worker threads
pub trait ChannelHandler: Send + Sync {
    fn channel_active(&self, channel: Arc<dyn Channel>);

    fn message_received(&self, msg: AddressedMessage);

    fn exception_caught(&self, error: BenchError);

    fn channel_inactive(&self);
}

/// A bound listener or a connected client, owning the transport's worker threads
pub trait Endpoint: Send {
    fn local_addr(&self) -> SocketAddr;

    /// Close every channel and join the workers; idempotent
    fn close(&mut self);
}

pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether protocol and stream identifiers survive the trip to the peer
    fn supports_streams(&self) -> bool;

    fn bind(&self, addr: SocketAddr, handler: Arc<dyn ChannelHandler>) -> Result<Box<dyn Endpoint>>;

    fn connect(
        &self,
        addr: SocketAddr,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<Box<dyn Endpoint>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Channel {}

        impl Channel for Channel {
            fn send(&self, msg: AddressedMessage) -> Result<()>;
            fn close(&self);
            fn is_open(&self) -> bool;
        }
    }
}

#[cfg(test)]
pub use tests::MockChannel;
