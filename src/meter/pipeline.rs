//! Codec stages between a transport channel and a meter.
//!
//! Inbound order is range filter, reassembler (optional), completion guard,
//! then the probe frame decoder. Outbound probes go through
//! the round-robin encoder when multi-streaming, otherwise straight onto
//! stream 0.

use crate::error::{BenchError, Result};
use crate::protocol::{AddressedMessage, Probe, ProtocolResult};
use crate::stream::{FragmentReassembler, InboundStreamingDecoder, OutboundStreamingEncoder, StreamRange};
use crate::transport::{Channel, ChannelHandler};
use std::sync::Arc;
use tracing::debug;

/// How probes are addressed on the association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Plain transport: no addressing, every message is complete
    Single,
    /// Spread probes over `range`, accept only what falls inside it
    Multi { range: StreamRange, reassemble: bool },
}

impl StreamMode {
    pub fn is_multi(&self) -> bool {
        matches!(self, StreamMode::Multi { .. })
    }
}

/// Probe-level events delivered to a meter
pub trait ProbeHandler: Send + Sync {
    fn channel_active(&self, outbound: Outbound);

    fn probe_received(&self, probe: Probe);

    fn exception_caught(&self, error: BenchError);

    fn channel_inactive(&self);
}

/// Write side of a meter's association
#[derive(Clone)]
pub struct Outbound {
    channel: Arc<dyn Channel>,
    encoder: Option<Arc<OutboundStreamingEncoder>>,
}

impl Outbound {
    pub fn new(channel: Arc<dyn Channel>, encoder: Option<Arc<OutboundStreamingEncoder>>) -> Self {
        Self { channel, encoder }
    }

    pub fn write(&self, probe: Probe) -> Result<()> {
        let payload = probe.to_bytes();
        let msg = match &self.encoder {
            Some(encoder) => encoder.encode(payload),
            None => AddressedMessage::new(0, 0, payload),
        };
        self.channel.send(msg)
    }

    pub fn close(&self) {
        self.channel.close();
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }
}

/// Adapts a [`ProbeHandler`] to the transport's [`ChannelHandler`]
pub struct Pipeline<H> {
    handler: Arc<H>,
    reassembler: Option<FragmentReassembler>,
    decoder: Option<InboundStreamingDecoder>,
    encoder: Option<Arc<OutboundStreamingEncoder>>,
}

impl<H: ProbeHandler> Pipeline<H> {
    pub fn new(handler: Arc<H>, mode: StreamMode) -> Self {
        match mode {
            StreamMode::Single => Self {
                handler,
                reassembler: None,
                decoder: None,
                encoder: None,
            },
            StreamMode::Multi { range, reassemble } => Self {
                handler,
                reassembler: reassemble.then(FragmentReassembler::new),
                decoder: Some(InboundStreamingDecoder::new(range)),
                encoder: Some(Arc::new(OutboundStreamingEncoder::new(range))),
            },
        }
    }

    fn decode(&self, msg: AddressedMessage) -> ProtocolResult<Option<Probe>> {
        // foreign fragments must never reach the reassembly buffers
        if let Some(decoder) = &self.decoder {
            if !decoder.accept(&msg) {
                debug!(
                    protocol_id = msg.protocol_id,
                    stream_id = msg.stream_id,
                    "Message outside accepted stream range, dropping"
                );
                return Ok(None);
            }
        }

        let msg = match &self.reassembler {
            Some(reassembler) => match reassembler.push(msg)? {
                Some(whole) => whole,
                None => return Ok(None),
            },
            None => msg,
        };

        let payload = match &self.decoder {
            Some(decoder) => match decoder.decode(msg)? {
                Some(payload) => payload,
                None => return Ok(None),
            },
            None => msg.payload,
        };

        Probe::decode(&payload).map(Some)
    }
}

impl<H: ProbeHandler> ChannelHandler for Pipeline<H> {
    fn channel_active(&self, channel: Arc<dyn Channel>) {
        self.handler
            .channel_active(Outbound::new(channel, self.encoder.clone()));
    }

    fn message_received(&self, msg: AddressedMessage) {
        match self.decode(msg) {
            Ok(Some(probe)) => self.handler.probe_received(probe),
            Ok(None) => debug!("Nothing to deliver yet"),
            Err(e) => self.handler.exception_caught(e.into()),
        }
    }

    fn exception_caught(&self, error: BenchError) {
        self.handler.exception_caught(error);
    }

    fn channel_inactive(&self) {
        self.handler.channel_inactive();
    }
}
