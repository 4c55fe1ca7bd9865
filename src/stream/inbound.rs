use crate::constants::MAX_REASSEMBLED_SIZE;
use crate::protocol::{AddressedMessage, ProtocolError, ProtocolResult};
use crate::stream::range::StreamRange;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Accepts only messages for the configured protocol on a stream inside the range
#[derive(Debug, Clone, Copy)]
pub struct StreamRangeFilter {
    range: StreamRange,
}

impl StreamRangeFilter {
    pub fn new(range: StreamRange) -> Self {
        Self { range }
    }

    pub fn accept(&self, msg: &AddressedMessage) -> bool {
        self.range.matches(msg.protocol_id, msg.stream_id)
    }
}

/// Refuses to hand partial messages to the decode stage.
///
/// An incomplete message here means no reassembler ran upstream and the
/// association can no longer be trusted to be in sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionGuard;

impl CompletionGuard {
    pub fn decode(&self, msg: AddressedMessage) -> ProtocolResult<Bytes> {
        if !msg.is_complete {
            return Err(ProtocolError::IncompleteMessage {
                protocol_id: msg.protocol_id,
                stream_id: msg.stream_id,
            });
        }
        Ok(msg.payload)
    }
}

/// Inbound half of the streaming codec: range filter followed by completion guard
#[derive(Debug, Clone, Copy)]
pub struct InboundStreamingDecoder {
    filter: StreamRangeFilter,
    guard: CompletionGuard,
}

impl InboundStreamingDecoder {
    pub fn new(range: StreamRange) -> Self {
        Self {
            filter: StreamRangeFilter::new(range),
            guard: CompletionGuard,
        }
    }

    pub fn accept(&self, msg: &AddressedMessage) -> bool {
        self.filter.accept(msg)
    }

    /// `Ok(None)` when the message is not addressed to this decoder
    pub fn decode(&self, msg: AddressedMessage) -> ProtocolResult<Option<Bytes>> {
        if !self.filter.accept(&msg) {
            debug!(
                protocol_id = msg.protocol_id,
                stream_id = msg.stream_id,
                "Message outside accepted stream range, dropping"
            );
            return Ok(None);
        }
        self.guard.decode(msg).map(Some)
    }
}

/// Joins fragments into complete messages, per (protocol, stream).
///
/// Streams are ordered independently, so fragments of one stream may be
/// interleaved with fragments of another without confusing either.
#[derive(Debug)]
pub struct FragmentReassembler {
    partial: Mutex<HashMap<(u32, u16), BytesMut>>,
    limit: usize,
}

impl FragmentReassembler {
    pub fn new() -> Self {
        Self::with_limit(MAX_REASSEMBLED_SIZE)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            partial: Mutex::new(HashMap::new()),
            limit,
        }
    }

    /// Feed one fragment; returns the whole message once its final fragment arrives
    pub fn push(&self, msg: AddressedMessage) -> ProtocolResult<Option<AddressedMessage>> {
        let key = (msg.protocol_id, msg.stream_id);
        let mut partial = self.partial.lock();

        if msg.is_complete && !partial.contains_key(&key) {
            return Ok(Some(msg));
        }

        let buffered = partial.entry(key).or_default();
        let size = buffered.len() + msg.payload.len();
        if size > self.limit {
            partial.remove(&key);
            return Err(ProtocolError::ReassemblyOverflow {
                stream_id: msg.stream_id,
                size,
                limit: self.limit,
            });
        }
        buffered.extend_from_slice(&msg.payload);

        if !msg.is_complete {
            debug!(
                stream_id = msg.stream_id,
                buffered = buffered.len(),
                "Buffered message fragment"
            );
            return Ok(None);
        }

        let payload = partial
            .remove(&key)
            .map(BytesMut::freeze)
            .unwrap_or_default();
        debug!(
            stream_id = msg.stream_id,
            len = payload.len(),
            "Reassembled message"
        );
        Ok(Some(AddressedMessage::new(
            msg.protocol_id,
            msg.stream_id,
            payload,
        )))
    }

    /// Number of streams with a partially received message
    pub fn pending_streams(&self) -> usize {
        self.partial.lock().len()
    }
}

impl Default for FragmentReassembler {
    fn default() -> Self {
        Self::new()
    }
}
