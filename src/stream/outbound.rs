use crate::protocol::AddressedMessage;
use crate::stream::range::StreamRange;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Hands out streams of a range in strict rotation.
///
/// The counter is a single atomic so concurrent callers never share or skip a
/// slot: any `k * width` consecutive calls cover every stream exactly `k` times.
#[derive(Debug)]
pub struct RoundRobinStreamSelector {
    range: StreamRange,
    counter: AtomicU64,
}

impl RoundRobinStreamSelector {
    pub fn new(range: StreamRange) -> Self {
        Self {
            range,
            counter: AtomicU64::new(0),
        }
    }

    pub fn range(&self) -> &StreamRange {
        &self.range
    }

    pub fn next_stream(&self) -> u16 {
        let ticket = self.counter.fetch_add(1, Ordering::Relaxed);
        let offset = ticket % u64::from(self.range.width());
        // offset < width <= u16::MAX + 1, so min + offset <= max_stream
        self.range.min_stream() + offset as u16
    }
}

/// Wraps outbound payloads into addressed messages on round-robin streams
#[derive(Debug)]
pub struct OutboundStreamingEncoder {
    selector: RoundRobinStreamSelector,
}

impl OutboundStreamingEncoder {
    pub fn new(range: StreamRange) -> Self {
        Self {
            selector: RoundRobinStreamSelector::new(range),
        }
    }

    pub fn encode(&self, payload: Bytes) -> AddressedMessage {
        let stream_id = self.selector.next_stream();
        let protocol_id = self.selector.range().protocol_id();
        debug!(protocol_id, stream_id, len = payload.len(), "Encoded outbound message");
        AddressedMessage::new(protocol_id, stream_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_round_robin_order() -> Result<()> {
        let selector = RoundRobinStreamSelector::new(StreamRange::new(7, 0, 9)?);
        let picked: Vec<u16> = (0..20).map(|_| selector.next_stream()).collect();

        let expected: Vec<u16> = (0..10).chain(0..10).collect();
        assert_eq!(picked, expected);
        Ok(())
    }

    #[test]
    fn test_offset_range_starts_at_min() -> Result<()> {
        let selector = RoundRobinStreamSelector::new(StreamRange::new(0, 5, 7)?);
        let picked: Vec<u16> = (0..6).map(|_| selector.next_stream()).collect();
        assert_eq!(picked, vec![5, 6, 7, 5, 6, 7]);
        Ok(())
    }

    #[test]
    fn test_single_stream_degenerates() {
        let selector = RoundRobinStreamSelector::new(StreamRange::single(0, 4));
        assert!((0..100).all(|_| selector.next_stream() == 4));
    }

    #[test]
    fn test_full_u16_range_stays_in_bounds() -> Result<()> {
        let selector = RoundRobinStreamSelector::new(StreamRange::new(0, 0, u16::MAX)?);
        selector.counter.store(u64::from(u16::MAX), Ordering::Relaxed);
        assert_eq!(selector.next_stream(), u16::MAX);
        assert_eq!(selector.next_stream(), 0);
        Ok(())
    }

    #[test]
    fn test_concurrent_callers_stay_fair() -> Result<()> {
        let selector = Arc::new(RoundRobinStreamSelector::new(StreamRange::new(0, 3, 12)?));
        let per_thread = 2_500;
        let threads = 8;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let selector = Arc::clone(&selector);
                thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| selector.next_stream())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut tally: HashMap<u16, usize> = HashMap::new();
        for handle in handles {
            for stream in handle.join().unwrap() {
                *tally.entry(stream).or_default() += 1;
            }
        }

        // 20_000 picks over 10 streams
        assert_eq!(tally.len(), 10);
        assert!(tally.values().all(|&n| n == 2_000));
        Ok(())
    }

    #[test]
    fn test_encoder_addresses_messages() -> Result<()> {
        let encoder = OutboundStreamingEncoder::new(StreamRange::new(7, 1, 2)?);
        let first = encoder.encode(Bytes::from_static(b"12345678"));
        let second = encoder.encode(Bytes::from_static(b"12345678"));

        assert_eq!((first.protocol_id, first.stream_id), (7, 1));
        assert_eq!((second.protocol_id, second.stream_id), (7, 2));
        assert!(first.is_complete);
        Ok(())
    }
}
