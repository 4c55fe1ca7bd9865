use crate::error::{BenchError, Result};

/// An application protocol and the inclusive range of streams it owns on an association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRange {
    protocol_id: u32,
    min_stream: u16,
    max_stream: u16,
}

impl StreamRange {
    pub fn new(protocol_id: u32, min_stream: u16, max_stream: u16) -> Result<Self> {
        if min_stream > max_stream {
            return Err(BenchError::InvalidStreamRange {
                min: min_stream,
                max: max_stream,
            });
        }
        Ok(Self {
            protocol_id,
            min_stream,
            max_stream,
        })
    }

    pub fn single(protocol_id: u32, stream: u16) -> Self {
        Self {
            protocol_id,
            min_stream: stream,
            max_stream: stream,
        }
    }

    pub fn protocol_id(&self) -> u32 {
        self.protocol_id
    }

    pub fn min_stream(&self) -> u16 {
        self.min_stream
    }

    pub fn max_stream(&self) -> u16 {
        self.max_stream
    }

    /// Number of streams in the range, always >= 1
    pub fn width(&self) -> u32 {
        u32::from(self.max_stream - self.min_stream) + 1
    }

    pub fn contains(&self, stream_id: u16) -> bool {
        (self.min_stream..=self.max_stream).contains(&stream_id)
    }

    pub fn matches(&self, protocol_id: u32, stream_id: u16) -> bool {
        protocol_id == self.protocol_id && self.contains(stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverted_range_rejected() {
        assert!(matches!(
            StreamRange::new(0, 5, 4),
            Err(BenchError::InvalidStreamRange { min: 5, max: 4 })
        ));
    }

    #[test]
    fn test_width() -> Result<()> {
        assert_eq!(StreamRange::new(0, 0, 9)?.width(), 10);
        assert_eq!(StreamRange::single(0, 3).width(), 1);
        assert_eq!(StreamRange::new(0, 0, u16::MAX)?.width(), 65_536);
        Ok(())
    }

    #[test]
    fn test_matches() -> Result<()> {
        let range = StreamRange::new(7, 2, 4)?;
        assert!(range.matches(7, 2));
        assert!(range.matches(7, 4));
        assert!(!range.matches(7, 1));
        assert!(!range.matches(7, 5));
        assert!(!range.matches(8, 3));
        Ok(())
    }
}
