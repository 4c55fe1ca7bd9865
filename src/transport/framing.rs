//! How addressed messages are laid out on a byte stream

use crate::constants::MAX_FRAME_PAYLOAD;
use crate::protocol::{AddressedMessage, ProtocolError, FRAME_SIZE};
use bytes::Bytes;
use std::io::{self, Read, Write};

pub trait Framing: Send + Sync + 'static {
    fn write_frame(&self, writer: &mut dyn Write, msg: &AddressedMessage) -> io::Result<()>;

    fn read_frame(&self, reader: &mut dyn Read) -> io::Result<AddressedMessage>;
}

fn invalid_data(err: ProtocolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Bare 8-byte frames with no addressing; every frame is a complete message on stream 0
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLengthFraming;

impl Framing for FixedLengthFraming {
    fn write_frame(&self, writer: &mut dyn Write, msg: &AddressedMessage) -> io::Result<()> {
        if msg.payload.len() != FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                ProtocolError::InvalidFrameSize {
                    expected: FRAME_SIZE,
                    actual: msg.payload.len(),
                },
            ));
        }
        writer.write_all(&msg.payload)?;
        writer.flush()
    }

    fn read_frame(&self, reader: &mut dyn Read) -> io::Result<AddressedMessage> {
        let mut buf = [0u8; FRAME_SIZE];
        reader.read_exact(&mut buf)?;
        Ok(AddressedMessage::new(0, 0, Bytes::copy_from_slice(&buf)))
    }
}

const FLAG_COMPLETE: u8 = 0x01;

/// Association framing: each message carries its protocol id, stream id and
/// completion flag ahead of the payload.
///
/// ```text
/// | protocol_id: u32 | stream_id: u16 | flags: u8 | length: u32 | payload |
/// ```
/// All integers are big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssociationFraming;

impl AssociationFraming {
    pub const HEADER_SIZE: usize = 11;
}

impl Framing for AssociationFraming {
    fn write_frame(&self, writer: &mut dyn Write, msg: &AddressedMessage) -> io::Result<()> {
        if msg.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                ProtocolError::FrameTooLarge {
                    size: msg.payload.len(),
                    limit: MAX_FRAME_PAYLOAD,
                },
            ));
        }

        let mut header = [0u8; Self::HEADER_SIZE];
        header[0..4].copy_from_slice(&msg.protocol_id.to_be_bytes());
        header[4..6].copy_from_slice(&msg.stream_id.to_be_bytes());
        header[6] = if msg.is_complete { FLAG_COMPLETE } else { 0 };
        header[7..11].copy_from_slice(&(msg.payload.len() as u32).to_be_bytes());

        // one write per frame so TCP_NODELAY does not split header and payload
        let mut frame = Vec::with_capacity(Self::HEADER_SIZE + msg.payload.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&msg.payload);
        writer.write_all(&frame)?;
        writer.flush()
    }

    fn read_frame(&self, reader: &mut dyn Read) -> io::Result<AddressedMessage> {
        let mut header = [0u8; Self::HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let protocol_id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let stream_id = u16::from_be_bytes([header[4], header[5]]);
        let is_complete = header[6] & FLAG_COMPLETE != 0;
        let len = u32::from_be_bytes([header[7], header[8], header[9], header[10]]) as usize;

        if len > MAX_FRAME_PAYLOAD {
            return Err(invalid_data(ProtocolError::FrameTooLarge {
                size: len,
                limit: MAX_FRAME_PAYLOAD,
            }));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        Ok(AddressedMessage::fragment(
            protocol_id,
            stream_id,
            Bytes::from(payload),
            is_complete,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Probe;
    use std::io::Cursor;

    #[test]
    fn test_fixed_length_frames_drop_addressing() -> io::Result<()> {
        let mut wire = Vec::new();
        let msg = AddressedMessage::new(7, 3, Probe::timestamp(99).to_bytes());
        FixedLengthFraming.write_frame(&mut wire, &msg)?;
        assert_eq!(wire.len(), FRAME_SIZE);

        let read = FixedLengthFraming.read_frame(&mut Cursor::new(wire))?;
        assert_eq!((read.protocol_id, read.stream_id), (0, 0));
        assert_eq!(read.payload, msg.payload);
        Ok(())
    }

    #[test]
    fn test_fixed_length_rejects_other_sizes() {
        let mut wire = Vec::new();
        let msg = AddressedMessage::new(0, 0, Bytes::from_static(b"short"));
        let err = FixedLengthFraming.write_frame(&mut wire, &msg).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_association_frame_layout() -> io::Result<()> {
        let mut wire = Vec::new();
        let msg = AddressedMessage::fragment(0x0102_0304, 0x0506, Bytes::from_static(b"ab"), false);
        AssociationFraming.write_frame(&mut wire, &msg)?;

        assert_eq!(
            wire,
            vec![1, 2, 3, 4, 5, 6, 0, 0, 0, 0, 2, b'a', b'b']
        );
        Ok(())
    }

    #[test]
    fn test_association_frames_back_to_back() -> io::Result<()> {
        let first = AddressedMessage::new(7, 9, Probe::timestamp(1).to_bytes());
        let second = AddressedMessage::fragment(7, 2, Bytes::from_static(b"xyz"), false);

        let mut wire = Vec::new();
        AssociationFraming.write_frame(&mut wire, &first)?;
        AssociationFraming.write_frame(&mut wire, &second)?;

        let mut cursor = Cursor::new(wire);
        assert_eq!(AssociationFraming.read_frame(&mut cursor)?, first);
        assert_eq!(AssociationFraming.read_frame(&mut cursor)?, second);
        assert_eq!(
            AssociationFraming.read_frame(&mut cursor).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
        Ok(())
    }

    #[test]
    fn test_association_rejects_oversized_length() {
        let mut header = vec![0u8; AssociationFraming::HEADER_SIZE];
        header[7..11].copy_from_slice(&u32::MAX.to_be_bytes());
        let err = AssociationFraming
            .read_frame(&mut Cursor::new(header))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
