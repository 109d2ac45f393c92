//! A `tokio_util::codec` adapter over [`frame::decode_frame`]/[`Frame::encode`],
//! so the connection manager can drive a socket with `Framed<TcpStream, FrameCodec>`
//! the same way the reference host drives `Framed<TcpStream, LinesCodec>`.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{self, DecodeError, Frame};

/// Per-connection codec state. Tracks the last-seen sequence number when
/// `strict_sequencing` is enabled.
#[derive(Debug, Default)]
pub struct FrameCodec {
    last_sequence: Option<u32>,
    strict_sequencing: bool,
}

impl FrameCodec {
    pub fn new(strict_sequencing: bool) -> Self {
        Self {
            last_sequence: None,
            strict_sequencing,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, DecodeError> {
        let last = if self.strict_sequencing {
            self.last_sequence
        } else {
            None
        };
        match frame::decode_frame(src, last)? {
            Some((frame, consumed)) => {
                src.advance(consumed);
                self.last_sequence = Some(frame.sequence);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = DecodeError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), DecodeError> {
        let encoded: Bytes = item.encode();
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;

    #[test]
    fn decoder_buffers_until_a_full_frame_arrives() {
        let frame = Frame::new(0x2001, 1, 0, 1, Bytes::from_static(b"hi"));
        let encoded = frame.encode();

        let mut codec = FrameCodec::new(false);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..encoded.len() - 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[encoded.len() - 2..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn strict_mode_rejects_replayed_sequence() {
        let mut codec = FrameCodec::new(true);
        let mut buf = BytesMut::new();
        let f1 = Frame::new(0x1000, 0, 0, 1, Bytes::new());
        buf.extend_from_slice(&f1.encode());
        assert!(codec.decode(&mut buf).unwrap().is_some());

        let f2 = Frame::new(0x1000, 0, 0, 1, Bytes::new());
        buf.extend_from_slice(&f2.encode());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(DecodeError::BadSequence { .. })
        ));
    }
}
