//! Frame layout and pure encode/decode over byte buffers, independent of
//! any I/O framework. [`codec`] wraps this for use with `tokio_util`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use gw_common::error::{ErrorKind, GatewayError};

/// `"GW"` as a big-endian u16.
pub const MAGIC: u16 = 0x4757;
/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 28;
/// Maximum total frame size (header + payload), per the wire contract.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// A decoded wire frame. `payload` is opaque to the codec; its shape is
/// determined by `msg_type`'s registry entry (JSON or protobuf).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub msg_type: u16,
    pub player_id_hint: u64,
    pub timestamp_ms: u64,
    pub sequence: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(msg_type: u16, player_id_hint: u64, timestamp_ms: u64, sequence: u32, payload: Bytes) -> Self {
        Self {
            msg_type,
            player_id_hint,
            timestamp_ms,
            sequence,
            payload,
        }
    }

    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encode this frame into a fresh buffer. Encode is always whole-message;
    /// callers never emit a partial frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_len());
        buf.put_u16(MAGIC);
        buf.put_u32(self.total_len() as u32);
        buf.put_u16(self.msg_type);
        buf.put_u64(self.player_id_hint);
        buf.put_u64(self.timestamp_ms);
        buf.put_u32(self.sequence);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum DecodeError {
    #[error("frame magic mismatch")]
    BadMagic,
    #[error("frame length {0} exceeds maximum of {MAX_FRAME_LEN}")]
    OversizeFrame(usize),
    #[error("buffer shorter than declared frame length")]
    ShortRead,
    #[error("sequence {got} is not greater than last seen sequence {last}")]
    BadSequence { last: u32, got: u32 },
}

impl GatewayError for DecodeError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}

/// Decode a single frame from the front of `buf`, if a complete frame is
/// present. Returns `Ok(None)` when more bytes are needed (not an error —
/// the caller should read more and retry). Never allocates the payload
/// before the oversize check has passed.
///
/// `last_sequence`, when `Some`, enforces strict per-connection monotonic
/// sequencing (`BadSequence` on non-increasing values).
pub fn decode_frame(
    buf: &[u8],
    last_sequence: Option<u32>,
) -> Result<Option<(Frame, usize)>, DecodeError> {
    if buf.len() < 6 {
        return Ok(None);
    }
    let mut header = &buf[..6];
    let magic = header.get_u16();
    if magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let total_length = header.get_u32() as usize;
    if total_length > MAX_FRAME_LEN {
        return Err(DecodeError::OversizeFrame(total_length));
    }
    if total_length < HEADER_LEN {
        // A length header that can't even cover the fixed header is
        // malformed the same way a bad magic is: reject immediately
        // rather than waiting for more bytes that won't fix it.
        return Err(DecodeError::ShortRead);
    }
    if buf.len() < total_length {
        return Ok(None);
    }

    let mut rest = &buf[6..HEADER_LEN];
    let msg_type = rest.get_u16();
    let player_id_hint = rest.get_u64();
    let timestamp_ms = rest.get_u64();
    let sequence = rest.get_u32();

    if let Some(last) = last_sequence {
        if sequence <= last {
            return Err(DecodeError::BadSequence {
                last,
                got: sequence,
            });
        }
    }

    let payload = Bytes::copy_from_slice(&buf[HEADER_LEN..total_length]);
    let frame = Frame::new(msg_type, player_id_hint, timestamp_ms, sequence, payload);
    Ok(Some((frame, total_length)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u32) -> Frame {
        Frame::new(0x2001, 42, 1_700_000_000_000, seq, Bytes::from_static(b"{}"))
    }

    #[test]
    fn decode_of_encode_round_trips() {
        let frame = sample(1);
        let encoded = frame.encode();
        let (decoded, consumed) = decode_frame(&encoded, None).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn short_buffer_requests_more_data() {
        let frame = sample(1);
        let encoded = frame.encode();
        let partial = &encoded[..encoded.len() - 1];
        assert_eq!(decode_frame(partial, None), Ok(None));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut encoded = sample(1).encode().to_vec();
        encoded[0] = 0xFF;
        assert_eq!(decode_frame(&encoded, None), Err(DecodeError::BadMagic));
    }

    #[test]
    fn oversize_length_is_rejected_without_allocating_payload() {
        let mut buf = BytesMut::new();
        buf.put_u16(MAGIC);
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        // Header is deliberately incomplete: OversizeFrame must trigger
        // purely from the length field, before more bytes arrive.
        assert_eq!(
            decode_frame(&buf, None),
            Err(DecodeError::OversizeFrame(MAX_FRAME_LEN + 1))
        );
    }

    #[test]
    fn non_monotonic_sequence_is_rejected_in_strict_mode() {
        let frame = sample(5);
        let encoded = frame.encode();
        assert_eq!(
            decode_frame(&encoded, Some(5)),
            Err(DecodeError::BadSequence { last: 5, got: 5 })
        );
        assert!(decode_frame(&encoded, Some(4)).unwrap().is_some());
    }
}
