//! Length-prefixed framing.
//!
//! Every message on the wire is a 4-byte big-endian body length followed by
//! exactly that many bytes of protobuf body:
//!
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ Length       │ Body                 │
//! │ 4 bytes      │ Length bytes         │
//! │ uint32 BE    │ protobuf message     │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use doozer_client::protocol::{build_frame, FRAME_HEADER_SIZE};
//!
//! let bytes = build_frame(b"hello");
//! assert_eq!(bytes.len(), FRAME_HEADER_SIZE + 5);
//! assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::ProtoCodec;
use crate::error::{DoozerError, Result};

/// Length prefix size in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default maximum body size (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Encode a body length as a frame header.
#[inline]
pub fn encode_length(len: u32) -> [u8; FRAME_HEADER_SIZE] {
    len.to_be_bytes()
}

/// Decode a frame header. Returns `None` if the buffer is too short.
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    let header: [u8; FRAME_HEADER_SIZE] = buf.get(..FRAME_HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(header))
}

/// Build a complete frame from an already-serialized body.
pub fn build_frame(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.put_slice(&encode_length(body.len() as u32));
    buf.put_slice(body);
    buf.freeze()
}

/// Serialize a message and frame it in one buffer.
///
/// Fails if the encoded body would exceed [`DEFAULT_MAX_FRAME_SIZE`].
pub fn frame_message<M: prost::Message>(message: &M) -> Result<Bytes> {
    let len = message.encoded_len();
    if len > DEFAULT_MAX_FRAME_SIZE as usize {
        return Err(DoozerError::Framing(format!(
            "Body size {} exceeds maximum {}",
            len, DEFAULT_MAX_FRAME_SIZE
        )));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + len);
    buf.put_slice(&encode_length(len as u32));
    ProtoCodec::encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, Response, Verb};

    #[test]
    fn test_length_roundtrip() {
        assert_eq!(decode_length(&encode_length(0)), Some(0));
        assert_eq!(decode_length(&encode_length(0xDEAD_BEEF)), Some(0xDEAD_BEEF));
        assert_eq!(encode_length(258), [0, 0, 1, 2]);
    }

    #[test]
    fn test_decode_length_short_buffer() {
        assert_eq!(decode_length(&[0, 0, 1]), None);
        assert_eq!(decode_length(&[]), None);
    }

    #[test]
    fn test_build_frame_empty_body() {
        let frame = build_frame(&[]);
        assert_eq!(&frame[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_frame_message_prefix_matches_body() {
        let mut req = Request::new(Verb::Set)
            .with_path("/foo")
            .with_value("bar")
            .with_rev(0);
        req.tag = Some(17);

        let frame = frame_message(&req).unwrap();
        let len = decode_length(&frame).unwrap() as usize;
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + len);
        assert_eq!(&frame[FRAME_HEADER_SIZE..], &ProtoCodec::encode(&req)[..]);
    }

    #[test]
    fn test_request_frame_read_as_response_keeps_tag() {
        let mut req = Request::new(Verb::Get).with_path("/foo");
        req.tag = Some(1234);

        let frame = frame_message(&req).unwrap();
        let resp: Response = ProtoCodec::decode(&frame[FRAME_HEADER_SIZE..]).unwrap();
        assert_eq!(resp.tag, Some(1234));
    }
}
