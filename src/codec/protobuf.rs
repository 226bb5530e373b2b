//! Protobuf codec using `prost`.
//!
//! doozerd speaks proto2 with every field `optional`, so unset fields are
//! simply absent from the body and unknown fields are skipped on decode.

use bytes::BufMut;

use crate::error::Result;

/// Protobuf codec for message bodies.
pub struct ProtoCodec;

impl ProtoCodec {
    /// Encode a message to protobuf bytes.
    #[inline]
    pub fn encode<M: prost::Message>(message: &M) -> Vec<u8> {
        message.encode_to_vec()
    }

    /// Encode a message into an existing buffer.
    ///
    /// # Errors
    ///
    /// Returns error if the buffer does not have enough remaining capacity.
    #[inline]
    pub fn encode_into<M: prost::Message, B: BufMut>(message: &M, buf: &mut B) -> Result<()> {
        Ok(message.encode(buf)?)
    }

    /// Decode protobuf bytes to a message.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid encoding of `M`.
    #[inline]
    pub fn decode<M: prost::Message + Default>(bytes: &[u8]) -> Result<M> {
        Ok(M::decode(bytes)?)
    }
}
