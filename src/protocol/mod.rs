//! Protocol module - messages, framing, and frame extraction.
//!
//! - Request/response messages matching doozerd's `msg.proto`
//! - 4-byte length-prefix framing
//! - Frame buffer for accumulating partial reads

mod frame;
mod frame_buffer;
mod message;

pub use frame::{
    build_frame, decode_length, encode_length, frame_message, DEFAULT_MAX_FRAME_SIZE,
    FRAME_HEADER_SIZE,
};
pub use frame_buffer::FrameBuffer;
pub use message::{flags, ErrorCode, Request, Response, Verb};
