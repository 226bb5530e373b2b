//! Codec module - serialization/deserialization for message bodies.
//!
//! - [`ProtoCodec`] - protobuf using `prost`, matching doozerd's `msg.proto`
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the body format is fixed at compile time.
//!
//! # Example
//!
//! ```
//! use doozer_client::codec::ProtoCodec;
//! use doozer_client::protocol::{Request, Verb};
//!
//! let request = Request::new(Verb::Get).with_path("/foo");
//! let encoded = ProtoCodec::encode(&request);
//! let decoded: Request = ProtoCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded.path(), "/foo");
//! ```

mod protobuf;

pub use protobuf::ProtoCodec;
