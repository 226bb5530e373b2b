//! Transport module - TCP socket handling.
//!
//! Provides address normalization, shuffling and bounded-time connects.

mod tcp;

pub use tcp::{connect, normalize_addr, shuffle_addrs, DEFAULT_PORT};
