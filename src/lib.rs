//! # doozer-client
//!
//! Async Rust client for the doozerd coordination service.
//!
//! Every caller shares one TCP connection. Requests are tagged, written
//! through a per-socket writer task and matched to their responses by a
//! background receive loop, so any number of tasks can have requests in
//! flight at once.
//!
//! ## Architecture
//!
//! - **Protocol**: `[u32 BE length][protobuf body]` frames, doozerd `msg.proto`
//! - **Pending table**: tag allocation and result slots for in-flight requests
//! - **Connection**: shuffled addresses, reconnect with doubling backoff,
//!   retransmission of pending requests onto the new socket
//! - **Client**: one method per verb, paginated listings, watches
//!
//! ## Example
//!
//! ```ignore
//! use doozer_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> doozer_client::Result<()> {
//!     let client = Client::builder()
//!         .addrs(["127.0.0.1:8046", "127.0.0.1:8041"])
//!         .connect()
//!         .await?;
//!
//!     let rev = client.set("/hello", "world", 0).await?;
//!     let hello = client.get("/hello", Some(rev)).await?;
//!     println!("{}", hello.value_str());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod pending;
pub mod protocol;
pub mod transport;

mod client;
mod watch;
mod writer;

pub use client::{Client, ClientBuilder, Page};
pub use config::ClientConfig;
pub use connection::Connection;
pub use error::{DoozerError, ResponseError, Result};
pub use protocol::{ErrorCode, Request, Response, Verb};
pub use watch::Watch;
