//! TCP socket setup for doozerd nodes.
//!
//! # Example
//!
//! ```ignore
//! use doozer_client::transport::{connect, normalize_addr};
//! use std::time::Duration;
//!
//! let addr = normalize_addr("127.0.0.1");
//! assert_eq!(addr, "127.0.0.1:8046");
//! let stream = connect(&addr, Duration::from_secs(2)).await?;
//! ```

use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::net::TcpStream;

use crate::error::{DoozerError, Result};

/// Port used when an address has none.
pub const DEFAULT_PORT: u16 = 8046;

/// Append the default port to `host` if it carries none.
pub fn normalize_addr(addr: &str) -> String {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => addr.to_string(),
        _ => format!("{}:{}", addr.trim_end_matches(':'), DEFAULT_PORT),
    }
}

/// Shuffle addresses in place so clients spread over the cluster.
pub fn shuffle_addrs(addrs: &mut [String]) {
    addrs.shuffle(&mut rand::thread_rng());
}

/// Open a TCP connection, giving up after `timeout`.
///
/// Nagle is disabled: requests are small and latency-bound.
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(DoozerError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", addr, timeout),
            )))
        }
    };

    stream.set_nodelay(true)?;
    Ok(stream)
}
