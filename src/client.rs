//! Client builder and verb-level API.
//!
//! The [`ClientBuilder`] assembles a [`ClientConfig`] and connects. The
//! [`Client`] wraps a shared [`Connection`] with one method per doozerd verb.
//! It is cheap to clone; every clone multiplexes over the same socket.
//!
//! # Example
//!
//! ```ignore
//! use doozer_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .uri("doozer:?ca=127.0.0.1:8046")
//!         .connect()
//!         .await?;
//!
//!     let rev = client.set("/config/mode", "fast", 0).await?;
//!     let entry = client.get("/config/mode", None).await?;
//!     assert_eq!(entry.rev(), rev);
//!
//!     for name in client.getdir("/config", 0, None).await? {
//!         println!("{}", name.path());
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::{ErrorCode, Request, Response, Verb};
use crate::watch::Watch;

/// Builder for configuring and connecting a [`Client`].
///
/// Addresses come from [`addrs`](Self::addrs), else [`uri`](Self::uri), else
/// the `DOOZER_URI` environment variable, else the localhost default.
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    uri: Option<String>,
    addrs: Option<Vec<String>>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    ready_timeout: Option<Duration>,
    connect_rounds: Option<u32>,
    channel_capacity: Option<usize>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read addresses from a `doozer:?ca=host:port&ca=...` URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Use these addresses (`host` or `host:port`).
    pub fn addrs<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addrs = Some(addrs.into_iter().map(Into::into).collect());
        self
    }

    /// Set the per-address connect timeout. Also the first reconnect backoff.
    ///
    /// Default: 2 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set how long a request waits for its response.
    ///
    /// Default: 2 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set how long a request waits for the connection to become ready.
    ///
    /// Default: 2 seconds
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// Set the number of passes over the address list before giving up.
    ///
    /// Default: 5
    pub fn connect_rounds(mut self, rounds: u32) -> Self {
        self.connect_rounds = Some(rounds);
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Resolve the final configuration without connecting.
    pub fn build_config(self) -> Result<ClientConfig> {
        let mut config = match (self.addrs, self.uri) {
            (Some(addrs), _) => ClientConfig::new(addrs),
            (None, Some(uri)) => ClientConfig::from_uri(&uri)?,
            (None, None) => ClientConfig::from_env()?,
        };

        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout_ms = Some(timeout.as_millis() as u64);
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(timeout) = self.ready_timeout {
            config.ready_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(rounds) = self.connect_rounds {
            config.connect_rounds = rounds;
        }
        if let Some(capacity) = self.channel_capacity {
            config.channel_capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }

    /// Build the client and connect to the first reachable address.
    pub async fn connect(self) -> Result<Client> {
        Client::connect_with(self.build_config()?).await
    }
}

/// One step of a GETDIR or WALK listing.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    /// The entry at the requested offset.
    Entry(Response),
    /// The offset is past the last entry.
    End,
}

/// A doozerd client.
#[derive(Clone)]
pub struct Client {
    connection: Arc<Connection>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect with an explicit configuration.
    pub async fn connect_with(config: ClientConfig) -> Result<Self> {
        let connection = Connection::new(config)?;
        connection.connect().await?;
        Ok(Self {
            connection: Arc::new(connection),
        })
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Reconnect after a [`disconnect`](Self::disconnect).
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Close the socket. Pending requests are resent on the next connect.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    /// Current revision of the tree.
    pub async fn rev(&self) -> Result<i64> {
        let response = self.connection.send(Request::new(Verb::Rev), true).await?;
        Ok(response.rev())
    }

    /// Write `value` at `path` if the file is still at `rev`, returning the
    /// new revision.
    ///
    /// `rev` 0 only succeeds for a path that does not exist yet, and -1
    /// overwrites unconditionally. Never retried after a failed write.
    pub async fn set(&self, path: &str, value: impl Into<Vec<u8>>, rev: i64) -> Result<i64> {
        let request = Request::new(Verb::Set)
            .with_path(path)
            .with_value(value)
            .with_rev(rev);
        let response = self.connection.send(request, false).await?;
        Ok(response.rev())
    }

    /// Read `path` at `rev`, or at the current revision.
    pub async fn get(&self, path: &str, rev: Option<i64>) -> Result<Response> {
        let request = with_optional_rev(Request::new(Verb::Get).with_path(path), rev);
        self.connection.send(request, true).await
    }

    /// Delete `path` if it is still at `rev`. Never retried after a failed
    /// write.
    pub async fn delete(&self, path: &str, rev: i64) -> Result<()> {
        let request = Request::new(Verb::Del).with_path(path).with_rev(rev);
        self.connection.send(request, false).await?;
        Ok(())
    }

    /// Wait for the first change at or after `rev` to a path matching the
    /// glob `path`.
    pub async fn wait(&self, path: &str, rev: i64) -> Result<Response> {
        let request = Request::new(Verb::Wait).with_path(path).with_rev(rev);
        self.connection.send(request, true).await
    }

    /// Length and revision of `path`.
    pub async fn stat(&self, path: &str, rev: Option<i64>) -> Result<Response> {
        let request = with_optional_rev(Request::new(Verb::Stat).with_path(path), rev);
        self.connection.send(request, true).await
    }

    /// Authenticate with the cluster secret.
    pub async fn access(&self, secret: impl Into<Vec<u8>>) -> Result<()> {
        let request = Request::new(Verb::Access).with_value(secret);
        self.connection.send(request, true).await?;
        Ok(())
    }

    /// Round-trip a NOP.
    pub async fn nop(&self) -> Result<()> {
        self.connection.send(Request::new(Verb::Nop), true).await?;
        Ok(())
    }

    /// Name of the `offset`-th entry of directory `path`.
    pub async fn getdir_page(&self, path: &str, offset: i32, rev: Option<i64>) -> Result<Page> {
        self.page(Verb::Getdir, path, offset, rev).await
    }

    /// The `offset`-th file under the glob `path`.
    pub async fn walk_page(&self, path: &str, offset: i32, rev: Option<i64>) -> Result<Page> {
        self.page(Verb::Walk, path, offset, rev).await
    }

    /// Every entry of directory `path` from `offset` on.
    pub async fn getdir(&self, path: &str, offset: i32, rev: Option<i64>) -> Result<Vec<Response>> {
        self.list(Verb::Getdir, path, offset, rev).await
    }

    /// Every file under the glob `path` from `offset` on.
    pub async fn walk(&self, path: &str, offset: i32, rev: Option<i64>) -> Result<Vec<Response>> {
        self.list(Verb::Walk, path, offset, rev).await
    }

    /// Follow changes to paths matching `path`, starting at `rev`.
    pub fn watch(&self, path: impl Into<String>, rev: i64) -> Watch {
        Watch::new(self.clone(), path.into(), rev)
    }

    async fn page(&self, verb: Verb, path: &str, offset: i32, rev: Option<i64>) -> Result<Page> {
        let request = with_optional_rev(Request::new(verb).with_path(path).with_offset(offset), rev);
        match self.connection.send(request, true).await {
            Ok(response) => Ok(Page::Entry(response)),
            Err(e) if e.code() == Some(ErrorCode::Range) => Ok(Page::End),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, verb: Verb, path: &str, mut offset: i32, rev: Option<i64>) -> Result<Vec<Response>> {
        let mut entries = Vec::new();
        loop {
            match self.page(verb, path, offset, rev).await? {
                Page::Entry(response) => {
                    entries.push(response);
                    offset += 1;
                }
                Page::End => return Ok(entries),
            }
        }
    }
}

fn with_optional_rev(request: Request, rev: Option<i64>) -> Request {
    match rev {
        Some(rev) => request.with_rev(rev),
        None => request,
    }
}
