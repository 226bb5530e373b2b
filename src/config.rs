//! Client configuration.
//!
//! A [`ClientConfig`] is built from an address list, a `doozer:?ca=...` URI,
//! the `DOOZER_URI` environment variable, or a JSON document. Durations are
//! carried as milliseconds so the JSON form stays flat:
//!
//! ```
//! use doozer_client::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{
//!     "addrs": ["10.0.0.1:8046", "10.0.0.2:8046"],
//!     "request_timeout_ms": 5000
//! }"#).unwrap();
//!
//! assert_eq!(config.request_timeout().as_secs(), 5);
//! assert_eq!(config.connect_rounds, 5);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DoozerError, Result};

/// URI used when neither an explicit URI nor `DOOZER_URI` is given.
pub const DEFAULT_URI: &str =
    "doozer:?ca=127.0.0.1:8046&ca=127.0.0.1:8041&ca=127.0.0.1:8042&ca=127.0.0.1:8043";

/// Environment variable holding the cluster URI.
pub const URI_ENV_VAR: &str = "DOOZER_URI";

/// Default time a caller waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Default per-address connect timeout and initial reconnect backoff.
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(2);

/// Default time a sender waits for the connection to become ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of passes over the address list before giving up.
pub const DEFAULT_CONNECT_ROUNDS: u32 = 5;

/// Default writer channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

const URI_PREFIX: &str = "doozer:?";

/// Connection settings, passed explicitly to every constructor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Node addresses (`host:port`, port defaults to 8046).
    pub addrs: Vec<String>,

    /// Per-address connect timeout. Also the first reconnect backoff.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    /// How long `send` waits for a response.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long a sender waits for the connection to become ready.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Passes over the address list before reconnect gives up.
    #[serde(default = "default_connect_rounds")]
    pub connect_rounds: u32,

    /// Capacity of the per-socket writer channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

fn default_ready_timeout_ms() -> u64 {
    DEFAULT_READY_TIMEOUT.as_millis() as u64
}

fn default_connect_rounds() -> u32 {
    DEFAULT_CONNECT_ROUNDS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl ClientConfig {
    /// Configuration with default timeouts for the given addresses.
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addrs: addrs.into_iter().map(Into::into).collect(),
            connect_timeout_ms: None,
            request_timeout_ms: default_request_timeout_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            connect_rounds: DEFAULT_CONNECT_ROUNDS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Configuration from a `doozer:?ca=host:port&ca=...` URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let config = Self::new(parse_uri(uri)?);
        config.validate()?;
        Ok(config)
    }

    /// Configuration from `DOOZER_URI`, falling back to [`DEFAULT_URI`].
    pub fn from_env() -> Result<Self> {
        match std::env::var(URI_ENV_VAR) {
            Ok(uri) => Self::from_uri(&uri),
            Err(_) => Self::from_uri(DEFAULT_URI),
        }
    }

    /// Configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.addrs.is_empty() {
            return Err(DoozerError::Config("no addresses configured".to_string()));
        }
        if self.connect_rounds == 0 {
            return Err(DoozerError::Config("connect_rounds must be at least 1".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(DoozerError::Config("channel_capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Backoff before the second reconnect round; doubles every round after.
    pub fn initial_backoff(&self) -> Duration {
        self.connect_timeout().unwrap_or(DEFAULT_RETRY_WAIT)
    }
}

/// Extract the node addresses (`ca=` parameters) from a doozer URI.
///
/// ```
/// use doozer_client::config::parse_uri;
///
/// let addrs = parse_uri("doozer:?ca=10.0.0.1:8046&sk=secret&ca=10.0.0.2").unwrap();
/// assert_eq!(addrs, vec!["10.0.0.1:8046", "10.0.0.2"]);
/// ```
pub fn parse_uri(uri: &str) -> Result<Vec<String>> {
    let params = uri
        .strip_prefix(URI_PREFIX)
        .ok_or_else(|| DoozerError::InvalidUri(format!("expected {}... got {:?}", URI_PREFIX, uri)))?;

    let mut addrs = Vec::new();
    for param in params.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = param
            .split_once('=')
            .ok_or_else(|| DoozerError::InvalidUri(format!("parameter without value: {:?}", param)))?;
        if key == "ca" {
            addrs.push(value.to_string());
        }
    }
    Ok(addrs)
}
