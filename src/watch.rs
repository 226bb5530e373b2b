//! Following changes with repeated WAIT requests.
//!
//! ```ignore
//! let mut watch = client.watch("/jobs/**", client.rev().await? + 1).idle_limit(30);
//! while let Some(change) = watch.next().await? {
//!     println!("{} {} -> {}", change.rev(), change.path(), change.value_str());
//! }
//! ```

use tracing::{debug, trace};

use crate::client::Client;
use crate::error::Result;
use crate::protocol::Response;

/// An iterator over changes to paths matching a glob.
///
/// Each [`next`](Self::next) sends one WAIT for the current revision. A
/// change moves the revision past it. A request timeout counts as an idle
/// round and rebases the revision on the server's, so the watch never asks
/// for history the server may have dropped.
pub struct Watch {
    client: Client,
    glob: String,
    rev: i64,
    idle_limit: Option<u32>,
    idle_rounds: u32,
}

impl Watch {
    pub(crate) fn new(client: Client, glob: String, rev: i64) -> Self {
        Self {
            client,
            glob,
            rev,
            idle_limit: None,
            idle_rounds: 0,
        }
    }

    /// End the watch after `rounds` consecutive request timeouts.
    pub fn idle_limit(mut self, rounds: u32) -> Self {
        self.idle_limit = Some(rounds);
        self
    }

    /// Revision the next WAIT asks for.
    pub fn rev(&self) -> i64 {
        self.rev
    }

    /// Glob the watch matches paths against.
    pub fn glob(&self) -> &str {
        &self.glob
    }

    /// Wait for the next change.
    ///
    /// Returns `Ok(None)` once the idle limit is reached. Any error other
    /// than a request timeout ends the watch.
    pub async fn next(&mut self) -> Result<Option<Response>> {
        loop {
            if self.idle_limit.is_some_and(|limit| self.idle_rounds >= limit) {
                debug!(glob = %self.glob, rounds = self.idle_rounds, "Watch idle, stopping");
                return Ok(None);
            }

            match self.client.wait(&self.glob, self.rev).await {
                Ok(change) => {
                    self.rev = change.rev() + 1;
                    self.idle_rounds = 0;
                    return Ok(Some(change));
                }
                Err(e) if e.is_timeout() => {
                    self.idle_rounds += 1;
                    let current = self.client.rev().await?;
                    // Never move backwards.
                    self.rev = self.rev.max(current);
                    trace!(glob = %self.glob, rev = self.rev, idle = self.idle_rounds, "Watch rebased");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
