//! Pending request table.
//!
//! Maps request tags to in-flight requests. Each entry keeps the framed packet
//! (so it can be retransmitted after a reconnect) and the sending half of a
//! oneshot the caller waits on. Tags are allocated by probing upward from 0
//! for the first value not in the table, so a tag is never shared by two live
//! requests.
//!
//! A caller that gives up on a request already written to the socket does
//! not free its tag: the server still owes a response on it. The entry is
//! marked abandoned and stays until that response arrives (and is dropped)
//! or the socket is replaced.
//!
//! Every operation takes the table lock once; the map itself never leaves
//! this module.
//!
//! ```text
//! send ──register──► [tag → packet, slot, written_on] ◄──resolve── receive loop
//!   ▲                              │
//!   └──────── oneshot::Receiver ◄──┘
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{DoozerError, Result};
use crate::protocol::{frame_message, Request, Response};

/// One in-flight request.
struct PendingEntry {
    /// Framed request bytes.
    packet: Bytes,
    /// Result cell. `None` once resolved.
    slot: Option<oneshot::Sender<Response>>,
    /// Connection generation the packet was last put on.
    written_on: Option<u64>,
    /// The caller gave up after the packet was written.
    abandoned: bool,
}

/// A freshly registered request.
#[derive(Debug)]
pub struct Registration {
    /// Tag stamped on the request.
    pub tag: i32,
    /// Framed request bytes.
    pub packet: Bytes,
    /// Resolves with the matching response.
    pub response: oneshot::Receiver<Response>,
}

/// Table of requests awaiting a response.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<i32, PendingEntry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i32, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a tag, stamp it on `request`, frame it and record it.
    pub fn register(&self, request: &mut Request) -> Result<Registration> {
        let mut entries = self.lock();

        let tag = (0..=i32::MAX)
            .find(|tag| !entries.contains_key(tag))
            .ok_or(DoozerError::TagsExhausted)?;
        request.tag = Some(tag);
        let packet = frame_message(request)?;

        let (tx, rx) = oneshot::channel();
        entries.insert(
            tag,
            PendingEntry {
                packet: packet.clone(),
                slot: Some(tx),
                written_on: None,
                abandoned: false,
            },
        );

        Ok(Registration {
            tag,
            packet,
            response: rx,
        })
    }

    /// Hand a response to the request waiting on its tag.
    ///
    /// Returns `false` if nobody is waiting: the tag is unknown, already
    /// resolved, or its caller has given up. An abandoned entry is removed
    /// here, freeing its tag.
    pub fn resolve(&self, response: Response) -> bool {
        let tag = response.tag();
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&tag) else {
            return false;
        };
        if entry.abandoned {
            entries.remove(&tag);
            return false;
        }
        match entry.slot.take() {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// The caller is done with `tag`.
    ///
    /// A resolved or never written entry is removed and its tag can be reused
    /// at once. An entry still owed a response is kept as abandoned. Returns
    /// whether the tag was freed.
    pub fn release(&self, tag: i32) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&tag) else {
            return false;
        };
        if entry.slot.is_some() && entry.written_on.is_some() {
            entry.slot = None;
            entry.abandoned = true;
            return false;
        }
        entries.remove(&tag);
        true
    }

    /// Mark `tag` as written on `generation`.
    ///
    /// Returns `false` if the entry is gone, resolved, or already on that
    /// generation (a retransmit got there first), in which case the caller
    /// must not write it again.
    pub fn claim(&self, tag: i32, generation: u64) -> bool {
        match self.lock().get_mut(&tag) {
            Some(entry) if entry.slot.is_some() && entry.written_on < Some(generation) => {
                entry.written_on = Some(generation);
                true
            }
            _ => false,
        }
    }

    /// Claim every unresolved entry for `generation` and return their packets.
    ///
    /// Abandoned entries are dropped: a new socket owes them nothing.
    pub fn claim_for_retransmit(&self, generation: u64) -> Vec<(i32, Bytes)> {
        let mut entries = self.lock();
        entries.retain(|_, entry| !entry.abandoned);
        let mut packets: Vec<(i32, Bytes)> = entries
            .iter_mut()
            .filter(|(_, entry)| entry.slot.is_some() && entry.written_on < Some(generation))
            .map(|(tag, entry)| {
                entry.written_on = Some(generation);
                (*tag, entry.packet.clone())
            })
            .collect();
        packets.sort_unstable_by_key(|(tag, _)| *tag);
        packets
    }

    /// Check if `tag` is in the table.
    #[cfg(test)]
    fn contains(&self, tag: i32) -> bool {
        self.lock().contains_key(&tag)
    }

    /// Number of tags in use, abandoned ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Releases an entry when the waiting caller finishes, fails or is dropped.
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingTable,
    tag: i32,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(table: &'a PendingTable, tag: i32) -> Self {
        Self { table, tag }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.release(self.tag);
    }
}
