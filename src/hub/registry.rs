//! Live-connection registry and fan-out broadcast.
//!
//! One `Registry` exists per hub process. Insertion, removal, the
//! daemon listing and broadcast iteration all run under the same lock,
//! so a broadcast always sees a consistent snapshot of the currently
//! registered daemons.

use crate::protocol::WireMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outbound queue depth per connection.
pub const SEND_QUEUE_DEPTH: usize = 32;

/// Server-side record of one live daemon connection.
///
/// The entry does not own the socket; it owns the sending half of the
/// connection's outbound queue. The writer task draining that queue is
/// the only writer on the socket, which serializes all writes per
/// connection.
pub struct ConnectionEntry {
    /// Monotonic registration number, an ordering and debugging aid
    pub sequence: u64,
    /// Unique identity among live entries
    pub identity: String,
    sender: mpsc::Sender<WireMessage>,
}

/// Ordered collection of live connections.
pub struct Registry {
    entries: Mutex<Vec<ConnectionEntry>>,
    next_sequence: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Register a connection under `requested_id`, de-duplicating the
    /// identity against live entries. Returns the assigned sequence
    /// number and the (possibly suffixed) final identity. Registration
    /// never rejects: the protocol favors availability over strict
    /// identity.
    pub fn register(
        &self,
        requested_id: &str,
        sender: mpsc::Sender<WireMessage>,
    ) -> (u64, String) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let mut identity = requested_id.to_string();
        if entries.iter().any(|e| e.identity == identity) {
            identity = format!("{identity}-{}", Uuid::new_v4());
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        entries.push(ConnectionEntry {
            sequence,
            identity: identity.clone(),
            sender,
        });
        debug!("current daemon subscribers: {}", entries.len());
        (sequence, identity)
    }

    /// Drop the entry for `sequence`; returns the remaining count.
    pub fn remove(&self, sequence: u64) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| e.sequence != sequence);
        entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fan the message out to every entry except the one whose
    /// identity matches `msg.user_id` (the originator).
    ///
    /// Per-recipient sends are non-blocking: a recipient whose queue
    /// is full loses this delivery instead of stalling the fan-out
    /// behind a slow peer.
    pub fn broadcast(&self, msg: &WireMessage) {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for entry in entries.iter() {
            if entry.identity == msg.user_id {
                continue;
            }
            match entry.sender.try_send(msg.clone()) {
                Ok(()) => debug!("send message to: {}", entry.identity),
                Err(e) => warn!("failed to send to {}: {e}", entry.identity),
            }
        }
    }

    /// Tab-separated listing of live entries in registration order.
    pub fn list_table(&self) -> String {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut table = String::from("id\tname\n");
        for entry in entries.iter() {
            table.push_str(&format!("{}\t{}\n", entry.sequence, entry.identity));
        }
        table
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
