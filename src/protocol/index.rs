//! Receiver-index routing table
//!
//! Maps the random 32-bit receiver index carried by replies back to
//! the in-flight handshake and peer it belongs to. The table holds
//! weak references only; the device's peer collection owns the
//! objects, so an entry whose target was torn down resolves to
//! "not found" rather than dangling.
//!
//! Sharded so concurrent packet-processing paths do not serialize on
//! one lock.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::device::{Handshake, Peer};

const SHARD_COUNT: usize = 16;

/// Non-owning table entry for one in-flight handshake
pub struct IndexEntry {
    peer: Weak<Peer>,
    handshake: Weak<Handshake>,
}

impl IndexEntry {
    /// Build an entry pointing at a peer and its handshake slot
    pub fn new(peer: &Arc<Peer>, handshake: &Arc<Handshake>) -> Self {
        Self {
            peer: Arc::downgrade(peer),
            handshake: Arc::downgrade(handshake),
        }
    }

    fn is_live(&self) -> bool {
        self.peer.strong_count() > 0 && self.handshake.strong_count() > 0
    }
}

/// Concurrent map from receiver index to in-flight handshake
pub struct IndexTable {
    shards: [RwLock<HashMap<u32, IndexEntry>>; SHARD_COUNT],
}

impl IndexTable {
    pub fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| RwLock::new(HashMap::new())),
        }
    }

    fn shard(&self, index: u32) -> &RwLock<HashMap<u32, IndexEntry>> {
        &self.shards[index as usize % SHARD_COUNT]
    }

    /// Store a mapping for a freshly generated index
    ///
    /// Returns `false` without overwriting when a live entry already
    /// holds the index; the caller generates a new random index and
    /// retries. An entry whose referents are gone may be replaced.
    pub fn insert(&self, index: u32, entry: IndexEntry) -> bool {
        let mut shard = self.shard(index).write();
        match shard.get(&index) {
            Some(existing) if existing.is_live() => false,
            _ => {
                shard.insert(index, entry);
                true
            }
        }
    }

    /// Resolve an index to its peer and handshake
    ///
    /// Returns `None` if the index was never inserted, was removed, or
    /// its referents have since been torn down.
    pub fn lookup(&self, index: u32) -> Option<(Arc<Peer>, Arc<Handshake>)> {
        let shard = self.shard(index).read();
        let entry = shard.get(&index)?;
        let peer = entry.peer.upgrade()?;
        let handshake = entry.handshake.upgrade()?;
        Some((peer, handshake))
    }

    /// Drop a mapping; idempotent
    pub fn remove(&self, index: u32) {
        self.shard(index).write().remove(&index);
    }
}

impl Default for IndexTable {
    fn default() -> Self {
        Self::new()
    }
}
