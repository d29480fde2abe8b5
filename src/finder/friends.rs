//! Bounded friend table.
//!
//! [`MAX_FRIENDS`] fixed slots plus an occupancy bitmap. Display order is a per-record
//! ordinal assigned on insert, so the list a user sees does not depend on which physical
//! slot a record landed in. The whole table is persisted as one fixed-size bincode blob under
//! [`FRIENDS_KEY`]; a blob of any other size is discarded and the table starts empty.
//!
//! Persistence never fails the caller. A read or write error logs a warning and the store
//! carries on in memory only for the rest of the run.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{Millis, MAX_FRIENDS, SECRET_LEN};
use crate::mesh::{NodeId, Telemetry};
use crate::storage::{BlobStore, StorageError};

/// Storage key of the friend table blob.
pub const FRIENDS_KEY: &str = "friends";

/// Serialized size of one [`FriendRecord`] (bincode, fixed-width integers).
pub const RECORD_LEN: usize = 57;

/// Serialized size of the whole table.
pub const TABLE_LEN: usize = RECORD_LEN * MAX_FRIENDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FriendRecord {
    pub node: NodeId,
    pub session_id: u32,
    /// Generated locally and never sent; carries no authentication.
    pub secret: [u8; SECRET_LEN],
    pub used: bool,
    /// Display order; smaller is older.
    pub ordinal: u32,
    /// Last telemetry heard from this friend.
    pub last_data: Telemetry,
    /// When `last_data` arrived (0 if never).
    pub last_heard_ms: Millis,
}

/// What happens when a new friend arrives and every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Replace whatever sits in slot 0 without asking.
    OverwriteFirst,
    /// Refuse the new friend.
    RejectWhenFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted { slot: usize },
    Updated { slot: usize },
    Evicted { slot: usize, previous: NodeId },
    Rejected,
}

pub struct FriendStore {
    slots: [FriendRecord; MAX_FRIENDS],
    occupied: u8,
    next_ordinal: u32,
    policy: EvictionPolicy,
    backend: Option<Box<dyn BlobStore>>,
    dirty: bool,
}

impl FriendStore {
    /// An empty table with no persistence.
    pub fn in_memory(policy: EvictionPolicy) -> Self {
        Self {
            slots: [FriendRecord::default(); MAX_FRIENDS],
            occupied: 0,
            next_ordinal: 1,
            policy,
            backend: None,
            dirty: false,
        }
    }

    /// Load the table from `backend`. Absent, wrongly sized or undecodable blobs give an
    /// empty table; a read error drops the backend.
    pub fn load(backend: Box<dyn BlobStore>, policy: EvictionPolicy) -> Self {
        let mut store = Self::in_memory(policy);
        match backend.read(FRIENDS_KEY) {
            Ok(None) => {
                debug!("No stored friend table, starting empty");
                store.backend = Some(backend);
            }
            Ok(Some(blob)) if blob.len() != TABLE_LEN => {
                warn!(
                    "Friend table size mismatch ({} bytes, expected {}), starting empty",
                    blob.len(),
                    TABLE_LEN
                );
                store.backend = Some(backend);
            }
            Ok(Some(blob)) => {
                match bincode::deserialize::<[FriendRecord; MAX_FRIENDS]>(&blob) {
                    Ok(slots) => store.adopt(slots),
                    Err(e) => warn!("Friend table undecodable ({}), starting empty", e),
                }
                store.backend = Some(backend);
            }
            Err(e) => {
                warn!("Friend table unreadable ({}), running without persistence", e);
            }
        }
        info!("Loaded {} friend(s)", store.used_count());
        store
    }

    /// Take loaded slots, dropping records that could never have been written.
    fn adopt(&mut self, slots: [FriendRecord; MAX_FRIENDS]) {
        for (i, rec) in slots.iter().enumerate() {
            if !rec.used {
                continue;
            }
            if !rec.node.is_addressable() || self.find(rec.node).is_some() {
                warn!("Dropping invalid friend record in slot {} ({})", i, rec.node);
                continue;
            }
            self.slots[i] = *rec;
            self.occupied |= 1 << i;
            self.next_ordinal = self.next_ordinal.max(rec.ordinal.saturating_add(1));
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_some()
    }

    fn is_used(&self, slot: usize) -> bool {
        slot < MAX_FRIENDS && self.occupied & (1 << slot) != 0
    }

    fn first_free(&self) -> Option<usize> {
        (0..MAX_FRIENDS).find(|&i| !self.is_used(i))
    }

    pub fn used_count(&self) -> usize {
        self.occupied.count_ones() as usize
    }

    pub fn is_full(&self) -> bool {
        self.used_count() == MAX_FRIENDS
    }

    /// Physical slot holding `node`.
    pub fn find(&self, node: NodeId) -> Option<usize> {
        (0..MAX_FRIENDS).find(|&i| self.is_used(i) && self.slots[i].node == node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.find(node).is_some()
    }

    pub fn get(&self, node: NodeId) -> Option<&FriendRecord> {
        self.find(node).map(|i| &self.slots[i])
    }

    /// Insert or refresh `node`, then persist.
    pub fn upsert(&mut self, node: NodeId, session_id: u32, secret: [u8; SECRET_LEN]) -> UpsertOutcome {
        if !node.is_addressable() {
            warn!("Refusing to store friend with address {}", node);
            return UpsertOutcome::Rejected;
        }
        let outcome = if let Some(slot) = self.find(node) {
            let rec = &mut self.slots[slot];
            rec.session_id = session_id;
            rec.secret = secret;
            UpsertOutcome::Updated { slot }
        } else if let Some(slot) = self.first_free() {
            self.place(slot, node, session_id, secret);
            UpsertOutcome::Inserted { slot }
        } else {
            match self.policy {
                EvictionPolicy::OverwriteFirst => {
                    let previous = self.slots[0].node;
                    self.place(0, node, session_id, secret);
                    warn!("Friend table full, {} replaced {}", node, previous);
                    UpsertOutcome::Evicted { slot: 0, previous }
                }
                EvictionPolicy::RejectWhenFull => {
                    warn!("Friend table full, not storing {}", node);
                    return UpsertOutcome::Rejected;
                }
            }
        };
        debug!("Friend upsert {}: {:?}", node, outcome);
        self.save();
        outcome
    }

    fn place(&mut self, slot: usize, node: NodeId, session_id: u32, secret: [u8; SECRET_LEN]) {
        self.slots[slot] = FriendRecord {
            node,
            session_id,
            secret,
            used: true,
            ordinal: self.next_ordinal,
            last_data: Telemetry::default(),
            last_heard_ms: 0,
        };
        self.next_ordinal = self.next_ordinal.wrapping_add(1);
        self.occupied |= 1 << slot;
    }

    /// Used records in display order.
    pub fn iter_used(&self) -> impl Iterator<Item = &FriendRecord> {
        let mut used: Vec<&FriendRecord> = (0..MAX_FRIENDS)
            .filter(|&i| self.is_used(i))
            .map(|i| &self.slots[i])
            .collect();
        used.sort_by_key(|r| r.ordinal);
        used.into_iter()
    }

    pub fn get_by_list_index(&self, index: usize) -> Option<&FriendRecord> {
        self.iter_used().nth(index)
    }

    /// Remove the `index`-th friend in display order. Out-of-range indexes are a no-op.
    pub fn remove_by_list_index(&mut self, index: usize) -> Option<FriendRecord> {
        let node = self.get_by_list_index(index)?.node;
        let slot = self.find(node)?;
        let removed = self.slots[slot];
        self.slots[slot] = FriendRecord::default();
        self.occupied &= !(1 << slot);
        info!("Removed friend {}", node);
        self.save();
        Some(removed)
    }

    /// Cache telemetry from a friend. Returns false (and stores nothing) for strangers.
    /// The write is persisted lazily by [`FriendStore::flush_if_dirty`].
    pub fn record_telemetry(&mut self, node: NodeId, telemetry: Telemetry, now: Millis) -> bool {
        let Some(slot) = self.find(node) else {
            return false;
        };
        let rec = &mut self.slots[slot];
        rec.last_data = telemetry;
        rec.last_heard_ms = now;
        self.dirty = true;
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn flush_if_dirty(&mut self) {
        if self.dirty {
            self.save();
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(&self.slots)?)
    }

    fn save(&mut self) {
        if self.backend.is_none() {
            self.dirty = false;
            return;
        }
        let result = self.encode().and_then(|blob| match self.backend.as_mut() {
            Some(backend) => backend.write(FRIENDS_KEY, &blob),
            None => Ok(()),
        });
        match result {
            Ok(()) => {
                self.dirty = false;
                debug!("Saved friend table ({} used)", self.used_count());
            }
            Err(e) => {
                warn!("Failed to save friend table ({}), continuing in memory", e);
                self.backend = None;
                self.dirty = false;
            }
        }
    }
}
