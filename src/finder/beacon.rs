//! Idle-time refresh of every stored friend.
//!
//! While nothing else is going on, each background interval sends one telemetry beacon to
//! every friend so they hold a recent position for us before any session starts.

use log::debug;

use super::friends::FriendStore;
use super::Millis;
use crate::mesh::NodeId;

pub struct BeaconScheduler {
    interval_ms: Millis,
    last_run_ms: Millis,
}

impl BeaconScheduler {
    pub fn new(interval_ms: Millis) -> Self {
        Self {
            interval_ms,
            last_run_ms: 0,
        }
    }

    pub fn last_run_ms(&self) -> Millis {
        self.last_run_ms
    }

    /// Friends to beacon now, in display order. Empty unless the engine is idle, a friend is
    /// stored, we have a fix and the interval has elapsed; a non-empty result starts the
    /// next interval.
    pub fn poll(&mut self, now: Millis, idle: bool, friends: &FriendStore, has_fix: bool) -> Vec<NodeId> {
        if !idle || !has_fix || friends.used_count() == 0 {
            return Vec::new();
        }
        if now.saturating_sub(self.last_run_ms) < self.interval_ms {
            return Vec::new();
        }
        self.last_run_ms = now;
        let targets: Vec<NodeId> = friends.iter_used().map(|r| r.node).collect();
        debug!("Background beacon to {} friend(s)", targets.len());
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finder::friends::EvictionPolicy;

    fn two_friends() -> FriendStore {
        let mut friends = FriendStore::in_memory(EvictionPolicy::OverwriteFirst);
        friends.upsert(NodeId(1), 1, [0; 16]);
        friends.upsert(NodeId(2), 1, [0; 16]);
        friends
    }

    #[test]
    fn fires_for_every_friend_once_per_interval() {
        let friends = two_friends();
        let mut beacon = BeaconScheduler::new(120_000);
        assert!(beacon.poll(119_999, true, &friends, true).is_empty());
        assert_eq!(
            beacon.poll(120_000, true, &friends, true),
            vec![NodeId(1), NodeId(2)]
        );
        assert!(beacon.poll(200_000, true, &friends, true).is_empty());
        assert_eq!(beacon.poll(240_000, true, &friends, true).len(), 2);
    }

    #[test]
    fn needs_idle_fix_and_friends() {
        let friends = two_friends();
        let mut beacon = BeaconScheduler::new(1_000);
        assert!(beacon.poll(5_000, false, &friends, true).is_empty());
        assert!(beacon.poll(5_000, true, &friends, false).is_empty());
        let empty = FriendStore::in_memory(EvictionPolicy::OverwriteFirst);
        assert!(beacon.poll(5_000, true, &empty, true).is_empty());
        assert_eq!(beacon.last_run_ms(), 0);
        assert_eq!(beacon.poll(5_000, true, &friends, true).len(), 2);
    }
}
