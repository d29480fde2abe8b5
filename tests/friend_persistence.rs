//! Integration tests for the persisted friend table
//!
//! Restart survival on sled, corrupt or unreadable tables, write failures, and what happens
//! when a ninth friend arrives.

mod common;

use common::*;
use meshfinder::config::Config;
use meshfinder::finder::friends::{FRIENDS_KEY, TABLE_LEN};
use meshfinder::finder::{EvictionPolicy, FriendStore, MAX_FRIENDS};
use meshfinder::mesh::{NodeId, RequestType};
use meshfinder::storage::{MemoryBlobStore, SledBlobStore};
use tempfile::TempDir;

const ME: NodeId = NodeId(0x0000_0a0a);

#[test]
fn test_friends_survive_restart_on_sled() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::default();
    let (a, b) = (NodeId(0x1111), NodeId(0x2222));

    let expected = {
        let store = SledBlobStore::open(temp_dir.path(), "ffinder").unwrap();
        let clock = meshfinder::finder::ManualClock::new();
        let sensors = meshfinder::finder::StaticSensors::new().with_fix(fix_sf());
        let gps = meshfinder::finder::MemoryGps::new(120);
        let transport = RecordingTransport::new(ME);
        let ui = RecordingUi::new();
        let mut engine = build_engine(
            ME,
            &config,
            &clock,
            &sensors,
            &gps,
            Box::new(transport),
            Box::new(ui.clone()),
            Some(Box::new(store)),
        );
        for peer in [a, b] {
            engine.begin_pairing();
            engine.on_packet(&packet(peer, ME, RequestType::Accept, &telemetry_at(37.78, -122.41)));
            ui.script(true);
            clock.advance(50);
            engine.tick();
        }
        assert!(engine.friends().is_persistent());
        engine
            .friends()
            .iter_used()
            .map(|r| (r.node, r.session_id, r.secret))
            .collect::<Vec<_>>()
    };
    assert_eq!(expected.len(), 2);

    let store = SledBlobStore::open(temp_dir.path(), "ffinder").unwrap();
    let reloaded = FriendStore::load(Box::new(store), EvictionPolicy::OverwriteFirst);
    let got: Vec<_> = reloaded
        .iter_used()
        .map(|r| (r.node, r.session_id, r.secret))
        .collect();
    assert_eq!(got, expected);
    assert_eq!(got[0].0, a);
}

#[test]
fn test_removal_and_order_survive_reboot() {
    let mut h = Harness::new(ME);
    for n in [0x1u32, 0x2, 0x3] {
        h.befriend(NodeId(n));
    }
    let removed = h.engine.remove_friend(1).unwrap();
    assert_eq!(removed.node, NodeId(0x2));
    assert!(h.engine.remove_friend(5).is_none());

    let h = h.reboot();
    let nodes: Vec<NodeId> = h.engine.friends().iter_used().map(|r| r.node).collect();
    assert_eq!(nodes, vec![NodeId(0x1), NodeId(0x3)]);
}

#[test]
fn test_wrong_sized_table_starts_empty_and_is_overwritten() {
    let store = MemoryBlobStore::new();
    store.put(FRIENDS_KEY, vec![0xAB; 40]);
    let mut h = Harness::with_store(ME, store, Config::default());

    assert_eq!(h.engine.friends().used_count(), 0);
    assert!(h.engine.friends().is_persistent());

    h.befriend(NodeId(0x42));
    assert_eq!(h.store.get(FRIENDS_KEY).unwrap().len(), TABLE_LEN);
}

#[test]
fn test_unreadable_store_runs_in_memory() {
    let store = MemoryBlobStore::new();
    store.set_fail_reads(true);
    let mut h = Harness::with_store(ME, store, Config::default());

    assert!(!h.engine.friends().is_persistent());
    h.befriend(NodeId(0x42));
    assert!(h.engine.friends().contains(NodeId(0x42)));
    assert!(h.store.get(FRIENDS_KEY).is_none());
}

#[test]
fn test_write_failure_degrades_to_memory() {
    let mut h = Harness::new(ME);
    h.store.set_fail_writes(true);

    h.befriend(NodeId(0x42));

    assert!(h.engine.friends().contains(NodeId(0x42)));
    assert!(!h.engine.friends().is_persistent());
    assert!(h.store.get(FRIENDS_KEY).is_none());
}

#[test]
fn test_ninth_friend_overwrites_slot_zero() {
    let mut h = Harness::new(ME);
    for n in 1..=MAX_FRIENDS as u32 {
        h.befriend(NodeId(n));
    }
    assert!(h.engine.friends().is_full());

    h.befriend(NodeId(0x99));

    assert_eq!(h.engine.friends().used_count(), MAX_FRIENDS);
    assert!(!h.engine.friends().contains(NodeId(1)));
    assert!(h.ui.has_banner(&format!("Friend list full, replaced {}", NodeId(1))));
    // The newcomer is listed last even though it sits in slot 0.
    let last = h.engine.friends().iter_used().last().unwrap().node;
    assert_eq!(last, NodeId(0x99));
}

#[test]
fn test_reject_when_full_keeps_existing_friends() {
    let mut config = Config::default();
    config.finder.eviction = "reject_when_full".to_string();
    let mut h = Harness::with_store(ME, MemoryBlobStore::new(), config);
    for n in 1..=MAX_FRIENDS as u32 {
        h.befriend(NodeId(n));
    }

    h.engine.begin_pairing();
    h.receive(NodeId(0x99), RequestType::Accept);
    h.ui.script(true);
    h.run_for(50);

    assert!(h.engine.state().is_idle());
    assert!(!h.engine.friends().contains(NodeId(0x99)));
    assert!(h.engine.friends().contains(NodeId(1)));
    assert!(h.ui.has_banner("Friend list full"));
}

#[test]
fn test_idle_telemetry_is_written_back_lazily() {
    let mut h = Harness::new(ME);
    h.befriend(NodeId(0x42));
    let saved = h.store.get(FRIENDS_KEY).unwrap();

    h.clock.advance(1_000);
    h.receive(NodeId(0x42), RequestType::None);
    let rec = *h.engine.friends().get(NodeId(0x42)).unwrap();
    assert_eq!(rec.last_heard_ms, h.clock.now());
    assert!(h.engine.friends().is_dirty());
    assert_eq!(h.store.get(FRIENDS_KEY).unwrap(), saved);

    // The next background cycle flushes it.
    h.run_for(120_000);
    assert!(!h.engine.friends().is_dirty());
    assert_ne!(h.store.get(FRIENDS_KEY).unwrap(), saved);
}
