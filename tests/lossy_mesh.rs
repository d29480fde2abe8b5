//! Integration tests over an unreliable mesh
//!
//! Pairing and sessions must converge with loss, duplication and reordering, and an engine
//! must keep running when its router link goes away.

mod common;

use common::*;
use meshfinder::config::Config;
use meshfinder::finder::{ManualClock, MemoryGps, StaticSensors};
use meshfinder::mesh::{decode_payload, ChannelTransport, NodeId, RequestType, DISCOVERY_HOP_LIMIT};
use meshfinder::metrics;
use tokio::sync::mpsc;

/// Both users keep pressing Pair until it works, as they would in the field.
fn pair_with_retries(pair: &mut MeshPair, attempts: usize) -> bool {
    for _ in 0..attempts {
        pair.a.engine.begin_pairing();
        pair.run_for(300);
        pair.b.engine.begin_pairing();
        if pair.run_until(32_000, MeshPair::both_paired) {
            return true;
        }
    }
    false
}

#[test]
fn test_pairing_converges_under_loss_and_duplication() {
    for seed in 1..=3 {
        let mut pair = MeshPair::new(0.2, 0.1, seed);
        assert!(pair_with_retries(&mut pair, 10), "seed {} never paired", seed);
        assert_eq!(pair.a.engine.friends().used_count(), 1);
        assert_eq!(pair.b.engine.friends().used_count(), 1);
        let stats = pair.mesh.stats();
        assert!(stats.sent > 0);
        assert!(stats.delivered + stats.dropped >= stats.sent);
    }
}

#[test]
fn test_session_survives_loss_and_duplicates() {
    let mut pair = MeshPair::new(0.0, 0.2, 11);
    assert!(pair_with_retries(&mut pair, 3));
    pair.mesh.set_loss(0.3);

    pair.a.engine.start_tracking(NODE_B);
    pair.b.engine.start_tracking(NODE_A);
    pair.run_for(300_000);

    for node in [&pair.a, &pair.b] {
        assert_eq!(node.engine.state().name(), "TrackingTarget");
        assert!(node.engine.power().is_boosted());
        let live = node.engine.live_telemetry().unwrap();
        let heard = live.received_at_ms.expect("heard from the peer at least once");
        assert!(pair.clock.now() - heard < 120_000);
    }

    // A lost END_SESSION leaves the peer tracking; its own end still restores GPS.
    pair.mesh.set_loss(1.0);
    pair.a.engine.end_session(true);
    pair.run_for(1_000);
    assert!(pair.a.engine.state().is_idle());
    assert_eq!(pair.b.engine.state().name(), "TrackingTarget");
    pair.b.engine.end_session(true);
    assert_eq!(pair.a.gps.interval(), 120);
    assert_eq!(pair.b.gps.interval(), 120);
}

#[test]
fn test_end_session_reaches_peer_on_clean_link() {
    let mut pair = MeshPair::new(0.0, 0.0, 5);
    assert!(pair_with_retries(&mut pair, 1));
    pair.a.engine.start_tracking(NODE_B);
    pair.b.engine.start_tracking(NODE_A);
    pair.run_for(1_000);

    pair.a.engine.end_session(true);
    pair.run_for(100);

    assert!(pair.a.engine.state().is_idle());
    assert!(pair.b.engine.state().is_idle());
    assert!(pair.b.ui.has_banner("Session ended by peer"));
    assert!(!pair.b.engine.power().is_boosted());
}

#[test]
fn test_channel_transport_feeds_router_and_survives_closed_link() {
    tokio_test::block_on(async {
        let me = NodeId(0x0000_0c0c);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = Config::default();
        let clock = ManualClock::new();
        let mut engine = build_engine(
            me,
            &config,
            &clock,
            &StaticSensors::new(),
            &MemoryGps::new(120),
            Box::new(ChannelTransport::new(me, tx)),
            Box::new(RecordingUi::new()),
            None,
        );

        engine.begin_pairing();
        let packet = rx.recv().await.expect("discovery packet");
        assert_eq!(packet.from, me);
        assert_eq!(packet.to, NodeId::BROADCAST);
        assert_eq!(packet.hop_limit, DISCOVERY_HOP_LIMIT);
        assert_ne!(packet.id, 0);
        let (kind, telemetry) = decode_payload(&packet.payload).unwrap();
        assert_eq!(kind, RequestType::Request);
        assert!(!telemetry.has_position(), "no fix is sent as 0,0");

        drop(rx);
        let failures = metrics::snapshot().send_failures;
        clock.advance(5_000);
        engine.tick();
        assert!(metrics::snapshot().send_failures > failures);
        assert_eq!(engine.state().name(), "Discovering");
    });
}
