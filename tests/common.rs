//! Test utilities & fixtures.
//! Recording collaborators plus small harnesses that wire one engine (or two engines over a
//! simulated mesh) to a hand-advanced clock.
#![allow(dead_code)] // Each integration test binary uses a different subset.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshfinder::config::Config;
use meshfinder::finder::host::{ChoicePrompt, Ui};
use meshfinder::finder::{
    Collaborators, FinderEngine, GpsFix, ManualClock, MemoryGps, StaticSensors,
};
use meshfinder::mesh::{
    decode_payload, encode_payload, MeshPacket, NodeId, RequestType, SimMesh, Telemetry,
    Transport, TransportError, FRIEND_FINDER_PORTNUM,
};
use meshfinder::storage::{BlobStore, MemoryBlobStore};

/// Transport that keeps every enqueued packet. Clones share the log.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<MeshPacket>>>,
    fail_alloc: Arc<AtomicBool>,
    local: NodeId,
}

impl RecordingTransport {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            ..Default::default()
        }
    }

    pub fn set_fail_alloc(&self, fail: bool) {
        self.fail_alloc.store(fail, Ordering::Relaxed);
    }

    pub fn packets(&self) -> Vec<MeshPacket> {
        self.sent.lock().unwrap().clone()
    }

    /// Destination and request type of every packet so far.
    pub fn sent(&self) -> Vec<(NodeId, RequestType)> {
        self.packets()
            .iter()
            .map(|p| (p.to, decode_payload(&p.payload).expect("decodable payload").0))
            .collect()
    }

    pub fn count(&self, to: NodeId, kind: RequestType) -> usize {
        self.sent().iter().filter(|s| **s == (to, kind)).count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for RecordingTransport {
    fn alloc(&mut self) -> Result<MeshPacket, TransportError> {
        if self.fail_alloc.load(Ordering::Relaxed) {
            return Err(TransportError::AllocationFailed);
        }
        let id = self.sent.lock().unwrap().len() as u32 + 1;
        Ok(MeshPacket::blank(id, self.local))
    }

    fn enqueue(&mut self, packet: MeshPacket) {
        self.sent.lock().unwrap().push(packet);
    }
}

#[derive(Default)]
struct UiLog {
    banners: Vec<String>,
    prompts: Vec<ChoicePrompt>,
    dismissed: usize,
    redraws: usize,
    regenerations: Vec<bool>,
    pending: bool,
    scripted: VecDeque<bool>,
    auto_answer: Option<bool>,
}

/// UI that records what it was asked to show and answers prompts from a script.
#[derive(Clone, Default)]
pub struct RecordingUi {
    log: Arc<Mutex<UiLog>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every prompt with `answer` once the script is exhausted.
    pub fn auto_answer(self, answer: bool) -> Self {
        self.log.lock().unwrap().auto_answer = Some(answer);
        self
    }

    /// Queue the answer for the next prompt.
    pub fn script(&self, answer: bool) {
        self.log.lock().unwrap().scripted.push_back(answer);
    }

    pub fn banners(&self) -> Vec<String> {
        self.log.lock().unwrap().banners.clone()
    }

    pub fn has_banner(&self, needle: &str) -> bool {
        self.banners().iter().any(|b| b.contains(needle))
    }

    pub fn prompts(&self) -> Vec<ChoicePrompt> {
        self.log.lock().unwrap().prompts.clone()
    }

    pub fn prompt_pending(&self) -> bool {
        self.log.lock().unwrap().pending
    }

    pub fn dismissed(&self) -> usize {
        self.log.lock().unwrap().dismissed
    }

    pub fn redraws(&self) -> usize {
        self.log.lock().unwrap().redraws
    }
}

impl Ui for RecordingUi {
    fn request_redraw(&mut self) {
        self.log.lock().unwrap().redraws += 1;
    }

    fn regenerate_frames(&mut self, focus: bool) {
        self.log.lock().unwrap().regenerations.push(focus);
    }

    fn show_banner(&mut self, text: &str, _duration: Duration) {
        self.log.lock().unwrap().banners.push(text.to_string());
    }

    fn show_choice(&mut self, prompt: &ChoicePrompt) {
        let mut log = self.log.lock().unwrap();
        log.prompts.push(prompt.clone());
        log.pending = true;
    }

    fn dismiss_choice(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.pending = false;
        log.dismissed += 1;
    }

    fn poll_choice(&mut self) -> Option<bool> {
        let mut log = self.log.lock().unwrap();
        if !log.pending {
            return None;
        }
        let answer = log.scripted.pop_front().or(log.auto_answer)?;
        log.pending = false;
        Some(answer)
    }
}

pub fn fix_sf() -> GpsFix {
    GpsFix::from_degrees(37.7749, -122.4194, 9)
}

pub fn telemetry_at(lat: f64, lon: f64) -> Telemetry {
    Telemetry {
        latitude_i: (lat * 1e7).round() as i32,
        longitude_i: (lon * 1e7).round() as i32,
        sats_in_view: 7,
        battery_level: 81,
        time: 1_760_000_000,
    }
}

/// A FriendFinder packet as the router would hand it up.
pub fn packet(from: NodeId, to: NodeId, kind: RequestType, telemetry: &Telemetry) -> MeshPacket {
    let mut p = MeshPacket::blank(0x1000 + from.as_u32(), from);
    p.to = to;
    p.portnum = FRIEND_FINDER_PORTNUM;
    p.payload = encode_payload(kind, telemetry);
    p
}

/// One engine with every collaborator observable from the test.
pub struct Harness {
    pub engine: FinderEngine,
    pub id: NodeId,
    pub clock: ManualClock,
    pub sensors: StaticSensors,
    pub gps: MemoryGps,
    pub transport: RecordingTransport,
    pub ui: RecordingUi,
    pub store: MemoryBlobStore,
    pub config: Config,
}

impl Harness {
    pub fn new(id: NodeId) -> Self {
        Self::with_store(id, MemoryBlobStore::new(), Config::default())
    }

    pub fn with_store(id: NodeId, store: MemoryBlobStore, config: Config) -> Self {
        let clock = ManualClock::new();
        let sensors = StaticSensors::new().with_fix(fix_sf());
        let gps = MemoryGps::new(config.gps.default_interval_secs);
        let transport = RecordingTransport::new(id);
        let ui = RecordingUi::new();
        let engine = build_engine(
            id,
            &config,
            &clock,
            &sensors,
            &gps,
            Box::new(transport.clone()),
            Box::new(ui.clone()),
            Some(Box::new(store.clone())),
        );
        Self {
            engine,
            id,
            clock,
            sensors,
            gps,
            transport,
            ui,
            store,
            config,
        }
    }

    /// Deliver a packet from `from` addressed directly to us.
    pub fn receive(&mut self, from: NodeId, kind: RequestType) {
        let p = packet(from, self.id, kind, &telemetry_at(37.78, -122.41));
        self.engine.on_packet(&p);
    }

    pub fn receive_broadcast(&mut self, from: NodeId, kind: RequestType) {
        let p = packet(from, NodeId::BROADCAST, kind, &telemetry_at(37.78, -122.41));
        self.engine.on_packet(&p);
    }

    /// Pair with `node` through the early-ACCEPT path and forget the traffic it caused.
    pub fn befriend(&mut self, node: NodeId) {
        self.engine.begin_pairing();
        self.receive(node, RequestType::Accept);
        self.ui.script(true);
        self.run_for(self.config.finder.active_tick_ms);
        assert!(self.engine.friends().contains(node), "pairing with {} failed", node);
        self.transport.clear();
    }

    /// Advance the clock in active-tick steps, ticking after each.
    pub fn run_for(&mut self, ms: u64) {
        let step = self.config.finder.active_tick_ms;
        let mut elapsed = 0;
        while elapsed < ms {
            self.clock.advance(step);
            self.engine.tick();
            elapsed += step;
        }
    }

    /// Rebuild the engine over the same store, as after a power cycle.
    pub fn reboot(self) -> Self {
        Self::with_store(self.id, self.store, self.config)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_engine(
    id: NodeId,
    config: &Config,
    clock: &ManualClock,
    sensors: &StaticSensors,
    gps: &MemoryGps,
    transport: Box<dyn Transport>,
    ui: Box<dyn Ui>,
    store: Option<Box<dyn BlobStore>>,
) -> FinderEngine {
    let collaborators = Collaborators {
        transport,
        clock: Box::new(clock.clone()),
        sensors: Box::new(sensors.clone()),
        gps: Box::new(gps.clone()),
        ui,
        store,
    };
    FinderEngine::new(id, config, collaborators).with_seed(u64::from(id.as_u32()))
}

/// One side of a [`MeshPair`].
pub struct MeshNode {
    pub engine: FinderEngine,
    pub id: NodeId,
    pub sensors: StaticSensors,
    pub gps: MemoryGps,
    pub ui: RecordingUi,
}

/// Two engines sharing a clock and a simulated mesh.
pub struct MeshPair {
    pub mesh: SimMesh,
    pub clock: ManualClock,
    pub a: MeshNode,
    pub b: MeshNode,
    pub step_ms: u64,
    /// Every packet the mesh handed to a node, in delivery order.
    pub delivered: Vec<(NodeId, MeshPacket)>,
}

pub const NODE_A: NodeId = NodeId(0x0000_a11c);
pub const NODE_B: NodeId = NodeId(0x0000_b0b0);

impl MeshPair {
    pub fn new(loss: f64, duplicate: f64, seed: u64) -> Self {
        let config = Config::default();
        let mut mesh = SimMesh::new(loss, duplicate, seed);
        let clock = ManualClock::new();
        let a = mesh_node(&mut mesh, NODE_A, &config, &clock, fix_sf());
        let b = mesh_node(
            &mut mesh,
            NODE_B,
            &config,
            &clock,
            GpsFix::from_degrees(37.7790, -122.4130, 7),
        );
        Self {
            mesh,
            clock,
            a,
            b,
            step_ms: config.finder.active_tick_ms,
            delivered: Vec::new(),
        }
    }

    /// One tick on both sides followed by one mesh delivery round.
    pub fn step(&mut self) {
        self.clock.advance(self.step_ms);
        self.a.engine.tick();
        self.b.engine.tick();
        for (to, packet) in self.mesh.deliver() {
            if to == self.a.id {
                self.a.engine.on_packet(&packet);
            } else if to == self.b.id {
                self.b.engine.on_packet(&packet);
            }
            self.delivered.push((to, packet));
        }
    }

    /// How many `kind` packets from `from` reached `to`, directed or broadcast.
    pub fn heard(&self, from: NodeId, to: NodeId, kind: RequestType) -> usize {
        self.delivered
            .iter()
            .filter(|(rx, p)| *rx == to && p.from == from)
            .filter(|(_, p)| matches!(decode_payload(&p.payload), Ok((k, _)) if k == kind))
            .count()
    }

    pub fn run_for(&mut self, ms: u64) {
        let end = self.clock.now() + ms;
        while self.clock.now() < end {
            self.step();
        }
    }

    /// Step until `done` holds or `ms` elapses. Returns whether `done` held.
    pub fn run_until(&mut self, ms: u64, done: impl Fn(&MeshPair) -> bool) -> bool {
        let end = self.clock.now() + ms;
        while self.clock.now() < end {
            self.step();
            if done(self) {
                return true;
            }
        }
        false
    }

    pub fn both_paired(&self) -> bool {
        self.a.engine.friends().contains(self.b.id)
            && self.b.engine.friends().contains(self.a.id)
            && self.a.engine.state().is_idle()
            && self.b.engine.state().is_idle()
    }
}

fn mesh_node(
    mesh: &mut SimMesh,
    id: NodeId,
    config: &Config,
    clock: &ManualClock,
    fix: GpsFix,
) -> MeshNode {
    let sensors = StaticSensors::new().with_fix(fix);
    let gps = MemoryGps::new(config.gps.default_interval_secs);
    let ui = RecordingUi::new().auto_answer(true);
    let engine = build_engine(
        id,
        config,
        clock,
        &sensors,
        &gps,
        Box::new(mesh.attach(id)),
        Box::new(ui.clone()),
        None,
    );
    MeshNode {
        engine,
        id,
        sensors,
        gps,
        ui,
    }
}
