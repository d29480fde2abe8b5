//! The engine object: one state register, the friend table, the power controller, and the
//! collaborators every effect is applied to.
//!
//! The engine is owned by its host and driven from a single thread of control. Ticks and
//! inbound packets are never processed concurrently, so nothing in here locks.

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::beacon::BeaconScheduler;
use super::dispatch;
use super::friends::{FriendRecord, FriendStore, UpsertOutcome};
use super::host::{ChoicePrompt, Clock, GpsControl, Sensors, Ui};
use super::power::PowerModeController;
use super::session::LiveTelemetry;
use super::state::{transition, Context, Effect, EngineState, Event, Transition};
use super::view::SessionView;
use super::{Millis, Timing, SECRET_LEN};
use crate::config::Config;
use crate::mesh::{MeshPacket, NodeId, RequestType, Transport};
use crate::metrics;
use crate::storage::BlobStore;

/// Everything the engine talks to. `store: None` runs without persistence.
pub struct Collaborators {
    pub transport: Box<dyn Transport>,
    pub clock: Box<dyn Clock>,
    pub sensors: Box<dyn Sensors>,
    pub gps: Box<dyn GpsControl>,
    pub ui: Box<dyn Ui>,
    pub store: Option<Box<dyn BlobStore>>,
}

/// Host-facing summary of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: &'static str,
    pub target: Option<NodeId>,
    pub candidate: Option<NodeId>,
    pub window_remaining_secs: Option<u64>,
    pub friends: usize,
    pub gps_boosted: bool,
    pub gps_interval_secs: u32,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)?;
        if let Some(t) = self.target {
            write!(f, " target={}", t)?;
        }
        if let Some(c) = self.candidate {
            write!(f, " candidate={}", c)?;
        }
        if let Some(secs) = self.window_remaining_secs {
            write!(f, " window={}s", secs)?;
        }
        write!(
            f,
            " friends={} gps={}s{}",
            self.friends,
            self.gps_interval_secs,
            if self.gps_boosted { " (boosted)" } else { "" }
        )
    }
}

pub struct FinderEngine {
    self_id: NodeId,
    timing: Timing,
    imperial: bool,
    state: EngineState,
    friends: FriendStore,
    power: PowerModeController,
    beacon: BeaconScheduler,
    live: Option<LiveTelemetry>,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    sensors: Box<dyn Sensors>,
    ui: Box<dyn Ui>,
    rng: StdRng,
}

impl FinderEngine {
    pub fn new(self_id: NodeId, config: &Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            transport,
            clock,
            sensors,
            gps,
            ui,
            store,
        } = collaborators;
        let policy = config.finder.eviction_policy();
        let friends = match store {
            Some(backend) => FriendStore::load(backend, policy),
            None => FriendStore::in_memory(policy),
        };
        let timing = Timing::from_config(&config.finder);
        info!(
            "Friend finder {} ready ({} friend(s), persistence {})",
            self_id,
            friends.used_count(),
            if friends.is_persistent() { "on" } else { "off" }
        );
        Self {
            self_id,
            timing,
            imperial: config.finder.imperial(),
            state: EngineState::Idle,
            friends,
            power: PowerModeController::new(gps, &config.gps),
            beacon: BeaconScheduler::new(timing.background_interval_ms),
            live: None,
            transport,
            clock,
            sensors,
            ui,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic session ids and secrets.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn friends(&self) -> &FriendStore {
        &self.friends
    }

    pub fn power(&self) -> &PowerModeController {
        &self.power
    }

    pub fn live_telemetry(&self) -> Option<&LiveTelemetry> {
        self.live.as_ref()
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn begin_pairing(&mut self) {
        self.apply(Event::BeginPairing);
    }

    pub fn cancel(&mut self) {
        self.apply(Event::Cancel);
    }

    pub fn answer_prompt(&mut self, accept: bool) {
        self.apply(Event::AnswerPrompt(accept));
    }

    pub fn start_tracking(&mut self, node: NodeId) {
        self.apply(Event::StartTracking(node));
    }

    pub fn end_session(&mut self, notify_peer: bool) {
        self.apply(Event::EndSession { notify_peer });
    }

    /// Forget the `index`-th friend in list order. Out-of-range indexes do nothing.
    pub fn remove_friend(&mut self, index: usize) -> Option<FriendRecord> {
        let removed = self.friends.remove_by_list_index(index);
        if removed.is_some() {
            self.ui.regenerate_frames(false);
        }
        removed
    }

    /// Feed one packet from the router.
    pub fn on_packet(&mut self, packet: &MeshPacket) {
        if let Some(msg) = dispatch::filter(packet, self.self_id) {
            self.apply(Event::Inbound(msg));
        }
    }

    /// Advance timers. Returns how long the host should wait before the next tick.
    pub fn tick(&mut self) -> Duration {
        if matches!(self.state, EngineState::AwaitingConfirmation { .. }) {
            if let Some(accept) = self.ui.poll_choice() {
                self.apply(Event::AnswerPrompt(accept));
            }
        }
        self.apply(Event::Tick);
        self.run_background();
        self.next_tick()
    }

    pub fn next_tick(&self) -> Duration {
        let ms = if self.state.is_idle() {
            self.timing.idle_tick_ms
        } else {
            self.timing.active_tick_ms
        };
        Duration::from_millis(ms)
    }

    pub fn status(&self) -> EngineStatus {
        let now = self.clock.now_ms();
        EngineStatus {
            state: self.state.name(),
            target: self.state.target(),
            candidate: self.state.candidate(),
            window_remaining_secs: self.state.window().map(|w| w.remaining_secs(now)),
            friends: self.friends.used_count(),
            gps_boosted: self.power.is_boosted(),
            gps_interval_secs: self.power.current_interval(),
        }
    }

    /// Session page model, while a session is live.
    pub fn session_view(&self) -> Option<SessionView> {
        let peer = self.state.session_target()?;
        Some(SessionView::build(
            peer,
            self.sensors.gps_fix(),
            self.live.as_ref(),
            self.sensors.heading_degrees(),
            self.clock.now_ms(),
            self.imperial,
        ))
    }

    fn apply(&mut self, event: Event) {
        let now = self.clock.now_ms();
        let state = std::mem::replace(&mut self.state, EngineState::Idle);
        let before = state.name();
        let Transition { next, effects } = {
            let ctx = Context {
                now,
                self_id: self.self_id,
                timing: &self.timing,
                friends: &self.friends,
            };
            transition(state, event, &ctx)
        };
        if next.name() != before {
            info!("State {} -> {}", before, next.name());
        }
        self.state = next;
        for effect in effects {
            self.execute(effect, now);
        }
    }

    fn execute(&mut self, effect: Effect, now: Millis) {
        match effect {
            Effect::Send { to, kind, hop_limit } => self.send(to, kind, hop_limit),
            Effect::SaveFriend(node) => self.save_friend(node),
            Effect::RecordTelemetry { from, telemetry } => {
                self.friends.record_telemetry(from, telemetry, now);
            }
            Effect::UpdateLive { from, telemetry } => {
                self.live = Some(LiveTelemetry {
                    peer: from,
                    data: telemetry,
                    received_at_ms: Some(now),
                });
            }
            Effect::SeedLiveFromFriend(node) => {
                self.live = self.friends.get(node).map(|rec| LiveTelemetry {
                    peer: node,
                    data: rec.last_data,
                    received_at_ms: (rec.last_heard_ms != 0).then_some(rec.last_heard_ms),
                });
            }
            Effect::ClearLive => self.live = None,
            Effect::PersistFriends => self.friends.flush_if_dirty(),
            Effect::BoostGps => self.power.activate_high_gps_mode(),
            Effect::RestoreGps => self.power.restore_normal_gps_mode(),
            Effect::Banner { text, millis } => {
                self.ui.show_banner(&text, Duration::from_millis(millis))
            }
            Effect::Prompt(candidate) => {
                let timeout = Duration::from_millis(self.timing.confirm_timeout_ms);
                self.ui.show_choice(&ChoicePrompt::pairing(candidate, timeout));
            }
            Effect::DismissPrompt => self.ui.dismiss_choice(),
            Effect::RegenerateFrames { focus } => self.ui.regenerate_frames(focus),
            Effect::Redraw => self.ui.request_redraw(),
            Effect::PairingComplete(node) => {
                metrics::inc_pairings_completed();
                info!("Paired with {}", node);
            }
            Effect::SessionStarted(node) => {
                metrics::inc_sessions_started();
                info!("Session with {} started", node);
            }
            Effect::SessionEnded(node) => {
                metrics::inc_sessions_ended();
                info!("Session with {} ended", node);
            }
        }
    }

    fn save_friend(&mut self, node: NodeId) {
        let session_id: u32 = self.rng.gen_range(1..0x7fff_ffff);
        let mut secret = [0u8; SECRET_LEN];
        self.rng.fill(&mut secret[..]);
        match self.friends.upsert(node, session_id, secret) {
            UpsertOutcome::Evicted { previous, .. } => {
                self.ui.show_banner(
                    &format!("Friend list full, replaced {}", previous),
                    Duration::from_millis(super::BANNER_MS),
                );
            }
            UpsertOutcome::Rejected => {
                self.ui.show_banner(
                    "Friend list full",
                    Duration::from_millis(super::BANNER_MS),
                );
            }
            UpsertOutcome::Inserted { .. } | UpsertOutcome::Updated { .. } => {}
        }
    }

    /// Stamp and enqueue one FriendFinder packet. Allocation failure drops it.
    fn send(&mut self, to: NodeId, kind: RequestType, hop_limit: Option<u8>) {
        let mut packet = match self.transport.alloc() {
            Ok(p) => p,
            Err(e) => {
                metrics::inc_send_failures();
                warn!("Not sending {} to {}: {}", kind.as_str(), to, e);
                return;
            }
        };
        let telemetry = dispatch::stamp_telemetry(self.sensors.as_ref(), self.clock.as_ref());
        dispatch::fill_packet(&mut packet, to, kind, hop_limit, &telemetry);
        debug!(
            "TX {} to {} (hop_limit={}, {} bytes)",
            kind.as_str(),
            to,
            packet.hop_limit,
            packet.payload.len()
        );
        self.transport.enqueue(packet);
        metrics::inc_packets_sent();
    }

    fn run_background(&mut self) {
        let now = self.clock.now_ms();
        let has_fix = self.sensors.gps_fix().is_some();
        let targets = self
            .beacon
            .poll(now, self.state.is_idle(), &self.friends, has_fix);
        if targets.is_empty() {
            return;
        }
        for node in targets {
            self.send(node, RequestType::None, None);
            metrics::inc_background_beacons();
        }
        self.friends.flush_if_dirty();
    }
}
