//! Engine states, events, effects and the transition entry point.
//!
//! Each state carries only the data it needs. Pairing states share a [`PairingWindow`]
//! (expiry plus the candidates rejected during this window); the confirmation state also
//! holds the pending user decision, which the engine resolves by polling the UI each tick.

use super::friends::FriendStore;
use super::{dispatch, pairing, session, Millis, Timing};
use crate::mesh::{NodeId, RequestType, Telemetry};

/// An open discovery window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingWindow {
    pub expires_at_ms: Millis,
    pub rejected: Vec<NodeId>,
}

impl PairingWindow {
    pub fn open(now: Millis, timing: &Timing) -> Self {
        Self {
            expires_at_ms: now.saturating_add(timing.pairing_window_ms),
            rejected: Vec::new(),
        }
    }

    pub fn is_open(&self, now: Millis) -> bool {
        now < self.expires_at_ms
    }

    /// Whole seconds left, rounded up.
    pub fn remaining_secs(&self, now: Millis) -> u64 {
        (self.expires_at_ms.saturating_sub(now) + 999) / 1000
    }

    pub fn has_rejected(&self, node: NodeId) -> bool {
        self.rejected.contains(&node)
    }

    pub fn reject(&mut self, node: NodeId) {
        if !self.has_rejected(node) {
            self.rejected.push(node);
        }
    }
}

/// The yes/no question currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDecision {
    /// Unanswered at this point counts as "no".
    pub deadline_ms: Millis,
    /// The candidate already sent ACCEPT; our "yes" completes pairing at once.
    pub peer_accepted: bool,
    pub peer_telemetry: Option<Telemetry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Discovering {
        window: PairingWindow,
        last_broadcast_ms: Millis,
    },
    AwaitingConfirmation {
        window: PairingWindow,
        candidate: NodeId,
        decision: PendingDecision,
    },
    AwaitingFinalAcceptance {
        window: PairingWindow,
        candidate: NodeId,
    },
    AwaitingResponse {
        target: NodeId,
        expires_at_ms: Millis,
    },
    TrackingTarget {
        target: NodeId,
        last_beacon_ms: Millis,
    },
    BeingTracked {
        target: NodeId,
        last_beacon_ms: Millis,
    },
}

impl EngineState {
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Idle => "Idle",
            EngineState::Discovering { .. } => "Discovering",
            EngineState::AwaitingConfirmation { .. } => "AwaitingConfirmation",
            EngineState::AwaitingFinalAcceptance { .. } => "AwaitingFinalAcceptance",
            EngineState::AwaitingResponse { .. } => "AwaitingResponse",
            EngineState::TrackingTarget { .. } => "TrackingTarget",
            EngineState::BeingTracked { .. } => "BeingTracked",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, EngineState::Idle)
    }

    pub fn is_pairing(&self) -> bool {
        self.window().is_some()
    }

    pub fn window(&self) -> Option<&PairingWindow> {
        match self {
            EngineState::Discovering { window, .. }
            | EngineState::AwaitingConfirmation { window, .. }
            | EngineState::AwaitingFinalAcceptance { window, .. } => Some(window),
            _ => None,
        }
    }

    /// Pairing candidate, if any.
    pub fn candidate(&self) -> Option<NodeId> {
        match self {
            EngineState::AwaitingConfirmation { candidate, .. }
            | EngineState::AwaitingFinalAcceptance { candidate, .. } => Some(*candidate),
            _ => None,
        }
    }

    /// Peer of a live session.
    pub fn session_target(&self) -> Option<NodeId> {
        match self {
            EngineState::TrackingTarget { target, .. }
            | EngineState::BeingTracked { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Session peer or the node a directed request is waiting on.
    pub fn target(&self) -> Option<NodeId> {
        match self {
            EngineState::AwaitingResponse { target, .. } => Some(*target),
            _ => self.session_target(),
        }
    }
}

/// A decoded FriendFinder packet that passed filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: NodeId,
    /// Addressed to us rather than broadcast.
    pub directed: bool,
    pub kind: RequestType,
    pub telemetry: Telemetry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Tick,
    BeginPairing,
    Cancel,
    AnswerPrompt(bool),
    StartTracking(NodeId),
    EndSession { notify_peer: bool },
    Inbound(InboundMessage),
}

/// Work requested by a transition, applied by the engine in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Stamp current telemetry and enqueue. `None` hop limit means the router default.
    Send {
        to: NodeId,
        kind: RequestType,
        hop_limit: Option<u8>,
    },
    /// Store (or refresh) a friend with a fresh session id and secret.
    SaveFriend(NodeId),
    /// Background cache on the friend record; ignored for strangers.
    RecordTelemetry { from: NodeId, telemetry: Telemetry },
    /// Live session cache.
    UpdateLive { from: NodeId, telemetry: Telemetry },
    SeedLiveFromFriend(NodeId),
    ClearLive,
    PersistFriends,
    BoostGps,
    RestoreGps,
    Banner { text: String, millis: u64 },
    Prompt(NodeId),
    DismissPrompt,
    RegenerateFrames { focus: bool },
    Redraw,
    PairingComplete(NodeId),
    SessionStarted(NodeId),
    SessionEnded(NodeId),
}

impl Effect {
    pub fn send(to: NodeId, kind: RequestType) -> Self {
        Effect::Send {
            to,
            kind,
            hop_limit: None,
        }
    }

    pub fn banner(text: impl Into<String>) -> Self {
        Effect::Banner {
            text: text.into(),
            millis: super::BANNER_MS,
        }
    }
}

/// Read-only view of the engine a transition may consult.
pub struct Context<'a> {
    pub now: Millis,
    pub self_id: NodeId,
    pub timing: &'a Timing,
    pub friends: &'a FriendStore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: EngineState,
    pub effects: Vec<Effect>,
}

impl Transition {
    pub fn to(next: EngineState) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    pub fn with(next: EngineState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    /// Run `effects` before this transition's own.
    pub fn after(mut self, mut effects: Vec<Effect>) -> Self {
        effects.append(&mut self.effects);
        self.effects = effects;
        self
    }
}

/// The single entry point for every state change.
pub fn transition(state: EngineState, event: Event, ctx: &Context<'_>) -> Transition {
    match event {
        Event::Tick => on_tick(state, ctx),
        Event::BeginPairing => pairing::begin(state, ctx),
        Event::Cancel => cancel(state, ctx),
        Event::AnswerPrompt(accept) => pairing::answer(state, accept, ctx),
        Event::StartTracking(node) => session::start_tracking(state, node, ctx),
        Event::EndSession { notify_peer } => session::end(state, notify_peer, ctx),
        Event::Inbound(msg) => dispatch::route(state, msg, ctx),
    }
}

fn cancel(state: EngineState, ctx: &Context<'_>) -> Transition {
    match state {
        EngineState::Idle => Transition::to(EngineState::Idle),
        s if s.is_pairing() => pairing::abandon(s, None),
        s => session::end(s, true, ctx),
    }
}

/// Every tick outside `Idle` also redraws, so countdowns, ages and the arrow stay current.
fn on_tick(state: EngineState, ctx: &Context<'_>) -> Transition {
    let mut t = match state {
        s if s.is_pairing() => pairing::on_tick(s, ctx),
        EngineState::Idle => Transition::to(EngineState::Idle),
        s => session::on_tick(s, ctx),
    };
    if !t.next.is_idle() && !t.effects.contains(&Effect::Redraw) {
        t.effects.push(Effect::Redraw);
    }
    t
}
