//! # Finder - Pairing, Tracking and Friend Persistence
//!
//! The protocol core. [`FinderEngine`] owns one [`EngineState`] and is driven by two event
//! sources only: [`FinderEngine::tick`] and [`FinderEngine::on_packet`]. Every change goes
//! through [`state::transition`], a pure function returning the next state plus a list of
//! [`Effect`]s; the engine then applies those effects to its collaborators (transport, UI,
//! friend store, GPS power controller).
//!
//! ```text
//!   tick / packet / user action
//!             │
//!             ▼
//!   transition(state, event, ctx) ──► (next state, [Effect])
//!                                            │
//!        ┌──────────────┬──────────────┬─────┴────────┬─────────────┐
//!        ▼              ▼              ▼              ▼             ▼
//!    Transport     FriendStore    PowerMode           Ui      live telemetry
//! ```
//!
//! Submodules:
//!
//! - [`friends`] - bounded, persisted friend table
//! - [`power`] - GPS interval boost/restore with startup self-heal
//! - [`state`] - states, events, effects and the transition entry point
//! - [`pairing`] / [`session`] - the two halves of the protocol
//! - [`dispatch`] - inbound filtering, routing by (type, state), outbound stamping
//! - [`beacon`] - idle-time background refresh of every friend
//! - [`host`] - collaborator traits (clock, sensors, GPS control, UI) and simple implementations
//! - [`geo`] / [`view`] - distance, bearing and the session page model

pub mod beacon;
pub mod dispatch;
pub mod engine;
pub mod friends;
pub mod geo;
pub mod host;
pub mod pairing;
pub mod power;
pub mod session;
pub mod state;
pub mod view;

pub use beacon::BeaconScheduler;
pub use engine::{Collaborators, EngineStatus, FinderEngine};
pub use friends::{EvictionPolicy, FriendRecord, FriendStore, UpsertOutcome};
pub use host::{
    ChoicePrompt, Clock, GpsControl, GpsFix, LogUi, ManualClock, MemoryGps, Sensors,
    StaticSensors, SystemClock, Ui,
};
pub use power::PowerModeController;
pub use session::LiveTelemetry;
pub use state::{Effect, EngineState, Event, InboundMessage, PairingWindow, Transition};
pub use view::SessionView;

use crate::config::FinderConfig;

/// Most friends the table holds.
pub const MAX_FRIENDS: usize = 8;

/// Length of the per-friend secret.
pub const SECRET_LEN: usize = 16;

/// Default banner duration.
pub const BANNER_MS: u64 = 1200;

/// Monotonic milliseconds as reported by [`Clock::now_ms`].
pub type Millis = u64;

/// Protocol timers in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub pairing_window_ms: Millis,
    pub rebroadcast_ms: Millis,
    pub confirm_timeout_ms: Millis,
    pub update_interval_ms: Millis,
    pub background_interval_ms: Millis,
    pub active_tick_ms: Millis,
    pub idle_tick_ms: Millis,
}

impl Timing {
    pub fn from_config(cfg: &FinderConfig) -> Self {
        Self {
            pairing_window_ms: cfg.pairing_window_secs * 1000,
            rebroadcast_ms: cfg.discovery_rebroadcast_secs * 1000,
            confirm_timeout_ms: cfg.confirm_timeout_secs * 1000,
            update_interval_ms: cfg.update_interval_secs * 1000,
            background_interval_ms: cfg.background_update_interval_secs * 1000,
            active_tick_ms: cfg.active_tick_ms,
            idle_tick_ms: cfg.idle_tick_ms,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from_config(&FinderConfig::default())
    }
}
