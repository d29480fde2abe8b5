//! # Meshfinder - Friend Finder for Meshtastic Handhelds
//!
//! Meshfinder lets two nearby (or previously paired) Meshtastic devices exchange position,
//! battery level and satellite count so each can show a bearing/distance arrow toward the
//! other. Everything travels over a lossy broadcast mesh with no acknowledgments, so the
//! protocol leans on idempotent transitions and periodic beacons instead of handshakes.
//!
//! ## Features
//!
//! - **Pairing**: Discovery broadcast with a short pairing window, a user yes/no prompt, and a
//!   symmetric completion that either side can trigger first.
//! - **Tracking Sessions**: Directed request/accept, periodic telemetry heartbeats, and
//!   unconditional teardown on `END_SESSION`.
//! - **Friend Store**: Up to [`finder::MAX_FRIENDS`] friends persisted as one fixed-size blob
//!   in a sled tree; malformed blobs reset to an empty table.
//! - **GPS Power Mode**: The shared GPS interval is boosted only while a session is live and
//!   always restored on teardown; a stale boost is healed at startup.
//! - **Background Beacons**: While idle, every stored friend periodically receives a fresh
//!   telemetry snapshot so a later session can render from cache immediately.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshfinder::config::Config;
//! use meshfinder::finder::{Collaborators, FinderEngine, LogUi, ManualClock, MemoryGps, StaticSensors};
//! use meshfinder::mesh::{NodeId, SimMesh};
//! use meshfinder::storage::MemoryBlobStore;
//!
//! let config = Config::default();
//! let mut mesh = SimMesh::new(0.0, 0.0, 7);
//! let me = NodeId(0x1234_abcd);
//! let clock = ManualClock::new();
//! let collaborators = Collaborators {
//!     transport: Box::new(mesh.attach(me)),
//!     clock: Box::new(clock.clone()),
//!     sensors: Box::new(StaticSensors::new()),
//!     gps: Box::new(MemoryGps::new(config.gps.default_interval_secs)),
//!     ui: Box::new(LogUi::new(Some(true))),
//!     store: Some(Box::new(MemoryBlobStore::new())),
//! };
//! let mut engine = FinderEngine::new(me, &config, collaborators);
//! engine.begin_pairing();
//! let _next_tick = engine.tick();
//! ```
//!
//! ## Module Organization
//!
//! - [`finder`] - Pairing/session state machine, friend store, power mode, beacons
//! - [`mesh`] - Node ids, packet envelope, transport contract, FriendFinder payload codec
//! - [`storage`] - Blob persistence contract (sled and in-memory)
//! - [`config`] - Configuration management and validation
//! - [`logutil`] - Log formatting helpers
//! - [`metrics`] - Process-wide protocol counters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  FinderEngine   │ ← transition(state, event) -> (state, effects)
//! └─────────────────┘
//!     │         │
//! ┌────────┐ ┌─────────┐
//! │  Mesh  │ │ Storage │ ← injected collaborators
//! └────────┘ └─────────┘
//! ```

pub mod config;
pub mod finder;
pub mod logutil;
pub mod mesh;
pub mod metrics;
pub mod storage;
