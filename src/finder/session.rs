//! Tracking sessions with a known (or just-accepted) peer.
//!
//! Once a session is up both sides beacon their telemetry every update interval whether or
//! not they heard from the peer; nothing is acknowledged. END_SESSION tears down without
//! negotiation. Every teardown path restores the GPS interval.

use log::{debug, info};

use super::state::{Context, Effect, EngineState, Transition};
use super::{pairing, Millis};
use crate::mesh::{NodeId, RequestType, Telemetry};

/// Freshest telemetry from the session peer, kept apart from the friend table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveTelemetry {
    pub peer: NodeId,
    pub data: Telemetry,
    /// `None` when nothing has been heard yet.
    pub received_at_ms: Option<Millis>,
}

/// Effects that leave whatever was going on, ahead of starting something else.
fn leave(state: EngineState, ctx: &Context<'_>) -> Vec<Effect> {
    if state.target().is_some() {
        end(state, true, ctx).effects
    } else if state.is_pairing() {
        pairing::abandon(state, None).effects
    } else {
        Vec::new()
    }
}

/// User asked to track `target`. A friend goes straight to `TrackingTarget`; anyone else gets
/// a directed REQUEST.
pub(crate) fn start_tracking(state: EngineState, target: NodeId, ctx: &Context<'_>) -> Transition {
    if !target.is_addressable() || target == ctx.self_id {
        debug!("Ignoring tracking request for {}", target);
        return Transition::to(state);
    }
    if state.target() == Some(target) {
        debug!("Already in {} with {}", state.name(), target);
        return Transition::to(state);
    }
    let prefix = leave(state, ctx);

    if ctx.friends.contains(target) {
        info!("Tracking friend {}", target);
        return Transition::with(
            EngineState::TrackingTarget {
                target,
                last_beacon_ms: ctx.now,
            },
            vec![
                Effect::BoostGps,
                Effect::SeedLiveFromFriend(target),
                Effect::send(target, RequestType::None),
                Effect::SessionStarted(target),
                Effect::banner("Tracking started"),
                Effect::RegenerateFrames { focus: true },
            ],
        )
        .after(prefix);
    }

    info!("Requesting tracking of {}", target);
    Transition::with(
        EngineState::AwaitingResponse {
            target,
            expires_at_ms: ctx.now.saturating_add(ctx.timing.pairing_window_ms),
        },
        vec![
            Effect::send(target, RequestType::Request),
            Effect::banner("Request sent… Press Pairing on peer"),
            Effect::RegenerateFrames { focus: true },
        ],
    )
    .after(prefix)
}

/// Someone we accept asked to track us: reply ACCEPT and enter `BeingTracked`.
pub(crate) fn accept_directed(from: NodeId, telemetry: Telemetry, ctx: &Context<'_>) -> Transition {
    let mut effects = Vec::new();
    let known = ctx.friends.contains(from);
    if !known {
        effects.push(Effect::SaveFriend(from));
    }
    effects.extend([
        Effect::RecordTelemetry { from, telemetry },
        Effect::UpdateLive { from, telemetry },
        Effect::send(from, RequestType::Accept),
        Effect::BoostGps,
        Effect::SessionStarted(from),
        Effect::banner(if known {
            format!("Paired (saved) with {}", from)
        } else {
            format!("Paired with {}", from)
        }),
        Effect::RegenerateFrames { focus: true },
    ]);
    info!("{} is now tracking us", from);
    Transition::with(
        EngineState::BeingTracked {
            target: from,
            last_beacon_ms: ctx.now,
        },
        effects,
    )
}

/// Our directed REQUEST was accepted.
pub(crate) fn accepted(target: NodeId, telemetry: Telemetry, ctx: &Context<'_>) -> Transition {
    let mut effects = Vec::new();
    if !ctx.friends.contains(target) {
        effects.push(Effect::SaveFriend(target));
    }
    effects.extend([
        Effect::RecordTelemetry {
            from: target,
            telemetry,
        },
        Effect::UpdateLive {
            from: target,
            telemetry,
        },
        Effect::BoostGps,
        Effect::send(target, RequestType::None),
        Effect::SessionStarted(target),
        Effect::banner("Tracking started"),
        Effect::RegenerateFrames { focus: true },
    ]);
    info!("{} accepted, tracking", target);
    Transition::with(
        EngineState::TrackingTarget {
            target,
            last_beacon_ms: ctx.now,
        },
        effects,
    )
}

/// Tear down whatever session or request is active. Sends at most one END_SESSION.
pub(crate) fn end(state: EngineState, notify_peer: bool, _ctx: &Context<'_>) -> Transition {
    if state.is_pairing() {
        return pairing::abandon(state, None);
    }
    let mut effects = Vec::new();
    if let Some(target) = state.target() {
        if notify_peer {
            effects.push(Effect::send(target, RequestType::EndSession));
        }
        info!("Ending {} with {}", state.name(), target);
    }
    effects.extend([
        Effect::RestoreGps,
        Effect::ClearLive,
        Effect::PersistFriends,
    ]);
    if let Some(target) = state.session_target() {
        effects.push(Effect::SessionEnded(target));
    }
    if !state.is_idle() {
        effects.push(Effect::RegenerateFrames { focus: false });
    }
    Transition::with(EngineState::Idle, effects)
}

/// END_SESSION from the session peer.
pub(crate) fn peer_ended(state: EngineState, ctx: &Context<'_>) -> Transition {
    let mut t = end(state, false, ctx);
    t.effects.push(Effect::banner("Session ended by peer"));
    t
}

pub(crate) fn on_tick(state: EngineState, ctx: &Context<'_>) -> Transition {
    match state {
        EngineState::AwaitingResponse {
            target,
            expires_at_ms,
        } if ctx.now >= expires_at_ms => {
            info!("No response from {}", target);
            Transition::with(
                EngineState::Idle,
                vec![
                    Effect::banner(format!("No response from {}", target)),
                    Effect::RegenerateFrames { focus: false },
                ],
            )
        }
        EngineState::TrackingTarget {
            target,
            last_beacon_ms,
        } if heartbeat_due(last_beacon_ms, ctx) => Transition::with(
            EngineState::TrackingTarget {
                target,
                last_beacon_ms: ctx.now,
            },
            vec![Effect::send(target, RequestType::None)],
        ),
        EngineState::BeingTracked {
            target,
            last_beacon_ms,
        } if heartbeat_due(last_beacon_ms, ctx) => Transition::with(
            EngineState::BeingTracked {
                target,
                last_beacon_ms: ctx.now,
            },
            vec![Effect::send(target, RequestType::None)],
        ),
        other => Transition::to(other),
    }
}

fn heartbeat_due(last_beacon_ms: Millis, ctx: &Context<'_>) -> bool {
    ctx.now.saturating_sub(last_beacon_ms) >= ctx.timing.update_interval_ms
}
