//! First-time pairing.
//!
//! Both devices press Pair and run the same code, so nothing here assumes an initiator.
//! Completion fires on whichever arrives first: the peer's ACCEPT after we accepted, our
//! "yes" after the peer's ACCEPT, or any telemetry beacon from the candidate once we are
//! waiting on it. Window expiry or cancel from any pairing state goes straight to `Idle`.

use log::{debug, info};

use super::state::{Context, Effect, EngineState, PairingWindow, PendingDecision, Transition};
use super::session;
use crate::mesh::{NodeId, RequestType, Telemetry, DISCOVERY_HOP_LIMIT};

fn discovery_broadcast() -> Effect {
    Effect::Send {
        to: NodeId::BROADCAST,
        kind: RequestType::Request,
        hop_limit: Some(DISCOVERY_HOP_LIMIT),
    }
}

/// Open a fresh window and start broadcasting. Any session is ended first; a pairing
/// already in progress is restarted with an empty rejected set.
pub(crate) fn begin(state: EngineState, ctx: &Context<'_>) -> Transition {
    let prefix = if state.target().is_some() {
        session::end(state, true, ctx).effects
    } else if matches!(state, EngineState::AwaitingConfirmation { .. }) {
        vec![Effect::DismissPrompt]
    } else {
        Vec::new()
    };
    let window = PairingWindow::open(ctx.now, ctx.timing);
    info!(
        "Pairing window open for {}s",
        window.remaining_secs(ctx.now)
    );
    Transition::with(
        EngineState::Discovering {
            window,
            last_broadcast_ms: ctx.now,
        },
        vec![
            discovery_broadcast(),
            Effect::banner("Pairing… Press on BOTH devices"),
            Effect::RegenerateFrames { focus: true },
        ],
    )
    .after(prefix)
}

/// Put a candidate in front of the user. `peer` is the candidate's telemetry when it has
/// already sent ACCEPT.
pub(crate) fn propose(
    window: PairingWindow,
    candidate: NodeId,
    peer: Option<Telemetry>,
    ctx: &Context<'_>,
) -> Transition {
    info!("Pairing candidate {}", candidate);
    Transition::with(
        EngineState::AwaitingConfirmation {
            window,
            candidate,
            decision: PendingDecision {
                deadline_ms: ctx.now.saturating_add(ctx.timing.confirm_timeout_ms),
                peer_accepted: peer.is_some(),
                peer_telemetry: peer,
            },
        },
        vec![Effect::Prompt(candidate), Effect::Redraw],
    )
}

/// The user's answer to the pairing prompt.
pub(crate) fn answer(state: EngineState, accept: bool, ctx: &Context<'_>) -> Transition {
    match state {
        EngineState::AwaitingConfirmation {
            window,
            candidate,
            decision,
        } => {
            if !accept {
                info!("Declined pairing with {}", candidate);
                return reject_candidate(window, candidate, true, ctx)
                    .after(vec![Effect::DismissPrompt]);
            }
            let effects = vec![
                Effect::DismissPrompt,
                Effect::send(candidate, RequestType::Accept),
            ];
            if decision.peer_accepted {
                complete(candidate, decision.peer_telemetry).after(effects)
            } else {
                debug!("Accepted {}, waiting for its ACCEPT", candidate);
                let mut effects = effects;
                effects.push(Effect::Redraw);
                Transition::with(
                    EngineState::AwaitingFinalAcceptance { window, candidate },
                    effects,
                )
            }
        }
        other => {
            debug!("Prompt answer with nothing pending ({})", other.name());
            Transition::to(other)
        }
    }
}

/// Drop `candidate` for the rest of this window and go back to discovery, or to `Idle` if
/// the window has closed.
pub(crate) fn reject_candidate(
    mut window: PairingWindow,
    candidate: NodeId,
    send_reject: bool,
    ctx: &Context<'_>,
) -> Transition {
    let mut effects = Vec::new();
    if send_reject {
        effects.push(Effect::send(candidate, RequestType::Reject));
    }
    window.reject(candidate);
    if window.is_open(ctx.now) {
        effects.push(Effect::Redraw);
        Transition::with(
            EngineState::Discovering {
                window,
                last_broadcast_ms: ctx.now,
            },
            effects,
        )
    } else {
        effects.push(Effect::RegenerateFrames { focus: false });
        Transition::with(EngineState::Idle, effects)
    }
}

/// Record the friend, send one beacon, and return to `Idle`. Always issues a fresh session
/// id and secret, even for a node already in the table.
pub(crate) fn complete(candidate: NodeId, peer: Option<Telemetry>) -> Transition {
    info!("Pairing with {} complete", candidate);
    let mut effects = vec![Effect::SaveFriend(candidate)];
    if let Some(telemetry) = peer {
        effects.push(Effect::RecordTelemetry {
            from: candidate,
            telemetry,
        });
    }
    effects.extend([
        Effect::send(candidate, RequestType::None),
        Effect::PairingComplete(candidate),
        Effect::banner(format!("Paired with {}", candidate)),
        Effect::RegenerateFrames { focus: false },
    ]);
    Transition::with(EngineState::Idle, effects)
}

/// Leave any pairing state for `Idle`.
pub(crate) fn abandon(state: EngineState, banner: Option<&str>) -> Transition {
    let mut effects = Vec::new();
    if matches!(state, EngineState::AwaitingConfirmation { .. }) {
        effects.push(Effect::DismissPrompt);
    }
    if let Some(text) = banner {
        effects.push(Effect::banner(text));
    }
    effects.push(Effect::RegenerateFrames { focus: false });
    Transition::with(EngineState::Idle, effects)
}

pub(crate) fn on_tick(state: EngineState, ctx: &Context<'_>) -> Transition {
    if let Some(window) = state.window() {
        if !window.is_open(ctx.now) {
            info!("Pairing window expired in {}", state.name());
            return abandon(state, Some("Pairing timed out"));
        }
    }
    match state {
        EngineState::Discovering {
            window,
            last_broadcast_ms,
        } if ctx.now.saturating_sub(last_broadcast_ms) >= ctx.timing.rebroadcast_ms => {
            debug!("Re-broadcasting discovery request");
            Transition::with(
                EngineState::Discovering {
                    window,
                    last_broadcast_ms: ctx.now,
                },
                vec![discovery_broadcast()],
            )
        }
        EngineState::AwaitingConfirmation {
            window,
            candidate,
            decision,
        } if ctx.now >= decision.deadline_ms => {
            info!("Pairing prompt for {} timed out", candidate);
            reject_candidate(window, candidate, true, ctx).after(vec![Effect::DismissPrompt])
        }
        other => Transition::to(other),
    }
}
