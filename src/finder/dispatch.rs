//! Packet filtering, routing by (request type, state), and outbound stamping.
//!
//! Anything that does not match a row below is dropped without a reply. On a shared
//! broadcast channel stray ACCEPTs, replays and late duplicates are routine.
//!
//! | received      | state                                  | action                          |
//! |---------------|----------------------------------------|---------------------------------|
//! | REQUEST       | Idle, directed, from friend            | ACCEPT, BeingTracked            |
//! | REQUEST       | Idle, from stranger                    | hint banner only                |
//! | REQUEST       | Discovering, not rejected, directed    | ACCEPT, BeingTracked            |
//! | REQUEST       | Discovering, not rejected, broadcast   | prompt (AwaitingConfirmation)   |
//! | REQUEST       | AwaitingConfirmation, directed, other  | drop prompt, ACCEPT, BeingTracked|
//! | REQUEST       | AwaitingFinalAcceptance, from candidate| repeat ACCEPT                   |
//! | REQUEST       | AwaitingFinalAcceptance, directed      | ACCEPT, BeingTracked            |
//! | REQUEST       | AwaitingResponse, directed, from target| ACCEPT, TrackingTarget          |
//! | REQUEST       | session, directed, from target         | repeat ACCEPT                   |
//! | ACCEPT        | Discovering, not rejected              | prompt, peer already accepted   |
//! | ACCEPT        | AwaitingConfirmation, from candidate   | remember peer accepted          |
//! | ACCEPT        | AwaitingFinalAcceptance, from candidate| pairing complete                |
//! | ACCEPT        | AwaitingResponse, from target          | TrackingTarget                  |
//! | REJECT        | AwaitingConfirmation/FinalAcceptance   | reject candidate                |
//! | REJECT        | AwaitingResponse, from target          | Idle, "declined" banner         |
//! | END_SESSION   | session, from target                   | teardown                        |
//! | END_SESSION   | AwaitingResponse, from target          | Idle                            |
//! | NONE          | AwaitingFinalAcceptance, from candidate| pairing complete                |
//! | NONE          | session, from target                   | live + cached telemetry         |
//! | NONE          | any other state, from friend           | cached telemetry                |

use log::{debug, info, trace};

use super::host::{Clock, Sensors};
use super::state::{Context, Effect, EngineState, InboundMessage, Transition};
use super::{pairing, session};
use crate::logutil::{describe_telemetry, hex_dump};
use crate::mesh::{
    decode_payload, encode_payload, MeshPacket, NodeId, RequestType, Telemetry,
    DEFAULT_HOP_LIMIT, FRIEND_FINDER_PORTNUM,
};
use crate::metrics;

/// Decode a packet handed up by the router, or `None` if it is not ours to handle.
pub fn filter(packet: &MeshPacket, self_id: NodeId) -> Option<InboundMessage> {
    if packet.portnum != FRIEND_FINDER_PORTNUM {
        trace!("Ignoring port {} packet from {}", packet.portnum, packet.from);
        return None;
    }
    if packet.from == self_id || !packet.from.is_addressable() {
        trace!("Ignoring packet from {}", packet.from);
        return None;
    }
    let directed = packet.to == self_id;
    if !directed && !packet.to.is_broadcast() {
        trace!("Ignoring packet for {}", packet.to);
        return None;
    }
    metrics::inc_packets_received();
    debug!("RX raw from {}: {}", packet.from, hex_dump(&packet.payload));
    match decode_payload(&packet.payload) {
        Ok((kind, telemetry)) => {
            info!(
                "RX {} from {} (hop_limit={}, {}) {}",
                kind.as_str(),
                packet.from,
                packet.hop_limit,
                if directed { "directed" } else { "broadcast" },
                describe_telemetry(&telemetry)
            );
            Some(InboundMessage {
                from: packet.from,
                directed,
                kind,
                telemetry,
            })
        }
        Err(e) => {
            metrics::inc_decode_failures();
            debug!("Dropping undecodable packet from {}: {}", packet.from, e);
            None
        }
    }
}

/// Current position, battery and satellites. No fix means (0, 0) and zero satellites.
pub fn stamp_telemetry(sensors: &dyn Sensors, clock: &dyn Clock) -> Telemetry {
    let fix = sensors.gps_fix();
    Telemetry {
        latitude_i: fix.map(|f| f.latitude_i).unwrap_or(0),
        longitude_i: fix.map(|f| f.longitude_i).unwrap_or(0),
        sats_in_view: fix.map(|f| f.sats_in_view).unwrap_or(0),
        battery_level: u32::from(sensors.battery_percent().min(100)),
        time: clock.unix_time(),
    }
}

/// Address and fill a packet obtained from [`crate::mesh::Transport::alloc`].
pub fn fill_packet(
    packet: &mut MeshPacket,
    to: NodeId,
    kind: RequestType,
    hop_limit: Option<u8>,
    telemetry: &Telemetry,
) {
    packet.to = to;
    packet.hop_limit = hop_limit.unwrap_or(DEFAULT_HOP_LIMIT);
    packet.want_ack = false;
    packet.portnum = FRIEND_FINDER_PORTNUM;
    packet.payload = encode_payload(kind, telemetry);
}

/// Route one inbound message into the matching transition.
pub(crate) fn route(state: EngineState, msg: InboundMessage, ctx: &Context<'_>) -> Transition {
    match msg.kind {
        RequestType::Request => on_request(state, msg, ctx),
        RequestType::Accept => on_accept(state, msg, ctx),
        RequestType::Reject => on_reject(state, msg, ctx),
        RequestType::EndSession => on_end_session(state, msg, ctx),
        RequestType::None => on_telemetry(state, msg, ctx),
    }
}

fn ignore(state: EngineState, msg: &InboundMessage) -> Transition {
    debug!(
        "Ignoring {} from {} in {}",
        msg.kind.as_str(),
        msg.from,
        state.name()
    );
    Transition::to(state)
}

fn on_request(state: EngineState, msg: InboundMessage, ctx: &Context<'_>) -> Transition {
    let from = msg.from;
    match state {
        EngineState::Idle => {
            let known = ctx.friends.contains(from);
            if known && msg.directed {
                session::accept_directed(from, msg.telemetry, ctx)
            } else if !known {
                info!("Pair request from {} outside a pairing window", from);
                Transition::with(
                    EngineState::Idle,
                    vec![Effect::banner("Hold Pair on both devices")],
                )
            } else {
                ignore(EngineState::Idle, &msg)
            }
        }
        EngineState::Discovering { window, .. } if !window.has_rejected(from) => {
            if msg.directed {
                session::accept_directed(from, msg.telemetry, ctx)
            } else {
                pairing::propose(window, from, None, ctx)
            }
        }
        EngineState::AwaitingFinalAcceptance { window, candidate } if candidate == from => {
            debug!("Repeating ACCEPT to {}", from);
            Transition::with(
                EngineState::AwaitingFinalAcceptance { window, candidate },
                vec![Effect::send(from, RequestType::Accept)],
            )
        }
        EngineState::AwaitingConfirmation {
            window, candidate, ..
        } if msg.directed && !window.has_rejected(from) && candidate != from => {
            info!("Directed request from {} while confirming {}", from, candidate);
            session::accept_directed(from, msg.telemetry, ctx).after(vec![Effect::DismissPrompt])
        }
        EngineState::AwaitingFinalAcceptance { window, candidate }
            if msg.directed && !window.has_rejected(from) && candidate != from =>
        {
            info!("Directed request from {} while finishing with {}", from, candidate);
            session::accept_directed(from, msg.telemetry, ctx)
        }
        EngineState::AwaitingResponse { target, .. } if target == from && msg.directed => {
            session::accepted(target, msg.telemetry, ctx)
                .after(vec![Effect::send(from, RequestType::Accept)])
        }
        s @ (EngineState::TrackingTarget { .. } | EngineState::BeingTracked { .. })
            if s.session_target() == Some(from) && msg.directed =>
        {
            debug!("Repeating ACCEPT to session peer {}", from);
            Transition::with(s, vec![Effect::send(from, RequestType::Accept)])
        }
        other => ignore(other, &msg),
    }
}

fn on_accept(state: EngineState, msg: InboundMessage, ctx: &Context<'_>) -> Transition {
    let from = msg.from;
    if !msg.directed {
        return ignore(state, &msg);
    }
    match state {
        EngineState::Discovering { window, .. } if !window.has_rejected(from) => {
            pairing::propose(window, from, Some(msg.telemetry), ctx)
        }
        EngineState::AwaitingConfirmation {
            window,
            candidate,
            mut decision,
        } if candidate == from => {
            debug!("{} accepted before we answered", from);
            decision.peer_accepted = true;
            decision.peer_telemetry = Some(msg.telemetry);
            Transition::to(EngineState::AwaitingConfirmation {
                window,
                candidate,
                decision,
            })
        }
        EngineState::AwaitingFinalAcceptance { candidate, .. } if candidate == from => {
            pairing::complete(candidate, Some(msg.telemetry))
        }
        EngineState::AwaitingResponse { target, .. } if target == from => {
            session::accepted(target, msg.telemetry, ctx)
        }
        other => ignore(other, &msg),
    }
}

fn on_reject(state: EngineState, msg: InboundMessage, ctx: &Context<'_>) -> Transition {
    let from = msg.from;
    if !msg.directed {
        return ignore(state, &msg);
    }
    match state {
        EngineState::AwaitingConfirmation {
            window, candidate, ..
        } if candidate == from => {
            info!("{} rejected pairing", from);
            pairing::reject_candidate(window, candidate, false, ctx)
                .after(vec![Effect::DismissPrompt])
        }
        EngineState::AwaitingFinalAcceptance { window, candidate } if candidate == from => {
            info!("{} rejected pairing", from);
            pairing::reject_candidate(window, candidate, false, ctx)
        }
        EngineState::AwaitingResponse { target, .. } if target == from => {
            info!("{} declined our request", from);
            Transition::with(
                EngineState::Idle,
                vec![
                    Effect::banner(format!("{} declined", from)),
                    Effect::RegenerateFrames { focus: false },
                ],
            )
        }
        other => ignore(other, &msg),
    }
}

fn on_end_session(state: EngineState, msg: InboundMessage, ctx: &Context<'_>) -> Transition {
    let from = msg.from;
    if !msg.directed {
        return ignore(state, &msg);
    }
    match state {
        s if s.session_target() == Some(from) => session::peer_ended(s, ctx),
        EngineState::AwaitingResponse { target, .. } if target == from => Transition::with(
            EngineState::Idle,
            vec![Effect::RegenerateFrames { focus: false }],
        ),
        other => ignore(other, &msg),
    }
}

fn on_telemetry(state: EngineState, msg: InboundMessage, ctx: &Context<'_>) -> Transition {
    let from = msg.from;
    let telemetry = msg.telemetry;
    match state {
        EngineState::AwaitingFinalAcceptance { candidate, .. } if candidate == from => {
            pairing::complete(candidate, Some(telemetry))
        }
        s if s.session_target() == Some(from) => Transition::with(
            s,
            vec![
                Effect::RecordTelemetry { from, telemetry },
                Effect::UpdateLive { from, telemetry },
                Effect::Redraw,
            ],
        ),
        s if ctx.friends.contains(from) => {
            debug!("Background telemetry from {}", from);
            Transition::with(s, vec![Effect::RecordTelemetry { from, telemetry }])
        }
        other => ignore(other, &msg),
    }
}
