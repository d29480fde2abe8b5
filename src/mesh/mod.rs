//! # Mesh Transport Layer
//!
//! Everything the friend finder knows about the radio lives behind this module: node ids,
//! the packet envelope handed to and received from the router, the [`Transport`] contract,
//! and the FriendFinder protobuf payload carried on its own port number.
//!
//! The router itself (framing, addressing, hop-limit enforcement, retransmission) is an
//! external collaborator. Sends are fire-and-forget: the only failure the transport reports
//! is that it could not allocate an outgoing packet.
//!
//! ## Node ids
//!
//! Node ids are 32-bit radio addresses. They print Meshtastic style (`!1234abcd`) and parse
//! from `!hex`, `0xhex` or plain decimal:
//!
//! ```rust
//! use meshfinder::mesh::NodeId;
//!
//! let id: NodeId = "!00001234".parse().unwrap();
//! assert_eq!(id, NodeId(0x1234));
//! assert_eq!(id.to_string(), "!00001234");
//! ```

pub mod payload;
pub mod sim;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use payload::{decode_payload, encode_payload, CodecError, FriendFinder, RequestType, Telemetry};
pub use sim::{ChannelTransport, SimMesh};

/// Application port the FriendFinder payload travels on (Meshtastic private-app range).
pub const FRIEND_FINDER_PORTNUM: u32 = 257;

/// Hop limit the router applies when the sender does not override it.
pub const DEFAULT_HOP_LIMIT: u8 = 3;

/// Hop limit for pairing discovery broadcasts: direct neighbours only.
pub const DISCOVERY_HOP_LIMIT: u8 = 1;

/// 32-bit mesh node address.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Destination address meaning "every node in range".
    pub const BROADCAST: NodeId = NodeId(0xffff_ffff);
    /// The zero address; never a real node.
    pub const UNSET: NodeId = NodeId(0);

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    /// True for addresses a session can be opened with (not zero, not broadcast).
    pub fn is_addressable(self) -> bool {
        self != Self::UNSET && self != Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            return write!(f, "broadcast");
        }
        write!(f, "!{:08x}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseNodeIdError {
    #[error("empty node id")]
    Empty,
    #[error("invalid node id '{0}' (expected !hex, 0xhex or decimal)")]
    Invalid(String),
}

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseNodeIdError::Empty);
        }
        let parsed = if let Some(hex) = s.strip_prefix('!') {
            u32::from_str_radix(hex, 16)
        } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)
        } else {
            s.parse::<u32>()
        };
        parsed
            .map(NodeId)
            .map_err(|_| ParseNodeIdError::Invalid(s.to_string()))
    }
}

/// Packet envelope as exchanged with the router.
///
/// Sender and destination live here, not in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPacket {
    pub id: u32,
    pub from: NodeId,
    pub to: NodeId,
    pub hop_limit: u8,
    pub want_ack: bool,
    pub portnum: u32,
    pub payload: Bytes,
}

impl MeshPacket {
    /// A blank outgoing packet as handed out by [`Transport::alloc`].
    pub fn blank(id: u32, from: NodeId) -> Self {
        Self {
            id,
            from,
            to: NodeId::BROADCAST,
            hop_limit: DEFAULT_HOP_LIMIT,
            want_ack: false,
            portnum: 0,
            payload: Bytes::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The router has no packet buffer (or no link) available right now.
    #[error("packet allocation failed")]
    AllocationFailed,
}

/// Outgoing half of the router contract.
///
/// `alloc` hands out a blank packet stamped with a fresh id and our address; the caller
/// fills destination, hop limit, port and payload and hands it back through `enqueue`.
/// There is no delivery status.
pub trait Transport: Send {
    fn alloc(&mut self) -> Result<MeshPacket, TransportError>;
    fn enqueue(&mut self, packet: MeshPacket);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_node_id_notations() {
        assert_eq!("!1234abcd".parse::<NodeId>().unwrap(), NodeId(0x1234_abcd));
        assert_eq!("0x1234".parse::<NodeId>().unwrap(), NodeId(0x1234));
        assert_eq!("4660".parse::<NodeId>().unwrap(), NodeId(0x1234));
        assert_eq!(" !ff ".parse::<NodeId>().unwrap(), NodeId(0xff));
    }

    #[test]
    fn rejects_garbage_node_ids() {
        assert_eq!("".parse::<NodeId>(), Err(ParseNodeIdError::Empty));
        assert!(matches!(
            "!zz".parse::<NodeId>(),
            Err(ParseNodeIdError::Invalid(_))
        ));
        assert!("-5".parse::<NodeId>().is_err());
    }

    #[test]
    fn broadcast_and_unset_are_not_addressable() {
        assert!(!NodeId::BROADCAST.is_addressable());
        assert!(!NodeId::UNSET.is_addressable());
        assert!(NodeId(0x1234).is_addressable());
        assert_eq!(NodeId::BROADCAST.to_string(), "broadcast");
    }
}
