//! Channel-backed transport and a lossy in-memory mesh.
//!
//! [`ChannelTransport`] is the outgoing half of a router link: packets go into a tokio
//! unbounded channel whose receiver belongs to whatever plays the radio. [`SimMesh`] is
//! such a receiver for hosts without hardware (the `simulate` command and the integration
//! tests). It fans packets out to attached nodes and can drop, duplicate and reorder them,
//! which is exactly the behaviour the protocol must tolerate.

use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use super::{MeshPacket, NodeId, Transport, TransportError};

/// Transport that enqueues onto an mpsc channel.
pub struct ChannelTransport {
    local: NodeId,
    next_id: u32,
    tx: mpsc::UnboundedSender<MeshPacket>,
}

impl ChannelTransport {
    pub fn new(local: NodeId, tx: mpsc::UnboundedSender<MeshPacket>) -> Self {
        Self {
            local,
            next_id: rand::random::<u32>(),
            tx,
        }
    }

    pub fn local(&self) -> NodeId {
        self.local
    }
}

impl Transport for ChannelTransport {
    fn alloc(&mut self) -> Result<MeshPacket, TransportError> {
        if self.tx.is_closed() {
            return Err(TransportError::AllocationFailed);
        }
        // Packet id 0 means "no id" on Meshtastic.
        self.next_id = self.next_id.wrapping_add(1).max(1);
        Ok(MeshPacket::blank(self.next_id, self.local))
    }

    fn enqueue(&mut self, packet: MeshPacket) {
        if let Err(e) = self.tx.send(packet) {
            warn!(
                "Dropping packet 0x{:08x} from {}: router channel closed",
                e.0.id, self.local
            );
        }
    }
}

/// Counters kept by [`SimMesh`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
}

/// Single-hop broadcast medium shared by every attached node.
pub struct SimMesh {
    tx: mpsc::UnboundedSender<MeshPacket>,
    rx: mpsc::UnboundedReceiver<MeshPacket>,
    nodes: Vec<NodeId>,
    loss: f64,
    duplicate: f64,
    rng: StdRng,
    stats: SimStats,
}

impl SimMesh {
    /// `loss` and `duplicate` are per-recipient probabilities in `0.0..=1.0`.
    pub fn new(loss: f64, duplicate: f64, seed: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            nodes: Vec::new(),
            loss: loss.clamp(0.0, 1.0),
            duplicate: duplicate.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
            stats: SimStats::default(),
        }
    }

    /// Register a node and hand back its transport.
    pub fn attach(&mut self, node: NodeId) -> ChannelTransport {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
        ChannelTransport::new(node, self.tx.clone())
    }

    pub fn set_loss(&mut self, loss: f64) {
        self.loss = loss.clamp(0.0, 1.0);
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Drain everything queued since the last call and return `(recipient, packet)` pairs,
    /// after loss, duplication and shuffling.
    pub fn deliver(&mut self) -> Vec<(NodeId, MeshPacket)> {
        let mut out = Vec::new();
        while let Ok(packet) = self.rx.try_recv() {
            self.stats.sent += 1;
            for &node in &self.nodes {
                if node == packet.from {
                    continue;
                }
                if packet.to != node && !packet.to.is_broadcast() {
                    continue;
                }
                if self.rng.gen_bool(self.loss) {
                    self.stats.dropped += 1;
                    trace!("sim: dropped 0x{:08x} {} -> {}", packet.id, packet.from, node);
                    continue;
                }
                out.push((node, packet.clone()));
                self.stats.delivered += 1;
                if self.rng.gen_bool(self.duplicate) {
                    out.push((node, packet.clone()));
                    self.stats.duplicated += 1;
                }
            }
        }
        if out.len() > 1 {
            out.shuffle(&mut self.rng);
        }
        if !out.is_empty() {
            debug!("sim: delivering {} packet(s)", out.len());
        }
        out
    }
}
