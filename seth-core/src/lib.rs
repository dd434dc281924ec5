//! seth swarm protocol: packet framing, peer identity, peer records, and the
//! poll-driven PEX node. An external driver calls `poll` repeatedly; the node
//! itself never blocks and never spawns threads.

pub mod config;
pub mod identity;
pub mod node;
pub mod peers;
pub mod retransmit;
pub mod wire;

pub use config::{NodeConfig, DEFAULT_PORT};
pub use identity::{IdentityError, PeerId};
pub use node::{PexNode, PollEvent, SendError, SwarmNode};
pub use peers::{PeerRecord, PeerRegistry};
pub use retransmit::{PendingSend, RetransmitQueue, RetryOutcome};
pub use wire::{decode_packet, encode_packet, EncodeError, Packet, PacketType};
