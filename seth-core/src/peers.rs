//! Peer records and the registry that owns them. Only the node engine
//! mutates the registry, always inside the node's exclusion domain.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use crate::identity::PeerId;

/// Everything this node knows about one peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    id: PeerId,
    addr: SocketAddr,
    next_packet_id: u16,
    last_activity: Instant,
}

impl PeerRecord {
    fn new(id: PeerId, addr: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            addr,
            next_packet_id: 0,
            last_activity: now,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Take the next packet id for this peer; wraps at 65536.
    pub fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        id
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }
}

/// The peer-id to record mapping. Records are created on first contact and
/// never evicted; `last_activity` is kept current so an eviction policy can
/// be layered on top later.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the record for an address, creating it on first contact.
    pub fn get_or_create(&mut self, addr: SocketAddr, now: Instant) -> &mut PeerRecord {
        let id = PeerId::from_addr(&addr);
        self.peers
            .entry(id.clone())
            .or_insert_with(|| PeerRecord::new(id, addr, now))
    }

    pub fn lookup(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn lookup_mut(&mut self, id: &PeerId) -> Option<&mut PeerRecord> {
        self.peers.get_mut(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Update a peer's activity time. No-op for unknown ids.
    pub fn touch(&mut self, id: &PeerId, now: Instant) {
        if let Some(record) = self.peers.get_mut(id) {
            record.touch(now);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
