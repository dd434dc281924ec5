//! The swarm engine: a PEX node over a non-blocking UDP socket, driven by
//! repeated `poll` calls from outside. One poll runs broadcast, inbound
//! drain, and retransmission, in that order, and never blocks.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Instant;

use tracing::{debug, info, trace};

use crate::config::NodeConfig;
use crate::identity::{IdentityError, PeerId};
use crate::peers::PeerRegistry;
use crate::retransmit::{RetransmitQueue, RetryOutcome};
use crate::wire::{self, Packet, PacketType};

/// Handler invoked with `(source peer, payload)` for every accepted MESSAGE.
pub type ReceiveHandler = Box<dyn FnMut(&PeerId, &[u8]) + Send>;

/// A node in some flavor of swarm network. Every swarm strategy must at
/// least expose the set of peers it currently knows about.
pub trait SwarmNode {
    fn known_peers(&self) -> Vec<PeerId>;
}

/// Outcome surfaced by `poll` that is not tied to any synchronous call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// A tracked send exhausted its backoff schedule without an ACK.
    /// Reported exactly once per send.
    DeliveryFailed { peer: PeerId, packet_id: u16 },
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    MalformedPeerId(#[from] IdentityError),
    #[error("no known peer with id {0}")]
    InaccessiblePeer(PeerId),
    #[error(transparent)]
    Encode(#[from] wire::EncodeError),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// A peer-exchange swarm node. All state lives behind whatever exclusion
/// domain the driver provides; the node itself spawns no threads and takes
/// no locks.
pub struct PexNode {
    config: NodeConfig,
    socket: UdpSocket,
    peers: PeerRegistry,
    retransmit: RetransmitQueue,
    /// `None` until the first poll, so the first poll broadcasts immediately.
    last_broadcast: Option<Instant>,
    receive_handler: Option<ReceiveHandler>,
}

impl PexNode {
    /// Bind the UDP endpoint and set it up for non-blocking reads, plus
    /// datagram broadcast when discovery is enabled.
    pub fn bind(config: NodeConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind((config.bind_ip, config.port))?;
        socket.set_nonblocking(true)?;
        if config.broadcast {
            socket.set_broadcast(true)?;
        }
        let retransmit = RetransmitQueue::new(config.backoff.clone());
        Ok(Self {
            config,
            socket,
            peers: PeerRegistry::new(),
            retransmit,
            last_broadcast: None,
            receive_handler: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Install the application's receive handler for MESSAGE packets.
    pub fn set_receive_handler(&mut self, handler: ReceiveHandler) {
        self.receive_handler = Some(handler);
    }

    pub fn peer_registry(&self) -> &PeerRegistry {
        &self.peers
    }

    /// Number of sends still awaiting acknowledgment.
    pub fn pending_send_count(&self) -> usize {
        self.retransmit.len()
    }

    /// One engine cycle: broadcast tick, inbound drain, retransmission tick.
    /// Returns immediately when there is nothing to do.
    pub fn poll(&mut self) -> Vec<PollEvent> {
        let now = Instant::now();
        let mut events = Vec::new();
        self.broadcast_tick(now);
        self.drain_inbound(now);
        self.retransmit_tick(now, &mut events);
        events
    }

    /// Register a peer by address and ping it to begin liveness tracking.
    /// Idempotent for an address already known.
    pub fn add_peer(&mut self, ip: IpAddr, port: u16) -> Result<PeerId, SendError> {
        let addr = SocketAddr::new(ip, port);
        let id = PeerId::from_addr(&addr);
        if self.peers.contains(&id) {
            return Ok(id);
        }
        let record = self.peers.get_or_create(addr, Instant::now());
        let packet_id = record.next_packet_id();
        let ping = wire::encode_packet(&self.config, PacketType::Ping, packet_id, &[])?;
        self.socket.send_to(&ping, addr)?;
        info!(peer = %id, %addr, "added peer");
        Ok(id)
    }

    /// Send a message to a known peer, identified by its textual id, and
    /// track it for retransmission. Does not wait for the ACK; a failed
    /// delivery surfaces later as a `PollEvent::DeliveryFailed`.
    pub fn send_message(&mut self, peer: &str, payload: &[u8]) -> Result<u16, SendError> {
        let id = PeerId::parse(peer)?;
        let record = self
            .peers
            .lookup_mut(&id)
            .ok_or_else(|| SendError::InaccessiblePeer(id.clone()))?;
        let addr = record.addr();
        let packet_id = record.next_packet_id();
        let packet = wire::encode_packet(&self.config, PacketType::Message, packet_id, payload)?;
        self.socket.send_to(&packet, addr)?;
        self.retransmit
            .track(id, packet_id, payload.to_vec(), Instant::now());
        Ok(packet_id)
    }

    /// Push our known peer addresses to the given peer as a PEX packet.
    pub fn send_peer_exchange(&mut self, peer: &PeerId) -> Result<(), SendError> {
        let record = self
            .peers
            .lookup(peer)
            .ok_or_else(|| SendError::InaccessiblePeer(peer.clone()))?;
        self.send_peer_exchange_to(record.addr())
    }

    fn send_peer_exchange_to(&self, dest: SocketAddr) -> Result<(), SendError> {
        let addrs: Vec<SocketAddr> = self
            .peers
            .iter()
            .map(|r| r.addr())
            .filter(|a| *a != dest)
            .collect();
        if addrs.is_empty() {
            return Ok(());
        }
        let payload = wire::encode_peer_list(&self.config, &addrs);
        let packet = wire::encode_packet(&self.config, PacketType::Pex, 0, &payload)?;
        self.socket.send_to(&packet, dest)?;
        Ok(())
    }

    fn broadcast_tick(&mut self, now: Instant) {
        if !self.config.broadcast {
            return;
        }
        let due = match self.last_broadcast {
            None => true,
            Some(t) => now.duration_since(t) >= self.config.broadcast_interval,
        };
        if !due {
            return;
        }
        self.last_broadcast = Some(now);
        let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.config.port);
        // Empty ping, id 0; broadcast pings are not tracked for retry.
        match wire::encode_packet(&self.config, PacketType::Ping, 0, &[]) {
            Ok(packet) => {
                if let Err(e) = self.socket.send_to(&packet, dest) {
                    debug!(error = %e, "broadcast ping failed");
                }
            }
            Err(e) => debug!(error = %e, "broadcast ping encode failed"),
        }
    }

    fn drain_inbound(&mut self, now: Instant) {
        let mut buf = vec![0u8; self.config.max_datagram];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => match wire::decode_packet(&self.config, &buf[..len]) {
                    Some(packet) => self.handle_packet(from, packet, now),
                    None => trace!(%from, len, "dropping malformed datagram"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "socket read error");
                    break;
                }
            }
        }
    }

    fn handle_packet(&mut self, from: SocketAddr, packet: Packet, now: Instant) {
        let known = self.peers.contains(&PeerId::from_addr(&from));
        let record = self.peers.get_or_create(from, now);
        record.touch(now);
        let peer = record.id().clone();
        if !known {
            info!(%peer, %from, "discovered peer");
        }
        match packet.kind {
            PacketType::Message => {
                // Ack first so the sender stops retransmitting even if the
                // handler is slow.
                self.send_ack(from, packet.packet_id);
                if let Some(handler) = self.receive_handler.as_mut() {
                    handler(&peer, &packet.payload);
                }
            }
            PacketType::Ack => {
                // Unmatched ACKs are expected noise: the peer may re-ACK a
                // send we already cleared.
                let _ = self.retransmit.acknowledge(&peer, packet.packet_id);
            }
            PacketType::Ping => {
                self.send_ack(from, packet.packet_id);
                if !known {
                    // A new peer just introduced itself; share what we know.
                    if let Err(e) = self.send_peer_exchange_to(from) {
                        debug!(%peer, error = %e, "peer exchange send failed");
                    }
                }
            }
            PacketType::Pex => match wire::decode_peer_list(&packet.payload) {
                Some(addrs) => {
                    for addr in addrs {
                        self.peers.get_or_create(addr, now);
                    }
                }
                None => trace!(%peer, "dropping malformed peer exchange payload"),
            },
        }
    }

    fn send_ack(&self, to: SocketAddr, packet_id: u16) {
        match wire::encode_packet(&self.config, PacketType::Ack, packet_id, &[]) {
            Ok(packet) => {
                if let Err(e) = self.socket.send_to(&packet, to) {
                    debug!(%to, error = %e, "ack send failed");
                }
            }
            Err(e) => debug!(error = %e, "ack encode failed"),
        }
    }

    fn retransmit_tick(&mut self, now: Instant, events: &mut Vec<PollEvent>) {
        for (peer, packet_id, payload) in self.retransmit.due_for_retry(now) {
            if let Some(record) = self.peers.lookup(&peer) {
                // Same packet id on every resend so one ACK clears it.
                if let Ok(packet) =
                    wire::encode_packet(&self.config, PacketType::Message, packet_id, &payload)
                {
                    let _ = self.socket.send_to(&packet, record.addr());
                }
            }
            if self.retransmit.advance(&peer, packet_id, now) == RetryOutcome::Exhausted {
                debug!(%peer, packet_id, "delivery failed after final retry");
                events.push(PollEvent::DeliveryFailed { peer, packet_id });
            }
        }
    }
}

impl SwarmNode for PexNode {
    fn known_peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|r| r.id().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn test_config() -> NodeConfig {
        NodeConfig {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            broadcast: false,
            ..NodeConfig::default()
        }
    }

    fn bind_node() -> (PexNode, SocketAddr) {
        let node = PexNode::bind(test_config()).unwrap();
        let addr = node.local_addr().unwrap();
        (node, addr)
    }

    /// Poll both nodes until `pred` holds or a deadline passes.
    fn poll_until(
        a: &mut PexNode,
        b: &mut PexNode,
        mut pred: impl FnMut(&PexNode, &PexNode) -> bool,
    ) -> Vec<PollEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            events.extend(a.poll());
            events.extend(b.poll());
            if pred(a, b) {
                return events;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached before deadline; events: {events:?}");
    }

    #[test]
    fn add_peer_ping_ack_exchange() {
        let (mut a, a_addr) = bind_node();
        let (mut b, b_addr) = bind_node();

        let b_id = a.add_peer(b_addr.ip(), b_addr.port()).unwrap();
        assert_eq!(b_id, PeerId::from_addr(&b_addr));
        // Pings are not tracked for retry; only MESSAGE sends are.
        assert_eq!(a.pending_send_count(), 0);

        let a_id = PeerId::from_addr(&a_addr);
        poll_until(&mut a, &mut b, |_, b| b.known_peers().contains(&a_id));
        // B acked the ping; draining it must not create retry state on A.
        poll_until(&mut a, &mut b, |a, _| a.pending_send_count() == 0);
        assert!(a.known_peers().contains(&b_id));
    }

    #[test]
    fn add_peer_is_idempotent() {
        let (mut a, _) = bind_node();
        let (_b, b_addr) = bind_node();
        let first = a.add_peer(b_addr.ip(), b_addr.port()).unwrap();
        let second = a.add_peer(b_addr.ip(), b_addr.port()).unwrap();
        assert_eq!(first, second);
        assert_eq!(a.peer_registry().len(), 1);
    }

    #[test]
    fn message_is_delivered_and_acked() {
        let (mut a, a_addr) = bind_node();
        let (mut b, b_addr) = bind_node();

        let (tx, rx) = mpsc::channel();
        b.set_receive_handler(Box::new(move |peer, payload| {
            tx.send((peer.clone(), payload.to_vec())).unwrap();
        }));

        let b_id = a.add_peer(b_addr.ip(), b_addr.port()).unwrap();
        a.send_message(b_id.as_str(), b"hello swarm").unwrap();
        assert_eq!(a.pending_send_count(), 1);

        poll_until(&mut a, &mut b, |a, _| a.pending_send_count() == 0);
        let (from, payload) = rx.try_recv().unwrap();
        assert_eq!(from, PeerId::from_addr(&a_addr));
        assert_eq!(payload, b"hello swarm");
    }

    #[test]
    fn send_to_unknown_peer_fails() {
        let (mut a, _) = bind_node();
        let unknown = PeerId::derive("203.0.113.9", 4141);
        match a.send_message(unknown.as_str(), b"hi") {
            Err(SendError::InaccessiblePeer(id)) => assert_eq!(id, unknown),
            other => panic!("expected InaccessiblePeer, got {other:?}"),
        }
        assert_eq!(a.pending_send_count(), 0);
    }

    #[test]
    fn send_with_malformed_id_fails() {
        let (mut a, _) = bind_node();
        assert!(matches!(
            a.send_message("not-a-peer-id", b"hi"),
            Err(SendError::MalformedPeerId(_))
        ));
        let upper = format!("ABCDEF{}", "0".repeat(58));
        assert!(matches!(
            a.send_message(&upper, b"hi"),
            Err(SendError::MalformedPeerId(_))
        ));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let (mut a, _) = bind_node();
        let (_b, b_addr) = bind_node();
        let b_id = a.add_peer(b_addr.ip(), b_addr.port()).unwrap();
        assert!(matches!(
            a.send_message(b_id.as_str(), &vec![0u8; 1018]),
            Err(SendError::Encode(wire::EncodeError::PayloadTooLarge { .. }))
        ));
        assert_eq!(a.pending_send_count(), 0);
    }

    #[test]
    fn garbage_datagrams_are_dropped_silently() {
        let (mut a, a_addr) = bind_node();
        let noise = UdpSocket::bind("127.0.0.1:0").unwrap();
        noise.send_to(b"junk", a_addr).unwrap();
        noise.send_to(b"seth\x09\x00\x01", a_addr).unwrap(); // unknown type
        noise.send_to(b"", a_addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let events = a.poll();
        assert!(events.is_empty());
        assert!(a.known_peers().is_empty());
    }

    #[test]
    fn pex_payload_merges_into_registry() {
        let (mut a, a_addr) = bind_node();
        let cfg = NodeConfig::default();
        let gossiped: Vec<SocketAddr> =
            vec!["10.0.0.2:4141".parse().unwrap(), "10.0.0.3:4141".parse().unwrap()];
        let payload = wire::encode_peer_list(&cfg, &gossiped);
        let packet = wire::encode_packet(&cfg, PacketType::Pex, 0, &payload).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&packet, a_addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        a.poll();

        let known = a.known_peers();
        assert!(known.contains(&PeerId::from_addr(&sender.local_addr().unwrap())));
        for addr in &gossiped {
            assert!(known.contains(&PeerId::from_addr(addr)));
        }
    }

    #[test]
    fn ping_from_new_peer_triggers_peer_exchange() {
        let (mut a, a_addr) = bind_node();
        // A already knows one peer, so it has something to gossip.
        a.add_peer("10.0.0.2".parse().unwrap(), 4141).unwrap();

        let cfg = NodeConfig::default();
        let ping = wire::encode_packet(&cfg, PacketType::Ping, 3, &[]).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&ping, a_addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        a.poll();

        // First reply is the ACK with the ping's packet id.
        let mut buf = [0u8; 1024];
        sender
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let (len, _) = sender.recv_from(&mut buf).unwrap();
        let ack = wire::decode_packet(&cfg, &buf[..len]).unwrap();
        assert_eq!(ack.kind, PacketType::Ack);
        assert_eq!(ack.packet_id, 3);

        // Then the PEX packet carrying A's known addresses.
        let (len, _) = sender.recv_from(&mut buf).unwrap();
        let pex = wire::decode_packet(&cfg, &buf[..len]).unwrap();
        assert_eq!(pex.kind, PacketType::Pex);
        let addrs = wire::decode_peer_list(&pex.payload).unwrap();
        assert!(addrs.contains(&"10.0.0.2:4141".parse().unwrap()));
    }

    #[test]
    fn unacknowledged_message_eventually_fails() {
        let mut cfg = test_config();
        cfg.backoff = vec![Duration::from_millis(1); 4];
        let mut a = PexNode::bind(cfg).unwrap();

        // A peer that will never answer: bind a socket to claim a port, then
        // drop it before the sends go out.
        let dead_port = {
            let tmp = UdpSocket::bind("127.0.0.1:0").unwrap();
            tmp.local_addr().unwrap().port()
        };
        let dead_id = a.add_peer("127.0.0.1".parse().unwrap(), dead_port).unwrap();
        let packet_id = a.send_message(dead_id.as_str(), b"anyone there?").unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut failures = Vec::new();
        while Instant::now() < deadline && failures.is_empty() {
            failures.extend(a.poll());
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(
            failures,
            vec![PollEvent::DeliveryFailed {
                peer: dead_id,
                packet_id
            }]
        );
        assert_eq!(a.pending_send_count(), 0);

        // Reported once, then the send is gone for good.
        for _ in 0..5 {
            assert!(a.poll().is_empty());
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}
