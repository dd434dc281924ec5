//! Per-node configuration. Protocol constants live here rather than as
//! compile-time globals so multiple nodes can coexist with independent
//! settings (the tests rely on this).

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Default UDP port for listening and broadcast discovery.
pub const DEFAULT_PORT: u16 = 4141;

/// Immutable configuration handed to `PexNode::bind`.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Local address to bind the UDP socket to.
    pub bind_ip: IpAddr,
    /// Port to listen on; broadcast pings target this port too.
    pub port: u16,
    /// Whether to announce ourselves with periodic broadcast pings.
    pub broadcast: bool,
    /// Magic bytes at the start of every packet.
    pub magic: [u8; 4],
    /// Maximum UDP datagram this node will send or receive.
    pub max_datagram: usize,
    /// Retransmission backoff schedule, one tier per resend.
    pub backoff: Vec<Duration>,
    /// Time between broadcast pings.
    pub broadcast_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            broadcast: true,
            magic: *b"seth",
            max_datagram: 1024,
            backoff: vec![
                Duration::from_millis(10),
                Duration::from_millis(100),
                Duration::from_secs(1),
                Duration::from_secs(10),
            ],
            broadcast_interval: Duration::from_secs(2),
        }
    }
}
