//! Packet framing: 4 magic bytes + type byte + big-endian u16 packet id +
//! opaque payload. Also the PEX peer-list payload codec.

use std::net::{IpAddr, SocketAddr};

use crate::config::NodeConfig;

/// Fixed size of the packet header (magic + type + packet id).
pub const HEADER_SIZE: usize = 7;

const PEX_TAG_V4: u8 = 4;
const PEX_TAG_V6: u8 = 6;

/// Wire-level packet type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Message = 0,
    Ack = 1,
    Ping = 2,
    Pex = 3,
}

impl PacketType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PacketType::Message),
            1 => Some(PacketType::Ack),
            2 => Some(PacketType::Ping),
            3 => Some(PacketType::Pex),
            _ => None,
        }
    }
}

/// A decoded packet. Exists only between decode and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub packet_id: u16,
    pub payload: Vec<u8>,
}

/// Error encoding a packet. No fragmentation: an oversized payload is
/// rejected before any network I/O.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("payload of {len} bytes exceeds datagram capacity of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Largest payload that fits in one datagram under `config`.
pub fn max_payload(config: &NodeConfig) -> usize {
    config.max_datagram.saturating_sub(HEADER_SIZE)
}

/// Encode a packet into a single datagram.
pub fn encode_packet(
    config: &NodeConfig,
    kind: PacketType,
    packet_id: u16,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    if HEADER_SIZE + payload.len() > config.max_datagram {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            max: max_payload(config),
        });
    }
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&config.magic);
    out.push(kind as u8);
    out.extend_from_slice(&packet_id.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode one datagram. Returns `None` for anything malformed (short input,
/// wrong magic, unknown type); the wire carries noise and callers drop such
/// datagrams silently rather than erroring.
pub fn decode_packet(config: &NodeConfig, bytes: &[u8]) -> Option<Packet> {
    if bytes.len() < HEADER_SIZE || bytes[..4] != config.magic {
        return None;
    }
    let kind = PacketType::from_byte(bytes[4])?;
    let packet_id = u16::from_be_bytes([bytes[5], bytes[6]]);
    Some(Packet {
        kind,
        packet_id,
        payload: bytes[HEADER_SIZE..].to_vec(),
    })
}

/// Encode a peer address list for a PEX payload: u8 count, then per entry a
/// family tag (4 or 6), the raw address bytes, and a big-endian port. Entries
/// that would overflow the datagram or the count byte are dropped.
pub fn encode_peer_list(config: &NodeConfig, addrs: &[SocketAddr]) -> Vec<u8> {
    let budget = max_payload(config);
    let mut out = vec![0u8];
    let mut count: u8 = 0;
    for addr in addrs {
        let entry_len = match addr.ip() {
            IpAddr::V4(_) => 1 + 4 + 2,
            IpAddr::V6(_) => 1 + 16 + 2,
        };
        if out.len() + entry_len > budget || count == u8::MAX {
            break;
        }
        match addr.ip() {
            IpAddr::V4(ip) => {
                out.push(PEX_TAG_V4);
                out.extend_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                out.push(PEX_TAG_V6);
                out.extend_from_slice(&ip.octets());
            }
        }
        out.extend_from_slice(&addr.port().to_be_bytes());
        count += 1;
    }
    out[0] = count;
    out
}

/// Decode a PEX payload. Returns `None` on truncation or an unknown family
/// tag; trailing bytes after the last entry are ignored.
pub fn decode_peer_list(bytes: &[u8]) -> Option<Vec<SocketAddr>> {
    let (&count, mut rest) = bytes.split_first()?;
    let mut addrs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (&tag, tail) = rest.split_first()?;
        let addr_len = match tag {
            PEX_TAG_V4 => 4,
            PEX_TAG_V6 => 16,
            _ => return None,
        };
        if tail.len() < addr_len + 2 {
            return None;
        }
        let ip: IpAddr = match tag {
            PEX_TAG_V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&tail[..4]);
                IpAddr::from(octets)
            }
            _ => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&tail[..16]);
                IpAddr::from(octets)
            }
        };
        let port = u16::from_be_bytes([tail[addr_len], tail[addr_len + 1]]);
        addrs.push(SocketAddr::new(ip, port));
        rest = &tail[addr_len + 2..];
    }
    Some(addrs)
}
