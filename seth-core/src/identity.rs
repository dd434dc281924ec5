//! Peer identity: a peer is named by the SHA-256 digest of its `ip:port`
//! string, rendered as 64 lowercase hex characters.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a peer id in its textual form.
pub const PEER_ID_LEN: usize = 64;

/// A validated peer identifier. Construction goes through `derive`,
/// `from_addr`, or `parse`, so a held `PeerId` is always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Derive the id for a host/port pair: SHA-256 over `"<ip>:<port>"`.
    pub fn derive(ip: &str, port: u16) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(ip.as_bytes());
        hasher.update(b":");
        hasher.update(port.to_string().as_bytes());
        PeerId(hex::encode(hasher.finalize()))
    }

    /// Derive the id for a socket address.
    pub fn from_addr(addr: &SocketAddr) -> Self {
        Self::derive(&addr.ip().to_string(), addr.port())
    }

    /// Validate an externally supplied identifier: exactly 64 lowercase hex
    /// characters, anything else is rejected before registry use.
    pub fn parse(candidate: &str) -> Result<Self, IdentityError> {
        let valid = candidate.len() == PEER_ID_LEN
            && candidate
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(PeerId(candidate.to_owned()))
        } else {
            Err(IdentityError::MalformedPeerId(candidate.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("malformed peer id: {0:?}")]
    MalformedPeerId(String),
}
