//! # BitTorrent Peer Information
//!
//! This module defines the `Peer` address type and parses the compact peer
//! lists returned by trackers.
//!
//! ## Compact Peer Format
//!
//! The compact format consists of 6-byte entries:
//!
//! ```text
//! <IP: 4 bytes><Port: 2 bytes>
//! ```
//!
//! - IP address in network byte order (big-endian)
//! - Port number in network byte order (big-endian)
//!
//! Two peers are the same peer when their `ip:port` forms are equal, which is
//! what trackers deduplicate on.

use crate::error::{Error, Result};

use byteorder::{BigEndian, ByteOrder};

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

const PEER_SIZE: usize = 6;

/// Represents a BitTorrent peer in the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    /// IPv4 address of the peer
    pub ip: Ipv4Addr,
    /// Port number for connecting to the peer
    pub port: u16,
}

impl Peer {
    pub fn new(ip: Ipv4Addr, port: u16) -> Peer {
        Peer { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<SocketAddrV4> for Peer {
    fn from(addr: SocketAddrV4) -> Self {
        Peer::new(*addr.ip(), addr.port())
    }
}

/// Parses a compact peer list from a tracker response.
///
/// # Errors
///
/// Returns [`Error::Discovery`] if the length is not a multiple of 6 bytes.
///
/// # Example
///
/// ```rust,ignore
/// use crate::peer::parse_compact_peers;
///
/// let peer_data = [192, 168, 1, 1, 0, 80, 192, 168, 1, 2, 0, 80];
/// let peers = parse_compact_peers(&peer_data).unwrap();
/// assert_eq!(peers.len(), 2);
/// assert_eq!(peers[0].to_string(), "192.168.1.1:80");
/// ```
pub fn parse_compact_peers(tracker_peers: &[u8]) -> Result<Vec<Peer>> {
    if tracker_peers.len() % PEER_SIZE != 0 {
        return Err(Error::Discovery(format!(
            "received malformed peers of length {}",
            tracker_peers.len()
        )));
    }

    let peers = tracker_peers
        .chunks_exact(PEER_SIZE)
        .map(|chunk| {
            Peer::new(
                Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
                BigEndian::read_u16(&chunk[4..6]),
            )
        })
        .collect();

    Ok(peers)
}
