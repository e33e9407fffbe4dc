//! # Runtime Configuration
//!
//! Tunables for peer discovery and the download engine. Defaults match what
//! public trackers and peers expect; the command line overrides a subset.

use std::time::Duration;

/// Default port announced to trackers.
pub const DEFAULT_PORT: u16 = 6881;

/// Default number of peers to gather before discovery stops.
pub const DEFAULT_TARGET_PEERS: usize = 30;

/// Largest block requested in a single REQUEST message (16KB).
pub const BLOCK_SIZE_MAX: u32 = 16384;

/// Maximum number of unfulfilled block requests per piece.
pub const BACKLOG_MAX: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port announced to trackers
    pub port: u16,
    /// Stop querying trackers once this many unique peers are known
    pub target_peers: usize,
    /// Bound on establishing the TCP connection to a peer
    pub connect_timeout: Duration,
    /// Bound on each read while exchanging handshake and bitfield
    pub handshake_timeout: Duration,
    /// Deadline for downloading one whole piece
    pub piece_timeout: Duration,
    /// Bound on a stream tracker request
    pub http_timeout: Duration,
    /// Bound on each datagram tracker round trip
    pub udp_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            target_peers: DEFAULT_TARGET_PEERS,
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(5),
            piece_timeout: Duration::from_secs(30),
            http_timeout: Duration::from_secs(15),
            udp_timeout: Duration::from_secs(4),
        }
    }
}
