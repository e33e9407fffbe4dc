//! # Peer Discovery
//!
//! Queries announce endpoints in order and merges their answers into one
//! deduplicated peer list.
//!
//! - `http://`, `https://`: bencoded response over HTTP ([`http`])
//! - `udp://`: connect/announce datagram exchange ([`udp`])
//!
//! A failing endpoint is logged and skipped. Discovery stops as soon as the
//! target peer count is reached; finding no peer at all is fatal.

mod http;
mod udp;

#[cfg(test)]
pub mod fake;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::peer::Peer;

use http::AnnounceParams;

use url::Url;

use std::collections::HashSet;
use std::time::Duration;

pub struct TrackerClient {
    /// 20-byte swarm identity hash
    info_hash: [u8; 20],
    /// 20-byte unique identifier for this client instance
    peer_id: [u8; 20],
    /// Port announced to trackers
    port: u16,
    /// Bytes still to download
    left: u64,
    http_timeout: Duration,
    udp_timeout: Duration,
}

impl TrackerClient {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], left: u64, config: &Config) -> Self {
        TrackerClient {
            info_hash,
            peer_id,
            port: config.port,
            left,
            http_timeout: config.http_timeout,
            udp_timeout: config.udp_timeout,
        }
    }

    /// Request peers from trackers.
    ///
    /// # Arguments
    ///
    /// * `tracker_urls` - Announce URLs, already deduplicated and in the order
    ///   they should be tried.
    /// * `target` - Stop once this many unique peers are known.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SwarmExhausted`] if no tracker returned any peer.
    pub fn request_peers(&self, tracker_urls: &[String], target: usize) -> Result<Vec<Peer>> {
        let mut unique_peers = HashSet::new();
        let mut peers: Vec<Peer> = vec![];

        for tracker_url in tracker_urls {
            if peers.len() >= target {
                break;
            }

            info!("Contacting tracker {} for peer list...", tracker_url);

            match self.announce(tracker_url) {
                Ok(found) => {
                    let before = peers.len();
                    peers.extend(found.into_iter().filter(|peer| unique_peers.insert(*peer)));
                    info!(
                        "Tracker {} returned {} new peers",
                        tracker_url,
                        peers.len() - before
                    );
                }
                Err(e) => warn!("Tracker {} failed: {}", tracker_url, e),
            }
        }

        if peers.is_empty() {
            return Err(Error::SwarmExhausted("could not get peers from any tracker"));
        }

        peers.truncate(target);

        Ok(peers)
    }

    /// Announce to a single tracker, the protocol chosen by URL scheme.
    pub fn announce(&self, tracker_url: &str) -> Result<Vec<Peer>> {
        let url = Url::parse(tracker_url)
            .map_err(|e| Error::Discovery(format!("could not parse tracker url: {}", e)))?;

        let params = AnnounceParams {
            info_hash: &self.info_hash,
            peer_id: &self.peer_id,
            port: self.port,
            left: self.left,
        };

        match url.scheme() {
            "http" | "https" => http::announce(&url, &params, self.http_timeout),
            "udp" => udp::announce(&url, &params, self.udp_timeout),
            scheme => Err(Error::Discovery(format!(
                "announce url scheme {} not recognized",
                scheme
            ))),
        }
    }
}
