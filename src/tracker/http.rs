//! HTTP tracker announce.
//!
//! One GET request carrying the announce parameters in the query string; the
//! body is a bencoded dictionary whose `peers` entry is a compact peer list.

use crate::error::{Error, Result};
use crate::peer::{parse_compact_peers, Peer};

use serde::Deserialize;
use serde_bencode::de;
use serde_bytes::ByteBuf;
use url::Url;

use std::time::Duration;

/// BencodeTracker structure.
#[derive(Debug, Deserialize)]
struct BencodeTracker {
    // Tracker-side refusal, no other key is meaningful when present
    #[serde(rename = "failure reason", default)]
    failure_reason: Option<String>,
    // Interval time to refresh the list of peers in seconds
    #[serde(default)]
    interval: Option<u32>,
    // Peers IP addresses
    #[serde(default)]
    peers: Option<ByteBuf>,
}

/// Parameters sent with every announce.
pub struct AnnounceParams<'a> {
    pub info_hash: &'a [u8; 20],
    pub peer_id: &'a [u8; 20],
    pub port: u16,
    pub left: u64,
}

/// Announce to an HTTP(S) tracker and return the peers it knows.
pub fn announce(announce: &Url, params: &AnnounceParams, timeout: Duration) -> Result<Vec<Peer>> {
    let full_url = build_tracker_url(announce, params);

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?;

    let response = client.get(&full_url).send()?.error_for_status()?.bytes()?;

    parse_tracker_response(&response)
}

/// Decode a bencoded tracker response body.
fn parse_tracker_response(body: &[u8]) -> Result<Vec<Peer>> {
    let tracker_bencode = de::from_bytes::<BencodeTracker>(body)?;

    if let Some(reason) = tracker_bencode.failure_reason {
        return Err(Error::TrackerFailure(reason));
    }

    if let Some(interval) = tracker_bencode.interval {
        debug!("Tracker asks for a refresh every {} seconds", interval);
    }

    let peers = tracker_bencode
        .peers
        .ok_or_else(|| Error::Discovery("tracker response has no peers".into()))?;

    parse_compact_peers(&peers)
}

/// Build tracker URL.
///
/// The query string is assembled by hand since the info hash and peer id
/// are raw bytes, not UTF-8.
fn build_tracker_url(announce: &Url, params: &AnnounceParams) -> String {
    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&compact=1&left={}",
        percent_encode_binary(params.info_hash),
        percent_encode_binary(params.peer_id),
        params.port,
        params.left
    );

    let mut url = announce.to_string();
    if url.contains('?') {
        url.push('&');
    } else {
        url.push('?');
    }
    url.push_str(&query);

    url
}

/// Each byte is encoded as %XX where XX is the hexadecimal representation
fn percent_encode_binary(data: &[u8]) -> String {
    const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(data.len() * 3);

    for &byte in data {
        encoded.push('%');
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        encoded.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
    }

    encoded
}
