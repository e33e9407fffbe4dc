//! # BitTorrent Handshake Protocol
//!
//! The handshake is the protocol-identification preamble exchanged exactly
//! once per connection, before any wire message.
//!
//! ## Message Format
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte - Length `L` of the protocol string (19 for BitTorrent)
//! - **pstr**: `L` bytes - Protocol identifier ("BitTorrent protocol")
//! - **reserved**: 8 bytes - All zeros, no extension is negotiated
//! - **info_hash**: 20 bytes - Swarm identity
//! - **peer_id**: 20 bytes - Identifier of the sending peer
//!
//! The encoded handshake is always `49 + L` bytes (68 for the standard protocol).
//!
//! ## Validation
//!
//! Decoding only rejects a zero protocol length. Comparing the received
//! info hash against the expected swarm is the caller's job, see
//! [`crate::client::Client::connect`].

use crate::error::{Error, Result};

use std::io::Read;

pub const PROTOCOL_ID: &str = "BitTorrent protocol";

const RESERVED_LEN: usize = 8;
const HASH_LEN: usize = 20;

/// Represents a BitTorrent handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol identifier bytes ("BitTorrent protocol")
    pub pstr: Vec<u8>,
    /// 8 reserved bytes (all zeros when sent by us)
    pub reserved: [u8; RESERVED_LEN],
    /// 20-byte swarm identity hash
    pub info_hash: [u8; HASH_LEN],
    /// 20-byte identifier of the sending peer
    pub peer_id: [u8; HASH_LEN],
}

impl Handshake {
    /// Creates a handshake for the standard BitTorrent protocol.
    ///
    /// # Arguments
    ///
    /// * `peer_id` - 20-byte identifier for this client.
    /// * `info_hash` - 20-byte swarm identity hash.
    ///
    pub fn new(peer_id: [u8; 20], info_hash: [u8; 20]) -> Self {
        Handshake::with_protocol(PROTOCOL_ID.as_bytes().to_vec(), peer_id, info_hash)
    }

    /// Creates a handshake announcing an arbitrary protocol string.
    pub fn with_protocol(pstr: Vec<u8>, peer_id: [u8; 20], info_hash: [u8; 20]) -> Self {
        Handshake {
            pstr,
            reserved: [0; RESERVED_LEN],
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake for network transmission.
    ///
    /// Fails if the protocol string does not fit the 1-byte length prefix.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let pstrlen = u8::try_from(self.pstr.len())
            .map_err(|_| Error::Protocol("protocol string too long".into()))?;

        let mut serialized: Vec<u8> = Vec::with_capacity(49 + self.pstr.len());
        serialized.push(pstrlen);
        serialized.extend_from_slice(&self.pstr);
        serialized.extend_from_slice(&self.reserved);
        serialized.extend_from_slice(&self.info_hash);
        serialized.extend_from_slice(&self.peer_id);

        Ok(serialized)
    }

    /// Reads a handshake from a stream.
    ///
    /// Reads the 1-byte protocol length first, then exactly `48 + L`
    /// further bytes in one fixed-size read.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the protocol length is 0.
    /// - [`Error::Transport`] or [`Error::Timeout`] on any short read.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Handshake> {
        let mut len_buf = [0; 1];
        reader.read_exact(&mut len_buf).map_err(Error::from_io)?;

        let pstrlen = len_buf[0] as usize;
        if pstrlen == 0 {
            return Err(Error::Protocol(
                "invalid handshake length received from peer".into(),
            ));
        }

        let mut handshake_buf: Vec<u8> = vec![0; 48 + pstrlen];
        reader
            .read_exact(&mut handshake_buf)
            .map_err(Error::from_io)?;

        Ok(deserialize_handshake(&handshake_buf, pstrlen))
    }
}

/// Splits a received handshake body (everything after the length byte).
///
/// `buf` must hold exactly `48 + pstrlen` bytes.
fn deserialize_handshake(buf: &[u8], pstrlen: usize) -> Handshake {
    let mut reserved = [0; RESERVED_LEN];
    reserved.copy_from_slice(&buf[pstrlen..pstrlen + RESERVED_LEN]);

    let hash_start = pstrlen + RESERVED_LEN;
    let mut info_hash = [0; HASH_LEN];
    info_hash.copy_from_slice(&buf[hash_start..hash_start + HASH_LEN]);

    let id_start = hash_start + HASH_LEN;
    let mut peer_id = [0; HASH_LEN];
    peer_id.copy_from_slice(&buf[id_start..id_start + HASH_LEN]);

    Handshake {
        pstr: buf[0..pstrlen].to_vec(),
        reserved,
        info_hash,
        peer_id,
    }
}
