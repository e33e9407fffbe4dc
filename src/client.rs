//! # BitTorrent Peer Client
//!
//! This module implements the client side of one peer connection: the TCP
//! socket, the handshake, and the state the remote peer reports to us.
//!
//! ## Connection Setup
//!
//! 1. **Dial**: TCP connection bounded by the configured connect timeout
//! 2. **Handshake**: send ours, read theirs, reject a foreign info hash
//! 3. **Bitfield**: read one more message, expected to be the peer's
//!    BITFIELD; peers that skip it start with an empty bitfield
//!
//! ## Connection State
//!
//! - **Choked**: starts `true`; no block request may be sent until the peer
//!   unchokes us
//! - **Bitfield**: pieces the peer announced, only ever grows
//!
//! ## Deadlines
//!
//! A deadline set with [`Client::set_deadline`] bounds every following
//! [`Client::read`] as a whole, not each read individually.
//!
//! Dropping the client closes the socket.

use crate::bitfield::Bitfield;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::handshake::Handshake;
use crate::message::*;
use crate::peer::Peer;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Instant;

/// Represents a connection to a remote BitTorrent peer.
pub struct Client {
    /// Address of the remote peer
    peer: Peer,
    /// TCP stream connection to the peer
    conn: TcpStream,
    /// Pieces the peer has announced
    bitfield: Bitfield,
    /// Whether the peer has choked this client
    choked: bool,
    /// Point in time after which reads fail with a timeout
    deadline: Option<Instant>,
}

impl Client {
    /// Dials a peer and completes the handshake.
    ///
    /// # Arguments
    ///
    /// * `peer` - Address of the remote peer.
    /// * `peer_id` - 20-byte identifier of this client.
    /// * `info_hash` - 20-byte identity of the swarm we expect the peer to serve.
    /// * `piece_count` - Number of pieces, sizes the bitfield of peers that
    ///   announce with HAVE messages only.
    /// * `config` - Connect and handshake timeouts.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] or [`Error::Timeout`] if the peer cannot be reached.
    /// - [`Error::Protocol`] if the peer answers for another swarm.
    pub fn connect(
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        piece_count: usize,
        config: &Config,
    ) -> Result<Client> {
        let conn = TcpStream::connect_timeout(&peer.socket_addr(), config.connect_timeout)
            .map_err(Error::from_io)?;

        conn.set_read_timeout(Some(config.handshake_timeout))?;
        conn.set_write_timeout(Some(config.handshake_timeout))?;

        debug!("Connected to peer {}", peer);

        let mut client = Client {
            peer,
            conn,
            bitfield: Bitfield::with_pieces(piece_count),
            choked: true,
            deadline: None,
        };

        client.handshake_with_peer(peer_id, info_hash)?;
        client.read_bitfield();

        client.conn.set_read_timeout(None)?;

        Ok(client)
    }

    /// Sends our handshake and checks the one the peer answers with.
    fn handshake_with_peer(&mut self, peer_id: [u8; 20], info_hash: [u8; 20]) -> Result<()> {
        let handshake = Handshake::new(peer_id, info_hash);
        self.conn
            .write_all(&handshake.serialize()?)
            .map_err(Error::from_io)?;

        let received = Handshake::read_from(&mut self.conn)?;
        if received.info_hash != info_hash {
            return Err(Error::Protocol(format!(
                "peer {} answered for another swarm",
                self.peer
            )));
        }

        debug!("Completed handshake with peer {}", self.peer);

        Ok(())
    }

    /// Reads the message following the handshake, normally the BITFIELD.
    ///
    /// Anything going wrong leaves the bitfield empty; the connection itself
    /// is judged by the reads that follow.
    fn read_bitfield(&mut self) {
        match read_message(&mut self.conn) {
            Ok(Some(Message::Bitfield(bits))) => {
                self.bitfield = Bitfield::from_bytes(bits);
                info!(
                    "Receive MESSAGE_BITFIELD ({} slots) from peer {}",
                    self.bitfield.capacity(),
                    self.peer
                );
            }
            Ok(Some(Message::Unchoke)) => self.read_unchoke(),
            Ok(Some(message @ Message::Have(_))) => {
                if let Err(e) = self.read_have(&message) {
                    debug!("Could not read HAVE from peer {}: {}", self.peer, e);
                }
            }
            Ok(Some(message)) => {
                debug!(
                    "Peer {} sent message {} instead of MESSAGE_BITFIELD",
                    self.peer,
                    message.id()
                );
            }
            Ok(None) => debug!("Peer {} sent no bitfield", self.peer),
            Err(e) => debug!("Could not read bitfield from peer {}: {}", self.peer, e),
        }
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Returns whether this client is choked by the peer.
    pub fn is_choked(&self) -> bool {
        self.choked
    }

    /// Checks if the peer announced a specific piece.
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Bounds all following reads by `deadline`, or lifts the bound with `None`.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.deadline = deadline;
        if deadline.is_none() {
            self.conn.set_read_timeout(None)?;
        }
        Ok(())
    }

    /// Reads the next message from the peer, `None` for a keep-alive.
    pub fn read(&mut self) -> Result<Option<Message>> {
        let message = match self.deadline {
            Some(deadline) => read_message(&mut DeadlineReader {
                conn: &self.conn,
                deadline,
            })?,
            None => read_message(&mut self.conn)?,
        };
        if message.is_none() {
            info!("Receive KEEP_ALIVE from peer {}", self.peer);
        }

        Ok(message)
    }

    /// Processes a CHOKE message from the peer.
    pub fn read_choke(&mut self) {
        info!("Receive MESSAGE_CHOKE from peer {}", self.peer);
        self.choked = true
    }

    /// Processes an UNCHOKE message from the peer.
    pub fn read_unchoke(&mut self) {
        info!("Receive MESSAGE_UNCHOKE from peer {}", self.peer);
        self.choked = false
    }

    /// Processes a HAVE message from the peer and updates their bitfield.
    pub fn read_have(&mut self, message: &Message) -> Result<()> {
        let index = parse_have(message)?;
        info!("Receive MESSAGE_HAVE {} from peer {}", index, self.peer);
        self.bitfield.set_piece(index);
        Ok(())
    }

    /// Sends an UNCHOKE message to the peer.
    pub fn send_unchoke(&mut self) -> Result<()> {
        info!("Send MESSAGE_UNCHOKE to peer {}", self.peer);
        self.send(&Message::Unchoke)
    }

    /// Sends an INTERESTED message to the peer.
    pub fn send_interested(&mut self) -> Result<()> {
        info!("Send MESSAGE_INTERESTED to peer {}", self.peer);
        self.send(&Message::Interested)
    }

    /// Sends a HAVE message to notify the peer that we now have a piece.
    pub fn send_have(&mut self, index: u32) -> Result<()> {
        info!("Send MESSAGE_HAVE {} to peer {}", index, self.peer);
        self.send(&Message::Have(index))
    }

    /// Sends a REQUEST message for one block of a piece.
    ///
    /// # Arguments
    ///
    /// * `index` - Zero-based piece index
    /// * `begin` - Zero-based byte offset within the piece
    /// * `length` - Number of bytes to request (at most 16384)
    ///
    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        info!(
            "Send MESSAGE_REQUEST for piece {} [{}:{}] to peer {}",
            index,
            begin,
            begin + length,
            self.peer
        );
        self.send(&Message::Request {
            index,
            begin,
            length,
        })
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        let message_encoded = message.serialize()?;
        self.conn
            .write_all(&message_encoded)
            .map_err(Error::from_io)
    }
}

/// Reads from a connection until an absolute deadline.
///
/// Every inner read is bounded by the time left, so a peer trickling bytes
/// cannot stretch a message past the deadline.
struct DeadlineReader<'a> {
    conn: &'a TcpStream,
    deadline: Instant,
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline passed"));
        }

        self.conn.set_read_timeout(Some(remaining))?;
        let mut conn = self.conn;
        conn.read(buf)
    }
}
