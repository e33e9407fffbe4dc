//! # Download Engine Errors
//!
//! Every fallible operation of the download engine returns [`Result`].
//! Variants fall into a few families that drive how failures propagate:
//!
//! - **Transport** (`Transport`, `Timeout`): the connection is unusable, the
//!   worker requeues its piece and exits.
//! - **Protocol** (`Protocol`, `MalformedMessage`, `OutOfBounds`): the peer
//!   misbehaved, handled like a transport failure.
//! - **Integrity** (`Integrity`): one piece failed verification, the worker
//!   requeues it and keeps the connection.
//! - **Discovery** (`Discovery`, `Http`, `Bencode`, `TrackerFailure`): one
//!   tracker endpoint failed, discovery moves on to the next one.
//! - **Fatal** (`SwarmExhausted`): nobody is left to download from.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("block out of bounds: begin {begin}, length {length}, piece length {piece_length}")]
    OutOfBounds {
        begin: usize,
        length: usize,
        piece_length: usize,
    },

    #[error("piece {0} failed integrity check")]
    Integrity(u32),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not decode tracker response: {0}")]
    Bencode(#[from] serde_bencode::Error),

    #[error("tracker returned error: {0}")]
    TrackerFailure(String),

    #[error("swarm exhausted: {0}")]
    SwarmExhausted(&'static str),
}

impl Error {
    /// Whether the failure only concerns the piece that was being verified,
    /// leaving the connection usable.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }

    /// Maps socket timeouts to [`Error::Timeout`], other I/O failures to
    /// [`Error::Transport`].
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Transport(err),
        }
    }
}
