//! # BitTorrent Piece Management
//!
//! Pieces are the verification units of a torrent. They are downloaded in
//! smaller blocks (16KB) pipelined over one connection.
//!
//! - **PieceWork**: what to download, immutable across retries
//! - **PieceProgress**: per-attempt counters and the assembly buffer
//! - **PieceResult**: a verified piece on its way to the session

use crate::error::{Error, Result};

use boring::sha::Sha1;

/// Describes one piece to download.
///
/// A failed attempt pushes the very same value back onto the work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceWork {
    /// Zero-based index of this piece in the torrent
    pub index: u32,
    /// SHA-1 hash of the piece for verification
    pub hash: [u8; 20],
    /// Length of this piece in bytes (the last piece may be shorter)
    pub length: u32,
}

/// A downloaded piece whose hash matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceResult {
    /// Zero-based index of this piece in the torrent
    pub index: u32,
    /// Verified piece data
    pub data: Vec<u8>,
}

/// Download state of a single piece attempt.
#[derive(Debug)]
pub struct PieceProgress {
    pub index: u32,
    /// Piece data buffer, sized to the piece length
    pub buf: Vec<u8>,
    /// Bytes received so far
    pub downloaded: u32,
    /// Bytes requested so far
    pub requested: u32,
    /// Requests sent but not yet fulfilled
    pub backlog: u32,
}

impl PieceWork {
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> PieceWork {
        PieceWork {
            index,
            hash,
            length,
        }
    }

    /// Check downloaded data against the expected SHA-1 hash.
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let mut hasher = Sha1::new();
        hasher.update(data);

        if hasher.finish() != self.hash {
            return Err(Error::Integrity(self.index));
        }

        Ok(())
    }
}

impl PieceProgress {
    pub fn new(work: &PieceWork) -> PieceProgress {
        PieceProgress {
            index: work.index,
            buf: vec![0; work.length as usize],
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }

    pub fn length(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.length()
    }

    /// Size of the next block request, `None` once the backlog is full or
    /// the whole piece has been requested.
    pub fn next_block(&self, block_size_max: u32, backlog_max: u32) -> Option<u32> {
        if self.backlog >= backlog_max || self.requested >= self.length() {
            return None;
        }
        Some(block_size_max.min(self.length() - self.requested))
    }

    /// Account for a request of `size` bytes at the current offset.
    pub fn record_request(&mut self, size: u32) {
        self.backlog += 1;
        self.requested += size;
    }

    /// Account for a received block of `size` bytes.
    pub fn record_block(&mut self, size: u32) {
        self.downloaded += size;
        self.backlog = self.backlog.saturating_sub(1);
    }
}

impl PieceResult {
    pub fn new(index: u32, data: Vec<u8>) -> PieceResult {
        PieceResult { index, data }
    }
}
