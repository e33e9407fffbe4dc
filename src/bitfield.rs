//! # Peer Bitfield
//!
//! Compact record of which pieces a remote peer has announced.
//!
//! ```text
//! Byte 0: [piece 0, 1, 2, 3, 4, 5, 6, 7]   (MSB first)
//! Byte 1: [piece 8, 9, 10, 11, 12, 13, 14, 15]
//! ...
//! ```
//!
//! Indices past the end of the allocated bytes are simply "absent": a short
//! or malformed bitfield from a misbehaving peer never turns into a fault.

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
}

impl Bitfield {
    /// Build a bitfield with room for `piece_count` pieces, none of them set.
    pub fn with_pieces(piece_count: usize) -> Self {
        Bitfield {
            bits: vec![0; piece_count.div_ceil(8)],
        }
    }

    /// Build a bitfield from the raw payload of a BITFIELD message.
    pub fn from_bytes(bits: Vec<u8>) -> Self {
        Bitfield { bits }
    }

    /// Checks if the peer has a specific piece.
    ///
    /// Returns `false` for any index outside the allocated range.
    pub fn has_piece(&self, index: u32) -> bool {
        let byte_index = (index / 8) as usize;
        let offset = index % 8;

        match self.bits.get(byte_index) {
            Some(&byte) => byte >> (7 - offset) & 1 != 0,
            None => false,
        }
    }

    /// Marks a piece as available.
    ///
    /// Out of range indices are ignored, the bitfield never grows.
    pub fn set_piece(&mut self, index: u32) {
        let byte_index = (index / 8) as usize;
        let offset = index % 8;

        if let Some(byte) = self.bits.get_mut(byte_index) {
            *byte |= 1 << (7 - offset);
        }
    }

    /// Number of piece slots covered by the allocated bytes.
    pub fn capacity(&self) -> usize {
        self.bits.len() * 8
    }
}
