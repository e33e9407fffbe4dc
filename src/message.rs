//! # BitTorrent Peer Wire Messages
//!
//! This module defines the message types and serialization for the BitTorrent
//! peer wire protocol. All communication between peers after the handshake
//! uses these messages.
//!
//! ## Message Structure
//!
//! ```text
//! <length prefix><message ID><payload>
//! ```
//!
//! - **Length Prefix**: 4 bytes (big-endian u32) - Length of message ID + payload
//! - **Message ID**: 1 byte - Identifies the message type
//! - **Payload**: Variable length - Message-specific data
//!
//! ## Message Types
//!
//! | ID | Name | Payload |
//! |----|------|---------|
//! | 0 | CHOKE | none |
//! | 1 | UNCHOKE | none |
//! | 2 | INTERESTED | none |
//! | 3 | NOT INTERESTED | none |
//! | 4 | HAVE | piece index |
//! | 5 | BITFIELD | raw bitfield |
//! | 6 | REQUEST | index, begin, length |
//! | 7 | PIECE | index, begin, block |
//! | 8 | CANCEL | index, begin, length |
//!
//! ## Keep-Alive Messages
//!
//! A length prefix of 0 is a keep-alive: no ID, no payload. Reading one
//! yields `None` rather than a message.

use crate::error::{Error, Result};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use std::io::Read;

type MessageId = u8;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
pub const MESSAGE_CANCEL: MessageId = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::Choke => MESSAGE_CHOKE,
            Message::Unchoke => MESSAGE_UNCHOKE,
            Message::Interested => MESSAGE_INTERESTED,
            Message::NotInterested => MESSAGE_NOT_INTERESTED,
            Message::Have(_) => MESSAGE_HAVE,
            Message::Bitfield(_) => MESSAGE_BITFIELD,
            Message::Request { .. } => MESSAGE_REQUEST,
            Message::Piece { .. } => MESSAGE_PIECE,
            Message::Cancel { .. } => MESSAGE_CANCEL,
        }
    }

    /// Serialize message, length prefix included.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut payload: Vec<u8> = vec![];

        match self {
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {}
            Message::Have(index) => payload.write_u32::<BigEndian>(*index)?,
            Message::Bitfield(bits) => payload.extend_from_slice(bits),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            } => {
                payload.write_u32::<BigEndian>(*index)?;
                payload.write_u32::<BigEndian>(*begin)?;
                payload.write_u32::<BigEndian>(*length)?;
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                payload.write_u32::<BigEndian>(*index)?;
                payload.write_u32::<BigEndian>(*begin)?;
                payload.extend_from_slice(block);
            }
        }

        let mut serialized: Vec<u8> = Vec::with_capacity(5 + payload.len());
        serialized.write_u32::<BigEndian>(1 + payload.len() as u32)?;
        serialized.push(self.id());
        serialized.append(&mut payload);

        Ok(serialized)
    }
}

/// Deserialize a message body (message ID + payload, length prefix stripped).
///
/// # Errors
///
/// Returns [`Error::MalformedMessage`] when the body is empty, the ID is
/// unknown, or the payload does not have the shape its ID requires.
pub fn deserialize_message(message_buf: &[u8]) -> Result<Message> {
    let (&id, payload) = message_buf
        .split_first()
        .ok_or_else(|| Error::MalformedMessage("empty message".into()))?;

    let message = match id {
        MESSAGE_CHOKE => Message::Choke,
        MESSAGE_UNCHOKE => Message::Unchoke,
        MESSAGE_INTERESTED => Message::Interested,
        MESSAGE_NOT_INTERESTED => Message::NotInterested,
        MESSAGE_HAVE => {
            if payload.len() != 4 {
                return Err(Error::MalformedMessage(format!(
                    "MESSAGE_HAVE payload of {} bytes",
                    payload.len()
                )));
            }
            Message::Have(BigEndian::read_u32(payload))
        }
        MESSAGE_BITFIELD => Message::Bitfield(payload.to_vec()),
        MESSAGE_REQUEST | MESSAGE_CANCEL => {
            if payload.len() != 12 {
                return Err(Error::MalformedMessage(format!(
                    "message {} payload of {} bytes",
                    id,
                    payload.len()
                )));
            }
            let index = BigEndian::read_u32(&payload[0..4]);
            let begin = BigEndian::read_u32(&payload[4..8]);
            let length = BigEndian::read_u32(&payload[8..12]);
            if id == MESSAGE_REQUEST {
                Message::Request {
                    index,
                    begin,
                    length,
                }
            } else {
                Message::Cancel {
                    index,
                    begin,
                    length,
                }
            }
        }
        MESSAGE_PIECE => {
            if payload.len() < 8 {
                return Err(Error::MalformedMessage(format!(
                    "MESSAGE_PIECE payload of {} bytes",
                    payload.len()
                )));
            }
            Message::Piece {
                index: BigEndian::read_u32(&payload[0..4]),
                begin: BigEndian::read_u32(&payload[4..8]),
                block: payload[8..].to_vec(),
            }
        }
        _ => {
            return Err(Error::MalformedMessage(format!(
                "unknown message id {}",
                id
            )))
        }
    };

    Ok(message)
}

/// Read the next message from a stream.
///
/// Blocks on the 4-byte length prefix, then on exactly that many bytes.
/// Returns `None` for a keep-alive.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<Message>> {
    let message_len = reader
        .read_u32::<BigEndian>()
        .map_err(Error::from_io)? as usize;

    if message_len == 0 {
        return Ok(None);
    }

    let mut message_buf: Vec<u8> = vec![0; message_len];
    reader
        .read_exact(&mut message_buf)
        .map_err(Error::from_io)?;

    deserialize_message(&message_buf).map(Some)
}

/// Extract the piece index of a HAVE message.
pub fn parse_have(message: &Message) -> Result<u32> {
    match message {
        Message::Have(index) => Ok(*index),
        other => Err(Error::MalformedMessage(format!(
            "expected MESSAGE_HAVE, got message {}",
            other.id()
        ))),
    }
}

/// Copy the block of a PIECE message into the piece buffer.
///
/// Returns the number of bytes copied. Overlapping or retransmitted blocks
/// are copied again as they come.
///
/// # Errors
///
/// - [`Error::MalformedMessage`] if `message` is not a PIECE.
/// - [`Error::Protocol`] if the block belongs to another piece.
/// - [`Error::OutOfBounds`] if `begin` or the block tail falls outside `buf`.
pub fn parse_piece(index: u32, buf: &mut [u8], message: &Message) -> Result<usize> {
    let (piece_index, begin, block) = match message {
        Message::Piece {
            index,
            begin,
            block,
        } => (*index, *begin as usize, block),
        other => {
            return Err(Error::MalformedMessage(format!(
                "expected MESSAGE_PIECE, got message {}",
                other.id()
            )))
        }
    };

    if piece_index != index {
        return Err(Error::Protocol(format!(
            "expected piece {}, received piece {}",
            index, piece_index
        )));
    }

    let out_of_bounds = Error::OutOfBounds {
        begin,
        length: block.len(),
        piece_length: buf.len(),
    };
    if begin >= buf.len() {
        return Err(out_of_bounds);
    }
    match begin.checked_add(block.len()) {
        Some(end) if end <= buf.len() => {
            buf[begin..end].copy_from_slice(block);
            Ok(block.len())
        }
        _ => Err(out_of_bounds),
    }
}
