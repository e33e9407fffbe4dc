//! Scripted remote peer for tests.
//!
//! Listens on loopback, accepts a single connection and serves blocks of
//! `data` the way a seeding peer would: handshake, optional bitfield, unchoke
//! on INTERESTED, one PIECE per REQUEST.
//!
//! A script can also choke mid-piece: once `n` requests are queued it sends
//! CHOKE, answers the queued requests, stays choked for a while counting any
//! REQUEST that still arrives, then sends UNCHOKE.

use crate::error::Error;
use crate::handshake::Handshake;
use crate::message::{read_message, Message};
use crate::peer::Peer;

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Clone)]
pub struct PeerScript {
    data: Vec<u8>,
    piece_length: u32,
    bitfield: Option<Vec<u8>>,
    corrupt: bool,
    close_after: Option<usize>,
    handshake_delay: Duration,
    haves: Vec<u32>,
    choke_after: Option<usize>,
    late_have: Option<u32>,
    byte_delay: Option<Duration>,
}

// How long a choking script stays choked
const CHOKE_PAUSE: Duration = Duration::from_millis(300);

impl PeerScript {
    /// A well-behaved seeder of `data`, announcing every piece.
    pub fn serving(data: Vec<u8>, piece_length: u32) -> Self {
        let pieces = data.len().div_ceil(piece_length as usize);
        let mut bits = vec![0u8; pieces.div_ceil(8)];
        for index in 0..pieces {
            bits[index / 8] |= 1 << (7 - index % 8);
        }

        PeerScript {
            data,
            piece_length,
            bitfield: Some(bits),
            corrupt: false,
            close_after: None,
            handshake_delay: Duration::ZERO,
            haves: vec![],
            choke_after: None,
            late_have: None,
            byte_delay: None,
        }
    }

    pub fn with_bitfield(mut self, bits: Vec<u8>) -> Self {
        self.bitfield = Some(bits);
        self
    }

    pub fn without_bitfield(mut self) -> Self {
        self.bitfield = None;
        self
    }

    /// Serve blocks with every byte inverted.
    pub fn corrupted(mut self) -> Self {
        self.corrupt = true;
        self
    }

    /// Drop the connection when request number `requests + 1` arrives.
    pub fn closing_after(mut self, requests: usize) -> Self {
        self.close_after = Some(requests);
        self
    }

    /// Announce pieces with HAVE messages instead of a bitfield.
    pub fn announcing_haves(mut self, indices: Vec<u32>) -> Self {
        self.bitfield = None;
        self.haves = indices;
        self
    }

    /// Choke once `requests` requests are queued, see the module docs.
    pub fn choking_after(mut self, requests: usize) -> Self {
        self.choke_after = Some(requests);
        self
    }

    /// Send HAVE `index` while choked.
    pub fn with_late_have(mut self, index: u32) -> Self {
        self.late_have = Some(index);
        self
    }

    /// Write PIECE messages one byte at a time, `delay` apart.
    pub fn trickling(mut self, delay: Duration) -> Self {
        self.byte_delay = Some(delay);
        self
    }

    /// Wait before answering the handshake.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }
}

pub struct FakePeer {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    requests_while_choked: Arc<AtomicUsize>,
}

impl FakePeer {
    pub fn spawn(info_hash: [u8; 20], script: PeerScript) -> FakePeer {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let requests_while_choked = Arc::new(AtomicUsize::new(0));

        let counters = Counters {
            requests: Arc::clone(&requests),
            requests_while_choked: Arc::clone(&requests_while_choked),
        };
        thread::spawn(move || {
            if let Ok((conn, _)) = listener.accept() {
                serve(conn, info_hash, script, counters);
            }
        });

        FakePeer {
            addr,
            requests,
            requests_while_choked,
        }
    }

    pub fn peer(&self) -> Peer {
        match self.addr {
            SocketAddr::V4(addr) => Peer::from(addr),
            SocketAddr::V6(_) => unreachable!("fake peers listen on IPv4 loopback"),
        }
    }

    /// Number of REQUEST messages received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of REQUEST messages received while choking.
    pub fn requests_while_choked(&self) -> usize {
        self.requests_while_choked.load(Ordering::SeqCst)
    }
}

struct Counters {
    requests: Arc<AtomicUsize>,
    requests_while_choked: Arc<AtomicUsize>,
}

fn send(conn: &mut TcpStream, message: &Message, byte_delay: Option<Duration>) -> bool {
    let bytes = match message.serialize() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    match (message, byte_delay) {
        (Message::Piece { .. }, Some(delay)) => bytes.iter().all(|byte| {
            thread::sleep(delay);
            conn.write_all(&[*byte]).is_ok()
        }),
        _ => conn.write_all(&bytes).is_ok(),
    }
}

/// Send CHOKE, answer `queued`, count requests until the pause ends, UNCHOKE.
fn choke_cycle(
    conn: &mut TcpStream,
    script: &PeerScript,
    queued: Vec<Message>,
    counters: &Counters,
) -> bool {
    if !send(conn, &Message::Choke, None) {
        return false;
    }
    for reply in &queued {
        if !send(conn, reply, script.byte_delay) {
            return false;
        }
    }
    if let Some(index) = script.late_have {
        if !send(conn, &Message::Have(index), None) {
            return false;
        }
    }

    if conn.set_read_timeout(Some(CHOKE_PAUSE)).is_err() {
        return false;
    }
    loop {
        match read_message(conn) {
            Ok(Some(Message::Request { .. })) => {
                counters.requests_while_choked.fetch_add(1, Ordering::SeqCst);
            }
            Ok(_) => continue,
            Err(Error::Timeout) => break,
            Err(_) => return false,
        }
    }
    if conn.set_read_timeout(None).is_err() {
        return false;
    }

    send(conn, &Message::Unchoke, None)
}

fn serve(mut conn: TcpStream, info_hash: [u8; 20], script: PeerScript, counters: Counters) {
    if Handshake::read_from(&mut conn).is_err() {
        return;
    }
    thread::sleep(script.handshake_delay);

    let handshake = Handshake::new([9; 20], info_hash);
    if conn.write_all(&handshake.serialize().unwrap()).is_err() {
        return;
    }

    if let Some(bits) = &script.bitfield {
        if !send(&mut conn, &Message::Bitfield(bits.clone()), None) {
            return;
        }
    }
    for index in &script.haves {
        if !send(&mut conn, &Message::Have(*index), None) {
            return;
        }
    }

    let mut queued = vec![];
    let mut choked_once = false;
    loop {
        let reply = match read_message(&mut conn) {
            Ok(Some(Message::Interested)) => Message::Unchoke,
            Ok(Some(Message::Request {
                index,
                begin,
                length,
            })) => {
                let served = counters.requests.fetch_add(1, Ordering::SeqCst);
                if script.close_after.is_some_and(|limit| served >= limit) {
                    return;
                }

                let start = (index as usize * script.piece_length as usize + begin as usize)
                    .min(script.data.len());
                let end = (start + length as usize).min(script.data.len());
                let mut block = script.data[start..end].to_vec();
                if script.corrupt {
                    block.iter_mut().for_each(|byte| *byte = !*byte);
                }

                Message::Piece {
                    index,
                    begin,
                    block,
                }
            }
            Ok(_) => continue,
            Err(_) => return,
        };

        match script.choke_after {
            Some(limit) if !choked_once && matches!(reply, Message::Piece { .. }) => {
                queued.push(reply);
                if queued.len() == limit {
                    choked_once = true;
                    if !choke_cycle(&mut conn, &script, std::mem::take(&mut queued), &counters) {
                        return;
                    }
                }
            }
            _ => {
                if !send(&mut conn, &reply, script.byte_delay) {
                    return;
                }
            }
        }
    }
}
