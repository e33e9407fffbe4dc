//! UDP tracker announce (BEP 15).
//!
//! Two round trips over one socket:
//!
//! ```text
//! connect request:   protocol_id(8) action=0(4) transaction_id(4)
//! connect response:  action=0(4) transaction_id(4) connection_id(8)
//!
//! announce request:  connection_id(8) action=1(4) transaction_id(4)
//!                    info_hash(20) peer_id(20) downloaded(8) left(8)
//!                    uploaded(8) event(4) ip(4) key(4) num_want(4) port(2)
//! announce response: action=1(4) transaction_id(4) interval(4)
//!                    leechers(4) seeders(4) compact peers(6 * n)
//! ```
//!
//! A response with action 3 carries an error message after the transaction id.

use super::http::AnnounceParams;
use crate::error::{Error, Result};
use crate::peer::{parse_compact_peers, Peer};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use rand::Rng;
use url::Url;

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

const CONNECT_RESPONSE_LEN: usize = 16;
const ANNOUNCE_HEADER_LEN: usize = 20;
const RESPONSE_BUF_LEN: usize = 4096;

/// Announce to a UDP tracker and return the peers it knows.
///
/// Each round trip is bounded by `timeout`.
pub fn announce(announce: &Url, params: &AnnounceParams, timeout: Duration) -> Result<Vec<Peer>> {
    let addr = resolve(announce)?;

    let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(addr)?;
    socket.set_read_timeout(Some(timeout))?;
    socket.set_write_timeout(Some(timeout))?;

    let connection_id = connect(&socket)?;
    debug!("Connected to UDP tracker {}", addr);

    let mut rng = rand::thread_rng();
    let transaction_id: u32 = rng.gen();
    let packet = build_announce_packet(connection_id, transaction_id, params)?;
    let response = round_trip(&socket, &packet)?;

    parse_announce_response(&response, transaction_id)
}

fn resolve(announce: &Url) -> Result<SocketAddr> {
    announce
        .socket_addrs(|| None)
        .map_err(|e| Error::Discovery(format!("could not resolve {}: {}", announce, e)))?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Discovery(format!("could not resolve {}", announce)))
}

/// Obtain a connection id from the tracker.
fn connect(socket: &UdpSocket) -> Result<u64> {
    let transaction_id: u32 = rand::thread_rng().gen();
    let packet = build_connect_packet(transaction_id)?;
    let response = round_trip(socket, &packet)?;

    parse_connect_response(&response, transaction_id)
}

/// Send one datagram and wait for the reply.
fn round_trip(socket: &UdpSocket, packet: &[u8]) -> Result<Vec<u8>> {
    socket.send(packet).map_err(Error::from_io)?;

    let mut buf = vec![0; RESPONSE_BUF_LEN];
    let n = socket.recv(&mut buf).map_err(Error::from_io)?;
    buf.truncate(n);

    Ok(buf)
}

fn build_connect_packet(transaction_id: u32) -> Result<Vec<u8>> {
    let mut packet: Vec<u8> = Vec::with_capacity(16);
    packet.write_u64::<BigEndian>(PROTOCOL_ID)?;
    packet.write_u32::<BigEndian>(ACTION_CONNECT)?;
    packet.write_u32::<BigEndian>(transaction_id)?;

    Ok(packet)
}

fn build_announce_packet(
    connection_id: u64,
    transaction_id: u32,
    params: &AnnounceParams,
) -> Result<Vec<u8>> {
    let mut packet: Vec<u8> = Vec::with_capacity(98);
    packet.write_u64::<BigEndian>(connection_id)?;
    packet.write_u32::<BigEndian>(ACTION_ANNOUNCE)?;
    packet.write_u32::<BigEndian>(transaction_id)?;
    packet.extend_from_slice(params.info_hash);
    packet.extend_from_slice(params.peer_id);
    // downloaded, left, uploaded
    packet.write_u64::<BigEndian>(0)?;
    packet.write_u64::<BigEndian>(0)?;
    packet.write_u64::<BigEndian>(0)?;
    // event, ip, key
    packet.write_u32::<BigEndian>(0)?;
    packet.write_u32::<BigEndian>(0)?;
    packet.write_u32::<BigEndian>(0)?;
    // num_want, -1 lets the tracker decide
    packet.write_i32::<BigEndian>(-1)?;
    packet.write_u16::<BigEndian>(params.port)?;

    Ok(packet)
}

/// Split the common action + transaction id header, surfacing tracker errors.
fn check_header(response: &[u8], action: u32, transaction_id: u32) -> Result<()> {
    if response.len() < 8 {
        return Err(Error::Discovery(format!(
            "unexpected response size {}",
            response.len()
        )));
    }

    if BigEndian::read_u32(&response[4..8]) != transaction_id {
        return Err(Error::Discovery("transaction id does not match".into()));
    }

    match BigEndian::read_u32(&response[0..4]) {
        received if received == action => Ok(()),
        ACTION_ERROR => Err(Error::TrackerFailure(
            String::from_utf8_lossy(&response[8..]).into_owned(),
        )),
        received => Err(Error::Discovery(format!(
            "unexpected response action {}",
            received
        ))),
    }
}

fn parse_connect_response(response: &[u8], transaction_id: u32) -> Result<u64> {
    check_header(response, ACTION_CONNECT, transaction_id)?;

    if response.len() < CONNECT_RESPONSE_LEN {
        return Err(Error::Discovery(format!(
            "unexpected connect response size {}",
            response.len()
        )));
    }

    Ok(BigEndian::read_u64(&response[8..16]))
}

fn parse_announce_response(response: &[u8], transaction_id: u32) -> Result<Vec<Peer>> {
    check_header(response, ACTION_ANNOUNCE, transaction_id)?;

    if response.len() <= ANNOUNCE_HEADER_LEN {
        return Err(Error::Discovery(format!(
            "unexpected announce response size {}",
            response.len()
        )));
    }

    let seeders = BigEndian::read_u32(&response[16..20]);
    let leechers = BigEndian::read_u32(&response[12..16]);
    debug!("Tracker reports {} seeders, {} leechers", seeders, leechers);

    parse_compact_peers(&response[ANNOUNCE_HEADER_LEN..])
}
