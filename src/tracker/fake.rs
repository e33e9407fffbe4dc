//! Loopback trackers for tests.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, UdpSocket};
use std::thread;

/// Bencoded announce response carrying `peers` as a compact list.
pub fn bencoded_peers(peers: &[u8]) -> Vec<u8> {
    let mut body = b"d8:intervali900e5:peers".to_vec();
    body.extend_from_slice(format!("{}:", peers.len()).as_bytes());
    body.extend_from_slice(peers);
    body.push(b'e');
    body
}

/// Serve `body` to a single HTTP request, returns the announce URL.
pub fn spawn_http_tracker(body: Vec<u8>) -> String {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let url = format!("http://{}/announce", listener.local_addr().unwrap());

    thread::spawn(move || {
        let (mut conn, _) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(_) => return,
        };

        let mut request = vec![];
        let mut buf = [0; 1024];
        while !request.windows(4).any(|window| window == b"\r\n\r\n") {
            match conn.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(&body);
        let _ = conn.write_all(&response);
    });

    url
}

/// Answer connect and announce requests with `peers`, returns the announce URL.
pub fn spawn_udp_tracker(peers: Vec<u8>) -> String {
    const CONNECTION_ID: u64 = 0x1122334455667788;

    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let url = format!("udp://{}/announce", socket.local_addr().unwrap());

    thread::spawn(move || {
        let mut buf = [0; 1024];
        while let Ok((n, from)) = socket.recv_from(&mut buf) {
            let request = &buf[..n];
            let mut reply = vec![];

            if n == 16 && BigEndian::read_u64(&request[0..8]) == 0x41727101980 {
                reply.write_u32::<BigEndian>(0).unwrap();
                reply.extend_from_slice(&request[12..16]);
                reply.write_u64::<BigEndian>(CONNECTION_ID).unwrap();
            } else if n == 98 && BigEndian::read_u64(&request[0..8]) == CONNECTION_ID {
                reply.write_u32::<BigEndian>(1).unwrap();
                reply.extend_from_slice(&request[12..16]);
                reply.write_u32::<BigEndian>(1800).unwrap();
                reply.write_u32::<BigEndian>(0).unwrap();
                reply.write_u32::<BigEndian>((peers.len() / 6) as u32).unwrap();
                reply.extend_from_slice(&peers);
            } else {
                continue;
            }

            let _ = socket.send_to(&reply, from);
        }
    });

    url
}
