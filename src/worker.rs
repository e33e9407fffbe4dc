//! # BitTorrent Worker Thread
//!
//! This module implements the worker that downloads from a single peer.
//! Each worker owns one peer connection and pulls pieces from the shared
//! [`WorkQueue`].
//!
//! ## Download Process
//!
//! 1. **Connection**: TCP connection, handshake, bitfield
//! 2. **Setup**: send UNCHOKE and INTERESTED
//! 3. **Piece loop**: pop a piece, pipeline block requests (up to 5 in
//!    flight, 16KB each), assemble, verify SHA-1, report
//!
//! ## Error Handling
//!
//! | Failure | Piece | Worker |
//! |---------|-------|--------|
//! | peer lacks the piece | pushed back | exits |
//! | transport, protocol, timeout | pushed back | exits |
//! | integrity | pushed back | continues |
//!
//! Exiting on a missing piece leaves that piece to peers that have it
//! instead of spinning on the queue.

use crate::client::Client;
use crate::config::{Config, BACKLOG_MAX, BLOCK_SIZE_MAX};
use crate::error::Result;
use crate::message::{parse_piece, Message};
use crate::peer::Peer;
use crate::piece::{PieceProgress, PieceResult, PieceWork};
use crate::scheduler::WorkQueue;

use std::time::Instant;

/// Manages downloading from a single BitTorrent peer.
pub struct Worker {
    /// Address of the remote peer
    peer: Peer,
    /// 20-byte unique identifier for this client instance
    peer_id: [u8; 20],
    /// 20-byte swarm identity hash
    info_hash: [u8; 20],
    /// Timeouts for connecting and downloading
    config: Config,
    /// Shared work queue and result channel
    queue: WorkQueue,
}

impl Worker {
    pub fn new(
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        config: Config,
        queue: WorkQueue,
    ) -> Worker {
        Worker {
            peer,
            peer_id,
            info_hash,
            config,
            queue,
        }
    }

    /// Start worker, returns when the worker is done with this peer.
    pub fn start_download(mut self) {
        let mut client = match Client::connect(
            self.peer,
            self.peer_id,
            self.info_hash,
            self.queue.piece_count(),
            &self.config,
        ) {
            Ok(client) => client,
            Err(e) => {
                warn!("Could not handshake with peer {}, disconnecting: {}", self.peer, e);
                return;
            }
        };

        self.queue.mark_connected();

        if let Err(e) = client
            .send_unchoke()
            .and_then(|_| client.send_interested())
        {
            warn!("Could not set up peer {}, disconnecting: {}", self.peer, e);
            return;
        }

        while let Some(piece_work) = self.queue.pop() {
            // Check if remote peer has piece
            if !client.has_piece(piece_work.index) {
                debug!(
                    "Peer {} does not have piece {}, leaving it to others",
                    self.peer, piece_work.index
                );
                self.queue.push_back(piece_work);
                return;
            }

            let data = match self
                .download_piece(&mut client, &piece_work)
                .and_then(|data| piece_work.verify(&data).map(|_| data))
            {
                Ok(data) => data,
                Err(e) if e.is_integrity() => {
                    warn!("Peer {}: {}, requeued", self.peer, e);
                    self.queue.push_back(piece_work);
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Exiting peer {}, piece {} requeued: {}",
                        self.peer, piece_work.index, e
                    );
                    self.queue.push_back(piece_work);
                    return;
                }
            };

            info!(
                "Successfully verified integrity of piece {:?}",
                piece_work.index
            );

            // Notify peer that piece was downloaded
            if let Err(e) = client.send_have(piece_work.index) {
                debug!("Could not notify peer {} of piece: {}", self.peer, e);
            }

            if !self.queue.report(PieceResult::new(piece_work.index, data)) {
                debug!("Session no longer collecting, worker for {} exiting", self.peer);
                return;
            }
        }

        debug!("Worker for peer {} exiting: work queue closed", self.peer);
    }

    /// Download one piece through the block pipeline.
    ///
    /// The whole attempt is bounded by the configured piece timeout.
    fn download_piece(&self, client: &mut Client, piece_work: &PieceWork) -> Result<Vec<u8>> {
        client.set_deadline(Some(Instant::now() + self.config.piece_timeout))?;

        let result = pipeline_piece(client, piece_work);

        client.set_deadline(None)?;
        result
    }
}

/// Request blocks while unchoked and the backlog has room, then read one
/// message, until every byte of the piece has arrived.
fn pipeline_piece(client: &mut Client, piece_work: &PieceWork) -> Result<Vec<u8>> {
    let mut progress = PieceProgress::new(piece_work);

    while !progress.is_complete() {
        if !client.is_choked() {
            while let Some(block_size) = progress.next_block(BLOCK_SIZE_MAX, BACKLOG_MAX) {
                client.send_request(piece_work.index, progress.requested, block_size)?;
                progress.record_request(block_size);
            }
        }

        read_message(client, &mut progress)?;
    }

    info!("Successfully downloaded piece {:?}", piece_work.index);

    Ok(progress.buf)
}

fn read_message(client: &mut Client, progress: &mut PieceProgress) -> Result<()> {
    let message = match client.read()? {
        Some(message) => message,
        None => return Ok(()),
    };

    match message {
        Message::Choke => client.read_choke(),
        Message::Unchoke => client.read_unchoke(),
        Message::Have(_) => client.read_have(&message)?,
        Message::Piece { .. } => {
            let n = parse_piece(progress.index, &mut progress.buf, &message)?;
            debug!(
                "Download piece {} ({} bytes) from peer {}",
                progress.index,
                n,
                client.peer()
            );
            progress.record_block(n as u32);
        }
        other => debug!(
            "Ignoring message {} from peer {}",
            other.id(),
            client.peer()
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::fake_peer::{FakePeer, PeerScript};
    use crate::scheduler::Scheduler;

    use boring::sha::sha1;

    use std::thread;
    use std::time::Duration;

    const INFO_HASH: [u8; 20] = [3; 20];

    fn works_for(data: &[u8], piece_length: usize) -> Vec<PieceWork> {
        data.chunks(piece_length)
            .enumerate()
            .map(|(index, chunk)| PieceWork::new(index as u32, sha1(chunk), chunk.len() as u32))
            .collect()
    }

    #[test]
    fn test_worker_downloads_every_piece() {
        let data: Vec<u8> = (0..40000u32).map(|i| (i % 251) as u8).collect();
        let scheduler = Scheduler::new(works_for(&data, 32768));
        let queue = scheduler.worker_queues(1).pop().unwrap();
        let fake = FakePeer::spawn(INFO_HASH, PeerScript::serving(data.clone(), 32768));

        let worker = Worker::new(fake.peer(), [1; 20], INFO_HASH, Config::default(), queue);
        thread::spawn(move || worker.start_download());

        let mut results = vec![scheduler.next_result().unwrap(), scheduler.next_result().unwrap()];
        results.sort_by_key(|result| result.index);

        assert_eq!(results[0].data, &data[..32768]);
        assert_eq!(results[1].data, &data[32768..]);
        assert_eq!(fake.requests(), 3);
        assert_eq!(scheduler.connected_peers(), 1);
    }

    #[test]
    fn test_missing_piece_requeued_and_worker_exits() {
        let data = b"abcdefg".to_vec();
        let works = works_for(&data, 4);
        let scheduler = Scheduler::new(works.clone());
        let queue = scheduler.worker_queues(1).pop().unwrap();
        let script = PeerScript::serving(data, 4).with_bitfield(vec![0b0100_0000]);
        let fake = FakePeer::spawn(INFO_HASH, script);

        Worker::new(fake.peer(), [1; 20], INFO_HASH, Config::default(), queue).start_download();

        assert_eq!(scheduler.connected_peers(), 0);
        assert_eq!(scheduler.pending(), 2);
        assert_eq!(scheduler.try_next_work(), Some(works[1].clone()));
        assert_eq!(scheduler.try_next_work(), Some(works[0].clone()));
        assert_eq!(fake.requests(), 0);
        assert!(scheduler.next_result().is_err());
    }

    #[test]
    fn test_transport_failure_requeues_piece() {
        let data = b"abcdefg".to_vec();
        let works = works_for(&data, 4);
        let scheduler = Scheduler::new(works.clone());
        let queue = scheduler.worker_queues(1).pop().unwrap();
        let fake = FakePeer::spawn(INFO_HASH, PeerScript::serving(data, 4).closing_after(0));

        Worker::new(fake.peer(), [1; 20], INFO_HASH, Config::default(), queue).start_download();

        assert_eq!(scheduler.connected_peers(), 0);
        assert_eq!(scheduler.try_next_work(), Some(works[1].clone()));
        assert_eq!(scheduler.try_next_work(), Some(works[0].clone()));
    }

    #[test]
    fn test_integrity_failure_keeps_worker_alive() {
        let data = b"abcdefg".to_vec();
        let works = works_for(&data, 4);
        let scheduler = Scheduler::new(works.clone());
        let queue = scheduler.worker_queues(1).pop().unwrap();
        let script = PeerScript::serving(data, 4).corrupted().closing_after(2);
        let fake = FakePeer::spawn(INFO_HASH, script);

        Worker::new(fake.peer(), [1; 20], INFO_HASH, Config::default(), queue).start_download();

        // Piece 0 and 1 both failed verification, then piece 0 hit the closed connection
        assert_eq!(fake.requests(), 3);
        assert_eq!(scheduler.pending(), 2);
        assert_eq!(scheduler.try_next_work(), Some(works[1].clone()));
        assert_eq!(scheduler.try_next_work(), Some(works[0].clone()));
    }

    #[test]
    fn test_choke_pauses_requests() {
        // Piece 0 spans 7 blocks, more than the backlog
        let piece_length = 7 * BLOCK_SIZE_MAX as usize;
        let data: Vec<u8> = (0..piece_length + 100).map(|i| (i % 239) as u8).collect();
        let scheduler = Scheduler::new(works_for(&data, piece_length));
        let queue = scheduler.worker_queues(1).pop().unwrap();
        let script = PeerScript::serving(data.clone(), piece_length as u32)
            .with_bitfield(vec![0b1000_0000])
            .choking_after(BACKLOG_MAX as usize)
            .with_late_have(1);
        let fake = FakePeer::spawn(INFO_HASH, script);

        let worker = Worker::new(fake.peer(), [1; 20], INFO_HASH, Config::default(), queue);
        thread::spawn(move || worker.start_download());

        let first = scheduler.next_result().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.data, &data[..piece_length]);

        // Piece 1 was only announced with HAVE while choked
        let second = scheduler.next_result().unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.data, &data[piece_length..]);

        assert_eq!(fake.requests_while_choked(), 0);
        assert_eq!(fake.requests(), 8);
    }

    #[test]
    fn test_slow_peer_hits_piece_deadline() {
        let data = b"abcdefg".to_vec();
        let works = works_for(&data, 4);
        let scheduler = Scheduler::new(works.clone());
        let queue = scheduler.worker_queues(1).pop().unwrap();
        let script = PeerScript::serving(data, 4).trickling(Duration::from_millis(100));
        let fake = FakePeer::spawn(INFO_HASH, script);
        let config = Config {
            piece_timeout: Duration::from_millis(300),
            ..Config::default()
        };

        let started = Instant::now();
        Worker::new(fake.peer(), [1; 20], INFO_HASH, config, queue).start_download();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(scheduler.connected_peers(), 0);
        assert_eq!(scheduler.try_next_work(), Some(works[1].clone()));
        assert_eq!(scheduler.try_next_work(), Some(works[0].clone()));
    }
}
