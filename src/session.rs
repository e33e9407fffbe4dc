//! # Download Session
//!
//! Top-level orchestration of one torrent download:
//!
//! 1. **Discovery**: ask the trackers for peers ([`TrackerClient`])
//! 2. **Workers**: one thread per peer, all sharing one [`Scheduler`]
//! 3. **Assembly**: each verified piece is copied to its own offset range of
//!    the output buffer, in whatever order pieces complete
//!
//! The session either returns the fully assembled buffer or a fatal error.
//! Progress is reported through an [`EventSink`] handed in at construction;
//! events carry no control flow and may be ignored.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::scheduler::Scheduler;
use crate::torrent::TorrentMetadata;
use crate::tracker::TrackerClient;
use crate::utils::human_readable_size;
use crate::worker::Worker;

use crossbeam_channel::Sender;
use rand::Rng;

use std::thread;

// Client identification prefix, Azureus-style
const PEER_ID_PREFIX: &[u8; 8] = b"-VL0100-";

/// Point-in-time notifications for the user interface.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Content name, emitted once
    Name(String),
    /// Free-form phase description
    Status(String),
    /// Human-readable total size
    TotalSize(String),
    /// Peers found by discovery, emitted once
    Peers(usize),
    /// Peers currently holding a connection, after each piece
    ConnectedPeers(usize),
    /// Fraction complete and cumulative bytes, after each piece
    Progress { ratio: f64, downloaded: u64 },
}

/// Receives session events.
pub trait EventSink {
    fn emit(&self, event: Event);
}

impl EventSink for Sender<Event> {
    fn emit(&self, event: Event) {
        // A user interface that went away does not stop the download
        let _ = self.send(event);
    }
}

/// Generate a random peer id, unique to this run.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0; 20];
    peer_id[..PEER_ID_PREFIX.len()].copy_from_slice(PEER_ID_PREFIX);
    rand::thread_rng().fill(&mut peer_id[PEER_ID_PREFIX.len()..]);

    peer_id
}

pub struct Session<S: EventSink> {
    torrent: TorrentMetadata,
    /// 20-byte unique identifier for this client instance
    peer_id: [u8; 20],
    config: Config,
    sink: S,
}

impl<S: EventSink> Session<S> {
    pub fn new(torrent: TorrentMetadata, peer_id: [u8; 20], config: Config, sink: S) -> Self {
        Session {
            torrent,
            peer_id,
            config,
            sink,
        }
    }

    pub fn emit_status(&self, status: &str) {
        self.sink.emit(Event::Status(status.to_string()));
    }

    /// Discover peers, then download the whole torrent from them.
    pub fn run(&self) -> Result<Vec<u8>> {
        self.sink.emit(Event::Name(self.torrent.name.clone()));
        self.emit_status("contacting peers...");
        self.sink
            .emit(Event::TotalSize(human_readable_size(self.torrent.length)));

        let peers = self.discover()?;

        self.download(&peers)
    }

    /// Ask every tracker in turn until enough peers are known.
    pub fn discover(&self) -> Result<Vec<Peer>> {
        let tracker = TrackerClient::new(
            self.torrent.info_hash,
            self.peer_id,
            self.torrent.length,
            &self.config,
        );
        let peers = tracker.request_peers(&self.torrent.announce, self.config.target_peers)?;

        info!("Found {} peers for {:?}", peers.len(), self.torrent.name);
        self.sink.emit(Event::Peers(peers.len()));

        Ok(peers)
    }

    /// Download every piece from `peers` and assemble the content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SwarmExhausted`] if `peers` is empty or every worker
    /// exits before the last piece arrives.
    pub fn download(&self, peers: &[Peer]) -> Result<Vec<u8>> {
        if peers.is_empty() {
            return Err(Error::SwarmExhausted("no peers to download from"));
        }

        let piece_count = self.torrent.piece_count();
        info!(
            "Downloading {:?} ({} pieces) from {} peers",
            self.torrent.name,
            piece_count,
            peers.len()
        );
        self.emit_status("downloading...");

        let scheduler = Scheduler::new(self.torrent.piece_works());

        // Register every worker before the first one can exit
        let queues = scheduler.worker_queues(peers.len());
        for (peer, queue) in peers.iter().zip(queues) {
            let worker = Worker::new(
                *peer,
                self.peer_id,
                self.torrent.info_hash,
                self.config.clone(),
                queue,
            );

            thread::spawn(move || {
                worker.start_download();
            });
        }

        let mut data: Vec<u8> = vec![0; self.torrent.length as usize];
        let mut nb_pieces_downloaded = 0;
        let mut downloaded: u64 = 0;
        while nb_pieces_downloaded < piece_count {
            let piece_result = scheduler.next_result()?;

            let (begin, end) = self.torrent.piece_bounds(piece_result.index);
            data[begin as usize..end as usize].copy_from_slice(&piece_result.data);

            nb_pieces_downloaded += 1;
            downloaded += piece_result.data.len() as u64;

            let ratio = nb_pieces_downloaded as f64 / piece_count as f64;
            let connected = scheduler.connected_peers();
            debug!(
                "({:.2}%) Downloaded piece {} from {} peers",
                ratio * 100.0,
                piece_result.index,
                connected
            );

            self.sink.emit(Event::ConnectedPeers(connected));
            self.sink.emit(Event::Progress { ratio, downloaded });
        }

        // Dropping the scheduler releases workers still waiting for work
        drop(scheduler);

        Ok(data)
    }
}
