//! # Piece Scheduler
//!
//! Shared plumbing between the session and its workers.
//!
//! - **Work queue**: bounded to the piece count, pre-seeded in index order.
//!   A failed attempt pushes the unchanged `PieceWork` back onto the same
//!   queue, where any worker may pick it up again. There is no separate
//!   retry path.
//! - **Results**: a rendezvous channel, a worker hands a verified piece
//!   straight to the session.
//! - **Swarm state**: live and connected worker counts behind a mutex. The
//!   last worker to leave raises the disconnect signal, exactly once, with
//!   a non-blocking send.
//! - **Shutdown**: dropped by the session when it stops collecting, which
//!   releases workers idling on an empty queue.

use crate::error::{Error, Result};
use crate::piece::{PieceResult, PieceWork};

use crossbeam_channel::{bounded, select, Receiver, Sender};

use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default, Debug)]
struct SwarmState {
    /// Workers that have not exited yet
    live: usize,
    /// Workers holding an established peer connection
    connected: usize,
    /// Whether the disconnect signal was already sent
    signaled: bool,
}

pub struct Scheduler {
    work_chan: (Sender<PieceWork>, Receiver<PieceWork>),
    result_chan: (Sender<PieceResult>, Receiver<PieceResult>),
    disconnect_chan: (Sender<()>, Receiver<()>),
    shutdown_chan: (Sender<()>, Receiver<()>),
    swarm: Arc<Mutex<SwarmState>>,
    piece_count: usize,
}

/// A worker's handle on the scheduler.
///
/// Dropping it deregisters the worker.
pub struct WorkQueue {
    work_chan: (Sender<PieceWork>, Receiver<PieceWork>),
    result_tx: Sender<PieceResult>,
    disconnect_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
    swarm: Arc<Mutex<SwarmState>>,
    piece_count: usize,
    connected: bool,
}

fn lock(swarm: &Mutex<SwarmState>) -> MutexGuard<'_, SwarmState> {
    // The state stays consistent even if a holder panicked
    swarm.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Scheduler {
    /// Build a scheduler with `works` queued in order.
    pub fn new(works: Vec<PieceWork>) -> Scheduler {
        let piece_count = works.len();
        let work_chan: (Sender<PieceWork>, Receiver<PieceWork>) = bounded(piece_count);
        for work in works {
            if work_chan.0.try_send(work).is_err() {
                error!("Error: could not send piece to work queue");
            }
        }

        Scheduler {
            work_chan,
            result_chan: bounded(0),
            disconnect_chan: bounded(1),
            shutdown_chan: bounded(0),
            swarm: Arc::new(Mutex::new(SwarmState::default())),
            piece_count,
        }
    }

    /// Register `count` workers at once and hand out their queues.
    ///
    /// All workers must be registered before the first one starts, so that
    /// an early exit cannot bring the live count to zero while others are
    /// still being spawned.
    pub fn worker_queues(&self, count: usize) -> Vec<WorkQueue> {
        lock(&self.swarm).live += count;

        (0..count)
            .map(|_| WorkQueue {
                work_chan: self.work_chan.clone(),
                result_tx: self.result_chan.0.clone(),
                disconnect_tx: self.disconnect_chan.0.clone(),
                shutdown_rx: self.shutdown_chan.1.clone(),
                swarm: Arc::clone(&self.swarm),
                piece_count: self.piece_count,
                connected: false,
            })
            .collect()
    }

    /// Number of workers currently holding a peer connection.
    pub fn connected_peers(&self) -> usize {
        lock(&self.swarm).connected
    }

    /// Number of pieces waiting in the queue.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.work_chan.1.len()
    }

    /// Blocks until a worker reports a piece or every worker has exited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SwarmExhausted`] once the disconnect signal fires.
    pub fn next_result(&self) -> Result<PieceResult> {
        select! {
            recv(self.result_chan.1) -> result => {
                result.map_err(|_| Error::SwarmExhausted("results channel closed"))
            }
            recv(self.disconnect_chan.1) -> _ => {
                Err(Error::SwarmExhausted("all peers disconnected"))
            }
        }
    }

    /// Take the next queued piece without blocking.
    #[cfg(test)]
    pub fn try_next_work(&self) -> Option<PieceWork> {
        self.work_chan.1.try_recv().ok()
    }
}

impl WorkQueue {
    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Blocks until a piece is available.
    ///
    /// Returns `None` once the session has stopped collecting results.
    pub fn pop(&self) -> Option<PieceWork> {
        select! {
            recv(self.work_chan.1) -> work => work.ok(),
            recv(self.shutdown_rx) -> _ => None,
        }
    }

    /// Put a piece back onto the queue, unchanged.
    pub fn push_back(&self, work: PieceWork) {
        // The queue is sized for every piece, so this never blocks
        if self.work_chan.0.try_send(work).is_err() {
            error!("Error: could not send piece back to work queue");
        }
    }

    /// Hand a verified piece to the session.
    ///
    /// Returns `false` if the session no longer collects results.
    pub fn report(&self, result: PieceResult) -> bool {
        select! {
            send(self.result_tx, result) -> sent => sent.is_ok(),
            recv(self.shutdown_rx) -> _ => false,
        }
    }

    /// Count this worker as connected until it is dropped.
    pub fn mark_connected(&mut self) {
        if !self.connected {
            self.connected = true;
            lock(&self.swarm).connected += 1;
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        let mut swarm = lock(&self.swarm);

        if self.connected {
            swarm.connected = swarm.connected.saturating_sub(1);
        }
        swarm.live = swarm.live.saturating_sub(1);

        if swarm.live == 0 && !swarm.signaled {
            swarm.signaled = true;
            let _ = self.disconnect_tx.try_send(());
        }
    }
}
