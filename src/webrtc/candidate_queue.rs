//! ICE candidate queue
//!
//! Remote candidates can reach us before the offer/answer that makes them
//! applicable. They are held here, in arrival order, until the remote
//! description is committed and then handed back exactly once.

use super::signaling::IceCandidate;
use log::debug;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct CandidateQueue<T = IceCandidate> {
    pending: VecDeque<T>,
    remote_description_set: bool,
}

impl<T> Default for CandidateQueue<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            remote_description_set: false,
        }
    }
}

impl<T> CandidateQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Offer a candidate to the queue.
    ///
    /// Returns it back when it can be applied right away, otherwise keeps it.
    pub fn offer(&mut self, candidate: T) -> Option<T> {
        if self.remote_description_set {
            return Some(candidate);
        }
        self.pending.push_back(candidate);
        debug!("Queued remote ICE candidate ({} pending)", self.pending.len());
        None
    }

    /// Record that the remote description is committed and take everything
    /// queued so far, oldest first. Later calls return nothing until
    /// [`rearm`](Self::rearm) or [`reset`](Self::reset).
    pub fn mark_remote_description_set(&mut self) -> Vec<T> {
        self.remote_description_set = true;
        self.pending.drain(..).collect()
    }

    /// Start gating again for a new peer connection, keeping anything already
    /// queued for it.
    pub fn rearm(&mut self) {
        self.remote_description_set = false;
    }

    /// Drop all pending candidates and start gating again.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.remote_description_set = false;
    }
}
