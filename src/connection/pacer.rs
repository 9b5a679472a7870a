use std::collections::VecDeque;

use crate::transport::CandidateInit;

/// Buffers remote connectivity candidates until the remote description has
/// been applied, then releases them oldest-first in bounded batches. The
/// supervisor invokes the drain on a fixed cadence, never inline with
/// enqueue, so a candidate burst cannot stall the tick.
#[derive(Debug, Default)]
pub struct CandidatePacer {
    queue: VecDeque<CandidateInit>,
    unlocked: bool,
}

impl CandidatePacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// true once the remote description has been applied
    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn unlock(&mut self) {
        self.unlocked = true;
    }

    pub fn enqueue(&mut self, candidate: CandidateInit) {
        self.queue.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// release up to `max` candidates, oldest first; nothing while locked
    pub fn drain_ready(&mut self, max: usize) -> Vec<CandidateInit> {
        if !self.unlocked {
            return Vec::new();
        }
        let take = self.queue.len().min(max);
        self.queue.drain(..take).collect()
    }

    /// drop everything buffered (teardown)
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
