//! Per-tier pending updates with last-write-wins coalescing.

use crate::types::{ArtifactPatch, SubjectId, Tier};
use std::collections::HashMap;
use std::time::Instant;

/// A patch waiting for its tier to flush.
#[derive(Clone, Debug)]
pub struct QueuedUpdate {
    pub subject_id: SubjectId,
    pub patch: ArtifactPatch,
    pub tier: Tier,
    /// Wall-clock time of the latest insert. Flushes run on the injected
    /// runtime's clock, so this is for diagnostics only.
    pub enqueued_at: Instant,
}

/// At most one pending update per subject, in first-insertion order.
#[derive(Debug)]
pub(crate) struct PendingQueue {
    tier: Tier,
    entries: Vec<QueuedUpdate>,
    positions: HashMap<SubjectId, usize>,
}

impl PendingQueue {
    pub(crate) fn new(tier: Tier) -> Self {
        Self {
            tier,
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Store `patch` for `subject_id`, replacing any pending patch wholesale.
    ///
    /// Returns true if an earlier patch was discarded.
    pub(crate) fn insert(&mut self, subject_id: SubjectId, patch: ArtifactPatch) -> bool {
        let update = QueuedUpdate {
            subject_id: subject_id.clone(),
            patch,
            tier: self.tier,
            enqueued_at: Instant::now(),
        };

        match self.positions.get(&subject_id) {
            Some(&pos) => {
                self.entries[pos] = update;
                true
            }
            None => {
                self.positions.insert(subject_id, self.entries.len());
                self.entries.push(update);
                false
            }
        }
    }

    pub(crate) fn get(&self, subject_id: &SubjectId) -> Option<&QueuedUpdate> {
        self.positions.get(subject_id).map(|&pos| &self.entries[pos])
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Take every pending update, leaving the queue empty.
    pub(crate) fn drain(&mut self) -> Vec<QueuedUpdate> {
        self.positions.clear();
        std::mem::take(&mut self.entries)
    }
}
