//! Focus-aware scheduling of artifact patches.
//!
//! Every [`PriorityScheduler::queue_update`] call classifies its subject
//! against the store's current focus:
//! - the active subject is patched immediately, one store call per update
//! - the pinned subject is debounced on a single trailing-edge timer
//! - everything else waits for the host to go idle
//!
//! Deferred and background updates coalesce per subject: only the last patch
//! queued before a flush is applied.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = PriorityScheduler::new(store, runtime, SchedulerConfig::default());
//! scheduler.queue_update("artifact-1", ArtifactPatch::new().with("title", "Draft"));
//! ```

mod queue;

pub use queue::QueuedUpdate;

use crate::config::SchedulerConfig;
use crate::runtime::{Callback, Runtime, TimerId};
use crate::store::ArtifactStore;
use crate::types::{ArtifactPatch, SubjectId, Tier};
use parking_lot::Mutex;
use queue::PendingQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// How a tier's flush was scheduled, so it can be cancelled the same way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HandleKind {
    Timer,
    Idle,
}

#[derive(Clone, Copy, Debug)]
struct ScheduledFlush {
    id: TimerId,
    kind: HandleKind,
}

/// Pending entries and the one outstanding flush for a tier.
struct TierSlot {
    queue: PendingQueue,
    flush: Option<ScheduledFlush>,
    /// Bumped on every reschedule and every flush; a callback only runs if
    /// it still carries the current value.
    generation: u64,
}

impl TierSlot {
    fn new(tier: Tier) -> Self {
        Self {
            queue: PendingQueue::new(tier),
            flush: None,
            generation: 0,
        }
    }
}

struct TierState {
    deferred: TierSlot,
    background: TierSlot,
}

impl TierState {
    fn slot_mut(&mut self, tier: Tier) -> Option<&mut TierSlot> {
        match tier {
            Tier::Immediate => None,
            Tier::Deferred => Some(&mut self.deferred),
            Tier::Background => Some(&mut self.background),
        }
    }

    fn slot(&self, tier: Tier) -> Option<&TierSlot> {
        match tier {
            Tier::Immediate => None,
            Tier::Deferred => Some(&self.deferred),
            Tier::Background => Some(&self.background),
        }
    }
}

struct SchedulerInner {
    store: Arc<dyn ArtifactStore>,
    runtime: Arc<dyn Runtime>,
    config: SchedulerConfig,
    /// Cleared on teardown; every callback checks it before touching the store.
    active: AtomicBool,
    state: Mutex<TierState>,
}

/// Applies artifact patches at a cadence chosen by the viewer's focus.
///
/// The scheduler is live from construction until [`PriorityScheduler::stop`]
/// or drop. After teardown no further store mutation happens, even if a
/// flush callback already handed to the runtime fires late.
pub struct PriorityScheduler {
    inner: Arc<SchedulerInner>,
}

impl PriorityScheduler {
    /// Create a running scheduler.
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        runtime: Arc<dyn Runtime>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                runtime,
                config,
                active: AtomicBool::new(true),
                state: Mutex::new(TierState {
                    deferred: TierSlot::new(Tier::Deferred),
                    background: TierSlot::new(Tier::Background),
                }),
            }),
        }
    }

    /// Queue a patch for `subject_id`. Returns immediately.
    ///
    /// Returns the tier the update was classified into. The tier is
    /// recomputed from the store's focus on every call.
    pub fn queue_update(&self, subject_id: impl Into<SubjectId>, patch: ArtifactPatch) -> Tier {
        let subject_id = subject_id.into();
        let tier = self.inner.store.focus().tier_for(&subject_id);

        if !self.inner.is_active() {
            debug!(subject = %subject_id, "scheduler stopped, dropping update");
            return tier;
        }

        match tier {
            Tier::Immediate => {
                trace!(subject = %subject_id, "applying immediate update");
                self.inner.store.update_artifact(&subject_id, patch);
            }
            Tier::Deferred | Tier::Background => {
                let replaced = {
                    let mut state = self.inner.state.lock();
                    match state.slot_mut(tier) {
                        Some(slot) => slot.queue.insert(subject_id.clone(), patch),
                        None => false,
                    }
                };
                if replaced {
                    trace!(subject = %subject_id, ?tier, "coalesced pending update");
                }
                self.inner.reschedule(tier);
            }
        }

        tier
    }

    /// Resume after [`PriorityScheduler::stop`]. No-op while running.
    pub fn start(&self) {
        if !self.inner.active.swap(true, Ordering::AcqRel) {
            debug!("scheduler started");
        }
    }

    /// Tear down: cancel outstanding flushes and discard all pending updates.
    ///
    /// Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Whether the scheduler is running.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Delays this scheduler was built with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Number of pending updates in a tier. Always zero for `Immediate`.
    pub fn pending_len(&self, tier: Tier) -> usize {
        self.inner
            .state
            .lock()
            .slot(tier)
            .map_or(0, |slot| slot.queue.len())
    }

    /// The patch waiting for `subject_id` in `tier`, if any.
    pub fn pending_patch(&self, subject_id: &SubjectId, tier: Tier) -> Option<ArtifactPatch> {
        self.inner
            .state
            .lock()
            .slot(tier)
            .and_then(|slot| slot.queue.get(subject_id))
            .map(|update| update.patch.clone())
    }
}

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl SchedulerInner {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Cancel the tier's outstanding flush and schedule a fresh one.
    fn reschedule(self: &Arc<Self>, tier: Tier) {
        let (previous, generation) = {
            let mut state = self.state.lock();
            let Some(slot) = state.slot_mut(tier) else {
                return;
            };
            slot.generation += 1;
            (slot.flush.take(), slot.generation)
        };

        if let Some(previous) = previous {
            self.cancel(previous);
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let callback: Callback = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.flush(tier, generation);
            }
        });

        let (id, kind) = match tier {
            Tier::Deferred => (
                self.runtime
                    .set_timeout(self.config.deferred_delay, callback),
                HandleKind::Timer,
            ),
            _ => self.schedule_background(callback),
        };

        let scheduled = ScheduledFlush { id, kind };

        let mut state = self.state.lock();
        let still_current = self.is_active()
            && state
                .slot(tier)
                .is_some_and(|slot| slot.generation == generation);
        if still_current {
            if let Some(slot) = state.slot_mut(tier) {
                slot.flush = Some(scheduled);
            }
        } else {
            drop(state);
            self.cancel(scheduled);
        }
    }

    fn schedule_background(&self, callback: Callback) -> (TimerId, HandleKind) {
        if !self.runtime.supports_idle() {
            return (
                self.runtime
                    .set_timeout(self.config.idle_fallback_delay, callback),
                HandleKind::Timer,
            );
        }

        // Keep a way back to the fallback if the runtime declines.
        let slot = Arc::new(Mutex::new(Some(callback)));
        let idle_slot = Arc::clone(&slot);
        let requested = self.runtime.request_idle(Box::new(move || {
            let callback = idle_slot.lock().take();
            if let Some(callback) = callback {
                callback();
            }
        }));
        if let Some(id) = requested {
            return (id, HandleKind::Idle);
        }

        let declined = slot.lock().take();
        let fallback: Callback = match declined {
            Some(callback) => callback,
            // The runtime already ran it while declining.
            None => Box::new(|| {}),
        };
        (
            self.runtime
                .set_timeout(self.config.idle_fallback_delay, fallback),
            HandleKind::Timer,
        )
    }

    fn cancel(&self, flush: ScheduledFlush) {
        match flush.kind {
            HandleKind::Timer => self.runtime.clear_timeout(flush.id),
            HandleKind::Idle => self.runtime.cancel_idle(flush.id),
        }
    }

    /// Apply and clear every pending update in `tier`.
    fn flush(&self, tier: Tier, generation: u64) {
        if !self.is_active() {
            trace!(?tier, "flush fired after teardown, ignoring");
            return;
        }

        let drained = {
            let mut state = self.state.lock();
            let Some(slot) = state.slot_mut(tier) else {
                return;
            };
            // The handle may not be recorded yet if the runtime fired the
            // callback before `reschedule` got the lock back.
            if slot.generation != generation {
                trace!(?tier, generation, "superseded flush, ignoring");
                return;
            }
            slot.generation += 1;
            slot.flush = None;
            slot.queue.drain()
        };

        debug!(?tier, count = drained.len(), "flushing pending updates");
        for update in drained {
            if !self.is_active() {
                return;
            }
            self.store.update_artifact(&update.subject_id, update.patch);
        }
    }

    fn stop(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let (handles, discarded) = {
            let mut state = self.state.lock();
            let discarded = state.deferred.queue.len() + state.background.queue.len();
            state.deferred.queue.drain();
            state.background.queue.drain();
            let handles = [state.deferred.flush.take(), state.background.flush.take()];
            (handles, discarded)
        };

        for flush in handles.into_iter().flatten() {
            self.cancel(flush);
        }

        debug!(discarded, "scheduler stopped");
    }
}
