//! Real-time cooperative event loop.

use super::{Callback, Runtime, TimerId};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

enum LoopMessage {
    Task(Callback),
    /// Timer set from another thread; re-evaluate the sleep deadline.
    Wake,
}

#[derive(Default)]
struct LoopTimers {
    queue: BTreeMap<(Instant, u64), Callback>,
    deadlines: HashMap<u64, Instant>,
    idle: BTreeMap<u64, Callback>,
}

struct LoopShared {
    timers: Mutex<LoopTimers>,
    next_id: AtomicU64,
    sender: Sender<LoopMessage>,
}

/// Cloneable handle to an [`EventLoop`].
///
/// Implements [`Runtime`], and lets any thread post work that the loop runs
/// on its own thread.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    /// Queue `task` to run on the loop thread.
    ///
    /// Returns false if the loop has been dropped.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.shared
            .sender
            .send(LoopMessage::Task(Box::new(task)))
            .is_ok()
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Runtime for LoopHandle {
    fn set_timeout(&self, delay: Duration, callback: Callback) -> TimerId {
        let id = self.next_id();
        let deadline = Instant::now() + delay;
        {
            let mut timers = self.shared.timers.lock();
            timers.queue.insert((deadline, id), callback);
            timers.deadlines.insert(id, deadline);
        }
        // A sleeping loop may be waiting past this deadline.
        let _ = self.shared.sender.send(LoopMessage::Wake);
        TimerId(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        let mut timers = self.shared.timers.lock();
        if let Some(deadline) = timers.deadlines.remove(&id.0) {
            timers.queue.remove(&(deadline, id.0));
        }
    }

    fn supports_idle(&self) -> bool {
        true
    }

    fn request_idle(&self, callback: Callback) -> Option<TimerId> {
        let id = self.next_id();
        self.shared.timers.lock().idle.insert(id, callback);
        let _ = self.shared.sender.send(LoopMessage::Wake);
        Some(TimerId(id))
    }

    fn cancel_idle(&self, id: TimerId) {
        self.shared.timers.lock().idle.remove(&id.0);
    }
}

/// Single-threaded loop that runs posted tasks, timers, and idle callbacks.
///
/// Each turn runs, in order: every posted task, every due timer. Idle
/// callbacks run only on a turn where neither produced work, which is what
/// makes them "idle". When nothing is ready the loop sleeps until the next
/// timer deadline, a posted task, or the turn's wait budget runs out.
pub struct EventLoop {
    handle: LoopHandle,
    receiver: Receiver<LoopMessage>,
}

impl EventLoop {
    /// Create an idle loop.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            handle: LoopHandle {
                shared: Arc::new(LoopShared {
                    timers: Mutex::new(LoopTimers::default()),
                    next_id: AtomicU64::new(1),
                    sender,
                }),
            },
            receiver,
        }
    }

    /// A handle other threads can post through.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Run one turn, sleeping at most `max_wait` if nothing is ready.
    ///
    /// Returns the number of callbacks run.
    pub fn turn(&self, max_wait: Duration) -> usize {
        let mut ran = self.drain_posted();
        ran += self.run_due_timers();
        if ran > 0 {
            return ran;
        }

        ran = self.run_idle_batch();
        if ran > 0 {
            return ran;
        }

        let wait = match self.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(max_wait),
            None => max_wait,
        };

        match self.receiver.recv_timeout(wait) {
            Ok(LoopMessage::Task(task)) => {
                task();
                1
            }
            Ok(LoopMessage::Wake) | Err(RecvTimeoutError::Timeout) => self.run_due_timers(),
            Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Run turns until `duration` has elapsed.
    pub fn run_for(&self, duration: Duration) -> usize {
        let end = Instant::now() + duration;
        let mut ran = 0;
        loop {
            let now = Instant::now();
            if now >= end {
                return ran;
            }
            ran += self.turn(end - now);
        }
    }

    /// Run turns until one finds nothing ready, without sleeping.
    pub fn run_until_stalled(&self) -> usize {
        let mut ran = 0;
        loop {
            let turn = self.turn(Duration::ZERO);
            if turn == 0 {
                return ran;
            }
            ran += turn;
        }
    }

    /// Timers and idle requests still outstanding.
    pub fn pending(&self) -> usize {
        let timers = self.handle.shared.timers.lock();
        timers.queue.len() + timers.idle.len()
    }

    fn drain_posted(&self) -> usize {
        let mut ran = 0;
        while let Ok(message) = self.receiver.try_recv() {
            if let LoopMessage::Task(task) = message {
                task();
                ran += 1;
            }
        }
        ran
    }

    fn run_due_timers(&self) -> usize {
        let now = Instant::now();
        let mut ran = 0;
        loop {
            let due = {
                let mut timers = self.handle.shared.timers.lock();
                let next = timers.queue.keys().next().copied();
                match next {
                    Some(key) if key.0 <= now => {
                        timers.deadlines.remove(&key.1);
                        timers.queue.remove(&key)
                    }
                    _ => None,
                }
            };
            match due {
                Some(callback) => {
                    callback();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    fn run_idle_batch(&self) -> usize {
        let batch = std::mem::take(&mut self.handle.shared.timers.lock().idle);
        let ran = batch.len();
        for (_, callback) in batch {
            callback();
        }
        ran
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.handle
            .shared
            .timers
            .lock()
            .queue
            .keys()
            .next()
            .map(|key| key.0)
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}
