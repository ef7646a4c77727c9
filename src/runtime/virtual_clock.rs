//! Manually advanced runtime.

use super::{Callback, Runtime, TimerId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

struct ClockState {
    /// Virtual time elapsed since creation.
    now: Duration,
    /// Pending timers ordered by (deadline, id).
    timers: BTreeMap<(Duration, u64), Callback>,
    /// Deadline lookup for cancellation.
    deadlines: HashMap<u64, Duration>,
    /// Idle requests in issue order.
    idle: BTreeMap<u64, Callback>,
}

/// Runtime whose clock only moves when told to.
///
/// Timers fire from [`VirtualRuntime::advance`] in deadline order, ties broken
/// by scheduling order. Idle callbacks fire from [`VirtualRuntime::run_idle`].
/// No internal lock is held while a callback runs, so callbacks may schedule
/// or cancel further work.
pub struct VirtualRuntime {
    state: Mutex<ClockState>,
    next_id: AtomicU64,
    idle_supported: bool,
}

impl VirtualRuntime {
    /// Create a runtime with idle scheduling available.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                now: Duration::ZERO,
                timers: BTreeMap::new(),
                deadlines: HashMap::new(),
                idle: BTreeMap::new(),
            }),
            next_id: AtomicU64::new(1),
            idle_supported: true,
        }
    }

    /// Create a runtime without idle scheduling, so callers use their
    /// timer fallback.
    pub fn without_idle() -> Self {
        Self {
            idle_supported: false,
            ..Self::new()
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of timers not yet fired or cancelled.
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Number of idle requests not yet fired or cancelled.
    pub fn pending_idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Move the clock forward, firing every timer that falls due.
    ///
    /// Timers scheduled by a callback fire too if their deadline lands inside
    /// the window. Returns the number of callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        let mut fired = 0;

        loop {
            let due = {
                let mut state = self.state.lock();
                let next = state.timers.keys().next().copied();
                match next {
                    Some(key) if key.0 <= target => {
                        state.deadlines.remove(&key.1);
                        state.now = key.0;
                        state.timers.remove(&key)
                    }
                    _ => {
                        state.now = target;
                        None
                    }
                }
            };

            match due {
                Some(callback) => {
                    callback();
                    fired += 1;
                }
                None => break,
            }
        }

        fired
    }

    /// Fire every idle request issued before this call.
    ///
    /// Requests issued by the callbacks themselves wait for the next call.
    pub fn run_idle(&self) -> usize {
        let batch = std::mem::take(&mut self.state.lock().idle);
        let fired = batch.len();
        for (_, callback) in batch {
            callback();
        }
        fired
    }

    fn next_timer_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for VirtualRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for VirtualRuntime {
    fn set_timeout(&self, delay: Duration, callback: Callback) -> TimerId {
        let id = self.next_timer_id();
        let mut state = self.state.lock();
        let deadline = state.now + delay;
        state.timers.insert((deadline, id), callback);
        state.deadlines.insert(id, deadline);
        TimerId(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        let mut state = self.state.lock();
        if let Some(deadline) = state.deadlines.remove(&id.0) {
            state.timers.remove(&(deadline, id.0));
        }
    }

    fn supports_idle(&self) -> bool {
        self.idle_supported
    }

    fn request_idle(&self, callback: Callback) -> Option<TimerId> {
        if !self.idle_supported {
            return None;
        }
        let id = self.next_timer_id();
        self.state.lock().idle.insert(id, callback);
        Some(TimerId(id))
    }

    fn cancel_idle(&self, id: TimerId) {
        self.state.lock().idle.remove(&id.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Callback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = Arc::clone(&log);
        let make = move |label: &'static str| -> Callback {
            let log = Arc::clone(&handle);
            Box::new(move || log.lock().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let runtime = VirtualRuntime::new();
        let (log, make) = recorder();

        runtime.set_timeout(Duration::from_millis(300), make("late"));
        runtime.set_timeout(Duration::from_millis(100), make("early"));
        runtime.set_timeout(Duration::from_millis(100), make("early-second"));

        assert_eq!(runtime.advance(Duration::from_millis(99)), 0);
        assert_eq!(runtime.advance(Duration::from_millis(1)), 2);
        assert_eq!(*log.lock(), vec!["early", "early-second"]);

        runtime.advance(Duration::from_millis(500));
        assert_eq!(*log.lock(), vec!["early", "early-second", "late"]);
        assert_eq!(runtime.now(), Duration::from_millis(600));
    }

    #[test]
    fn test_cleared_timer_never_fires() {
        let runtime = VirtualRuntime::new();
        let (log, make) = recorder();

        let id = runtime.set_timeout(Duration::from_millis(10), make("cancelled"));
        runtime.clear_timeout(id);
        runtime.advance(Duration::from_secs(1));

        assert!(log.lock().is_empty());
        assert_eq!(runtime.pending_timers(), 0);
    }

    #[test]
    fn test_nested_timer_inside_window_fires() {
        let runtime = Arc::new(VirtualRuntime::new());
        let fired = Arc::new(Mutex::new(Vec::new()));

        let rt = Arc::clone(&runtime);
        let outer_log = Arc::clone(&fired);
        runtime.set_timeout(
            Duration::from_millis(10),
            Box::new(move || {
                outer_log.lock().push(rt.now());
                let inner_log = Arc::clone(&outer_log);
                let rt_inner = Arc::clone(&rt);
                rt.set_timeout(
                    Duration::from_millis(10),
                    Box::new(move || inner_log.lock().push(rt_inner.now())),
                );
            }),
        );

        runtime.advance(Duration::from_millis(25));
        assert_eq!(
            *fired.lock(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[test]
    fn test_idle_requests() {
        let runtime = VirtualRuntime::new();
        let (log, make) = recorder();

        let cancelled = runtime.request_idle(make("cancelled")).unwrap();
        runtime.request_idle(make("kept")).unwrap();
        runtime.cancel_idle(cancelled);

        assert_eq!(runtime.run_idle(), 1);
        assert_eq!(*log.lock(), vec!["kept"]);
        assert_eq!(runtime.run_idle(), 0);
    }

    #[test]
    fn test_idle_unsupported() {
        let runtime = VirtualRuntime::without_idle();
        let (log, make) = recorder();

        assert!(!runtime.supports_idle());
        assert!(runtime.request_idle(make("dropped")).is_none());
        runtime.run_idle();
        assert!(log.lock().is_empty());
    }
}
