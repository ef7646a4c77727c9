//! Host scheduling primitives.
//!
//! The scheduler never sleeps or spawns; it asks a [`Runtime`] to call it back
//! later. Two runtimes ship with the crate:
//! - [`VirtualRuntime`]: a manually advanced clock, for tests and for hosts
//!   that drive their own frame loop
//! - [`EventLoop`]: a real-time cooperative loop run by the host thread,
//!   with a [`LoopHandle`] that other threads can post work through
//!
//! # Example
//!
//! ```ignore
//! let runtime = VirtualRuntime::new();
//! runtime.set_timeout(Duration::from_millis(200), Box::new(|| println!("fired")));
//! runtime.advance(Duration::from_millis(200));
//! ```

mod event_loop;
mod virtual_clock;

pub use event_loop::{EventLoop, LoopHandle};
pub use virtual_clock::VirtualRuntime;

use std::fmt;
use std::time::Duration;

/// A unit of deferred work.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Handle for a scheduled timer or idle request.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerId({})", self.0)
    }
}

/// Timer and idle scheduling offered by the host.
pub trait Runtime: Send + Sync {
    /// Run `callback` once after `delay`.
    fn set_timeout(&self, delay: Duration, callback: Callback) -> TimerId;

    /// Cancel a timer. Unknown or already-fired ids are ignored.
    fn clear_timeout(&self, id: TimerId);

    /// Whether [`Runtime::request_idle`] is available.
    fn supports_idle(&self) -> bool {
        false
    }

    /// Run `callback` when the host has spare capacity.
    ///
    /// Returns `None` when idle scheduling is unsupported; the callback is
    /// dropped in that case.
    fn request_idle(&self, callback: Callback) -> Option<TimerId> {
        drop(callback);
        None
    }

    /// Cancel an idle request.
    fn cancel_idle(&self, _id: TimerId) {}
}
