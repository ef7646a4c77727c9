//! Realtime channel subscriptions.
//!
//! This module keeps one push channel open per subject:
//! - Insert events are translated into [`ChatMessage`](crate::ChatMessage)s
//!   and appended to the message store
//! - Channel status signals drive a small per-slot state machine
//! - Re-targeting or disabling a slot closes its channel before anything new
//!   is opened
//!
//! Failures never escape: they go to the `on_error` observer or the log.
//!
//! # Example
//!
//! ```ignore
//! let manager = ChannelSubscriptionManager::new(transport, messages);
//!
//! let mut slot = manager.subscribe(
//!     "thread-1",
//!     SubscribeOptions::default().on_error(|e| eprintln!("realtime: {e}")),
//! );
//!
//! // The viewer switched threads
//! slot.set_subject("thread-2");
//! ```

mod manager;
mod memory;
mod translate;
mod transport;
mod types;

pub use manager::{ChannelSubscriptionManager, MultiSubscription, SubscriptionSlot};
pub use memory::{ChannelId, MemoryChannel, MemoryTransport};
pub use translate::{parse_created_at, translate_insert};
pub use transport::{Channel, ChangeHandler, RealtimeTransport, StatusHandler};
pub use types::{
    ChangeKind, ChannelConfig, ChannelStatus, ErrorObserver, EventSpec, MessageObserver,
    RawChangeEvent, StatusObserver, SubscribeOptions, SubscriptionState,
};
