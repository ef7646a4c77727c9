//! # livesync
//!
//! Client-side sync core for a realtime collaborative app: it takes change
//! events pushed from the server and lands them in shared stores without
//! letting off-screen data compete with what the viewer is looking at.
//!
//! ## Core Concepts
//!
//! - **Scheduler**: applies artifact patches immediately, debounced, or at
//!   idle time depending on the viewer's focus
//! - **Subscriptions**: one realtime channel per subject, translated into
//!   chat messages
//! - **Runtime**: the host's timers and idle callbacks, virtual or real
//! - **Stores**: injected artifact and message stores
//!
//! ## Example
//!
//! ```ignore
//! use livesync::{
//!     ArtifactPatch, ChannelSubscriptionManager, MemoryArtifactStore, MemoryMessageStore,
//!     PriorityScheduler, SchedulerConfig, SubscribeOptions, VirtualRuntime,
//! };
//!
//! let artifacts = Arc::new(MemoryArtifactStore::new());
//! artifacts.set_active(Some("doc-1".into()));
//!
//! let scheduler = PriorityScheduler::new(
//!     artifacts.clone(),
//!     Arc::new(VirtualRuntime::new()),
//!     SchedulerConfig::default(),
//! );
//! scheduler.queue_update("doc-1", ArtifactPatch::new().with("title", "Draft"));
//!
//! let manager = ChannelSubscriptionManager::new(transport, Arc::new(MemoryMessageStore::new()));
//! let slot = manager.subscribe("thread-1", SubscribeOptions::default());
//! ```

pub mod config;
pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use config::{RealtimeConfig, SchedulerConfig};
pub use error::{Result, SyncError};
pub use runtime::{Callback, EventLoop, LoopHandle, Runtime, TimerId, VirtualRuntime};
pub use scheduler::{PriorityScheduler, QueuedUpdate};
pub use store::{
    ArtifactFields, ArtifactStore, MemoryArtifactStore, MemoryMessageStore, MessageStore,
};
pub use subscriptions::{
    ChangeKind, Channel, ChannelConfig, ChannelStatus, ChannelSubscriptionManager, EventSpec,
    MemoryTransport, MultiSubscription, RawChangeEvent, RealtimeTransport, SubscribeOptions,
    SubscriptionSlot, SubscriptionState,
};
pub use types::*;
