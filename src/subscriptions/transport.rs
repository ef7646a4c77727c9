//! The realtime transport the subscription manager drives.

use super::types::{ChannelConfig, ChannelStatus, EventSpec, RawChangeEvent};
use crate::error::Result;
use std::sync::Arc;

/// Receives row changes matching a listener's [`EventSpec`].
pub type ChangeHandler = Arc<dyn Fn(RawChangeEvent) + Send + Sync>;

/// Receives connection status signals for a channel.
pub type StatusHandler = Arc<dyn Fn(ChannelStatus) + Send + Sync>;

/// Opens push channels.
pub trait RealtimeTransport: Send + Sync {
    /// Open a channel. Nothing is delivered until [`Channel::subscribe`].
    fn open_channel(&self, name: &str, config: &ChannelConfig) -> Result<Box<dyn Channel>>;
}

/// One push channel.
///
/// Handlers may be invoked from any thread, including synchronously from
/// inside [`Channel::subscribe`].
pub trait Channel: Send {
    fn name(&self) -> &str;

    /// Attach a change listener. Must be called before `subscribe`.
    fn on_changes(&mut self, spec: EventSpec, handler: ChangeHandler);

    /// Start delivery. Completion arrives through `on_status`; an `Err`
    /// means the request was rejected outright.
    fn subscribe(&mut self, on_status: StatusHandler) -> Result<()>;

    /// Stop delivery and release the channel.
    fn unsubscribe(&mut self) -> Result<()>;
}
