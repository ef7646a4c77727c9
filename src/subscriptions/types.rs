//! Subscription types for realtime message channels.

use crate::error::SyncError;
use crate::types::ChatMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Observer for translated messages.
pub type MessageObserver = Arc<dyn Fn(&ChatMessage) + Send + Sync>;

/// Observer for transformation and connection failures.
pub type ErrorObserver = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Observer for channel status signals.
pub type StatusObserver = Arc<dyn Fn(&ChannelStatus) + Send + Sync>;

/// Options for a subject subscription.
#[derive(Clone)]
pub struct SubscribeOptions {
    /// When false no channel is opened.
    /// Default: true
    pub enabled: bool,

    /// Called after a message has been added to the message store.
    pub on_message_received: Option<MessageObserver>,

    /// Called on transformation or connection failure.
    pub on_error: Option<ErrorObserver>,

    /// Called for every status signal of the live channel.
    pub on_status_change: Option<StatusObserver>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            on_message_received: None,
            on_error: None,
            on_status_change: None,
        }
    }
}

impl SubscribeOptions {
    /// Options that never open a channel.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Toggle whether a channel is opened.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Observe every message after it is stored.
    pub fn on_message_received(
        mut self,
        observer: impl Fn(&ChatMessage) + Send + Sync + 'static,
    ) -> Self {
        self.on_message_received = Some(Arc::new(observer));
        self
    }

    /// Observe transformation and connection errors.
    pub fn on_error(mut self, observer: impl Fn(&SyncError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(observer));
        self
    }

    /// Observe channel status signals.
    pub fn on_status_change(
        mut self,
        observer: impl Fn(&ChannelStatus) + Send + Sync + 'static,
    ) -> Self {
        self.on_status_change = Some(Arc::new(observer));
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("enabled", &self.enabled)
            .field("on_message_received", &self.on_message_received.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_status_change", &self.on_status_change.is_some())
            .finish()
    }
}

/// Connection signal reported by a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    TimedOut,
    Closed,
    ChannelError(String),
}

impl ChannelStatus {
    /// The failure this signal represents, if any.
    pub fn as_error(&self) -> Option<SyncError> {
        match self {
            ChannelStatus::ChannelError(reason) => Some(SyncError::Connection(reason.clone())),
            ChannelStatus::TimedOut => {
                Some(SyncError::Connection("subscription timed out".to_string()))
            }
            ChannelStatus::Subscribed | ChannelStatus::Closed => None,
        }
    }
}

/// Lifecycle of one subscription slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// No channel.
    Idle,
    /// Channel opened, waiting for the transport to confirm.
    Connecting,
    Subscribed,
    Closed,
    /// Open, subscribe, or the channel itself failed. Not retried.
    ChannelError,
}

impl SubscriptionState {
    pub(crate) fn after(status: &ChannelStatus) -> Self {
        match status {
            ChannelStatus::Subscribed => SubscriptionState::Subscribed,
            ChannelStatus::Closed => SubscriptionState::Closed,
            ChannelStatus::TimedOut | ChannelStatus::ChannelError(_) => {
                SubscriptionState::ChannelError
            }
        }
    }
}

/// Row-level change kinds a channel can listen for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which row changes a channel listener wants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSpec {
    pub event: ChangeKind,
    pub schema: String,
    pub table: String,
    /// `column=eq.value` row filter.
    pub filter: Option<String>,
}

impl EventSpec {
    /// Listen for inserts on `schema.table`.
    pub fn inserts(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            event: ChangeKind::Insert,
            schema: schema.into(),
            table: table.into(),
            filter: None,
        }
    }

    /// Restrict to rows matching a `column=eq.value` filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Whether a change on `schema.table` with `row` passes this spec.
    ///
    /// Only `eq` filters are understood; any other operator matches nothing.
    pub fn matches(&self, event: &RawChangeEvent) -> bool {
        if event.kind != self.event || event.schema != self.schema || event.table != self.table {
            return false;
        }

        let Some(filter) = &self.filter else {
            return true;
        };
        let Some((column, expected)) = filter
            .split_once('=')
            .and_then(|(column, rest)| rest.strip_prefix("eq.").map(|value| (column, value)))
        else {
            return false;
        };

        match event.record.as_ref().and_then(|row| row.get(column)) {
            Some(serde_json::Value::String(value)) => value == expected,
            Some(other) if !other.is_null() => other.to_string() == expected,
            _ => false,
        }
    }
}

/// Options passed when opening a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Require an authorized connection.
    pub private: bool,
}

/// A change as delivered by the transport, before translation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawChangeEvent {
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    /// The new row. `None` or JSON null when the payload was lost.
    #[serde(rename = "new")]
    pub record: Option<serde_json::Value>,
}

impl RawChangeEvent {
    /// An insert event carrying `row`.
    pub fn insert(
        schema: impl Into<String>,
        table: impl Into<String>,
        record: serde_json::Value,
    ) -> Self {
        Self {
            kind: ChangeKind::Insert,
            schema: schema.into(),
            table: table.into(),
            record: Some(record),
        }
    }
}
