//! In-process realtime transport.
//!
//! Broadcasts inserted rows to every subscribed channel whose listener
//! matches, the way a realtime server would. Also counts opens and
//! unsubscribes and can be told to fail, which makes it the transport of
//! choice for tests.

use super::transport::{Channel, ChangeHandler, RealtimeTransport, StatusHandler};
use super::types::{ChannelConfig, ChannelStatus, EventSpec, RawChangeEvent};
use crate::error::{Result, SyncError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Unique identifier for an opened channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

/// A subscribed channel as seen by the transport.
struct ChannelEntry {
    name: String,
    listeners: Vec<(EventSpec, ChangeHandler)>,
    status: StatusHandler,
}

#[derive(Default)]
struct TransportStats {
    opened: Vec<String>,
    unsubscribes: usize,
    /// Highest number of simultaneously subscribed channels per name.
    peak_live: HashMap<String, usize>,
}

#[derive(Default)]
struct FailurePlan {
    open: Option<String>,
    subscribe: Option<String>,
    unsubscribe: Option<String>,
}

struct TransportShared {
    channels: RwLock<HashMap<ChannelId, ChannelEntry>>,
    next_id: AtomicU64,
    stats: Mutex<TransportStats>,
    failures: Mutex<FailurePlan>,
    auto_ack: bool,
}

impl TransportShared {
    fn live_count(&self, name: &str) -> usize {
        self.channels
            .read()
            .values()
            .filter(|entry| entry.name == name)
            .count()
    }
}

/// Transport that delivers everything in-process.
pub struct MemoryTransport {
    shared: Arc<TransportShared>,
}

impl MemoryTransport {
    /// Create a transport that confirms every subscription immediately.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Create a transport that leaves channels connecting until
    /// [`MemoryTransport::emit_status`] is called.
    pub fn without_auto_ack() -> Self {
        Self::build(false)
    }

    fn build(auto_ack: bool) -> Self {
        Self {
            shared: Arc::new(TransportShared {
                channels: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                stats: Mutex::new(TransportStats::default()),
                failures: Mutex::new(FailurePlan::default()),
                auto_ack,
            }),
        }
    }

    // --- Delivery ---

    /// Deliver an insert to every matching listener. Returns the number of
    /// listeners reached.
    pub fn insert(
        &self,
        schema: &str,
        table: &str,
        record: serde_json::Value,
    ) -> usize {
        let event = RawChangeEvent::insert(schema, table, record);
        self.broadcast(|_, spec| spec.matches(&event), &event)
    }

    /// Deliver `event` to every listener on channels named `name`, skipping
    /// filters. Used to push payloads a real server could mangle.
    pub fn emit(&self, name: &str, event: RawChangeEvent) -> usize {
        self.broadcast(|entry, _| entry.name == name, &event)
    }

    /// Send a status signal to every channel named `name`.
    pub fn emit_status(&self, name: &str, status: ChannelStatus) -> usize {
        let handlers: Vec<StatusHandler> = {
            let channels = self.shared.channels.read();
            channels
                .values()
                .filter(|entry| entry.name == name)
                .map(|entry| Arc::clone(&entry.status))
                .collect()
        };
        for handler in &handlers {
            handler(status.clone());
        }
        handlers.len()
    }

    /// Internal broadcast helper. Handlers run after the lock is released.
    fn broadcast<F>(&self, filter: F, event: &RawChangeEvent) -> usize
    where
        F: Fn(&ChannelEntry, &EventSpec) -> bool,
    {
        let mut targets: Vec<ChangeHandler> = Vec::new();
        {
            let channels = self.shared.channels.read();
            for entry in channels.values() {
                for (spec, handler) in &entry.listeners {
                    if filter(entry, spec) {
                        targets.push(Arc::clone(handler));
                    }
                }
            }
        }

        trace!(targets = targets.len(), "broadcasting change");
        for handler in &targets {
            handler(event.clone());
        }
        targets.len()
    }

    // --- Failure injection ---

    /// Make the next `open_channel` fail.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.shared.failures.lock().open = Some(reason.into());
    }

    /// Make the next `subscribe` fail.
    pub fn fail_next_subscribe(&self, reason: impl Into<String>) {
        self.shared.failures.lock().subscribe = Some(reason.into());
    }

    /// Make the next `unsubscribe` fail. The channel is still released.
    pub fn fail_next_unsubscribe(&self, reason: impl Into<String>) {
        self.shared.failures.lock().unsubscribe = Some(reason.into());
    }

    // --- Inspection ---

    /// Channels opened so far.
    pub fn open_count(&self) -> usize {
        self.shared.stats.lock().opened.len()
    }

    /// Names passed to `open_channel`, in call order.
    pub fn opened_names(&self) -> Vec<String> {
        self.shared.stats.lock().opened.clone()
    }

    /// `unsubscribe` calls so far, failed ones included.
    pub fn unsubscribe_count(&self) -> usize {
        self.shared.stats.lock().unsubscribes
    }

    /// Names of subscribed channels, sorted.
    pub fn live_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .channels
            .read()
            .values()
            .map(|entry| entry.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Highest number of channels named `name` ever subscribed at once.
    pub fn peak_live(&self, name: &str) -> usize {
        self.shared
            .stats
            .lock()
            .peak_live
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeTransport for MemoryTransport {
    fn open_channel(&self, name: &str, _config: &ChannelConfig) -> Result<Box<dyn Channel>> {
        self.shared.stats.lock().opened.push(name.to_string());
        if let Some(reason) = self.shared.failures.lock().open.take() {
            return Err(SyncError::Connection(reason));
        }

        let id = ChannelId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(Box::new(MemoryChannel {
            id,
            name: name.to_string(),
            listeners: Vec::new(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Channel handed out by [`MemoryTransport`].
pub struct MemoryChannel {
    id: ChannelId,
    name: String,
    /// Listeners attached before `subscribe`.
    listeners: Vec<(EventSpec, ChangeHandler)>,
    shared: Arc<TransportShared>,
}

impl MemoryChannel {
    /// Transport-local id of this channel.
    pub fn id(&self) -> ChannelId {
        self.id
    }
}

impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_changes(&mut self, spec: EventSpec, handler: ChangeHandler) {
        self.listeners.push((spec, handler));
    }

    fn subscribe(&mut self, on_status: StatusHandler) -> Result<()> {
        if let Some(reason) = self.shared.failures.lock().subscribe.take() {
            return Err(SyncError::Connection(reason));
        }

        self.shared.channels.write().insert(
            self.id,
            ChannelEntry {
                name: self.name.clone(),
                listeners: std::mem::take(&mut self.listeners),
                status: Arc::clone(&on_status),
            },
        );

        let live = self.shared.live_count(&self.name);
        {
            let mut stats = self.shared.stats.lock();
            let peak = stats.peak_live.entry(self.name.clone()).or_insert(0);
            *peak = (*peak).max(live);
        }

        if self.shared.auto_ack {
            on_status(ChannelStatus::Subscribed);
        }
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        self.shared.stats.lock().unsubscribes += 1;
        let removed = self.shared.channels.write().remove(&self.id);

        if let Some(reason) = self.shared.failures.lock().unsubscribe.take() {
            return Err(SyncError::Connection(reason));
        }
        if let Some(entry) = removed {
            (entry.status)(ChannelStatus::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(count: &Arc<AtomicUsize>) -> ChangeHandler {
        let count = Arc::clone(count);
        Arc::new(move |_: RawChangeEvent| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn noop_status() -> StatusHandler {
        Arc::new(|_: ChannelStatus| {})
    }

    #[test]
    fn test_insert_reaches_matching_listener_only() {
        let transport = MemoryTransport::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let mut channel = transport
            .open_channel("messages:t1", &ChannelConfig::default())
            .unwrap();
        channel.on_changes(
            EventSpec::inserts("public", "messages").with_filter("thread_id=eq.t1"),
            counting_handler(&hits),
        );
        channel.subscribe(noop_status()).unwrap();

        assert_eq!(transport.insert("public", "messages", json!({"thread_id": "t1"})), 1);
        assert_eq!(transport.insert("public", "messages", json!({"thread_id": "t2"})), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nothing_delivered_before_subscribe() {
        let transport = MemoryTransport::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let mut channel = transport
            .open_channel("messages:t1", &ChannelConfig::default())
            .unwrap();
        channel.on_changes(EventSpec::inserts("public", "messages"), counting_handler(&hits));

        transport.insert("public", "messages", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(transport.live_channels().is_empty());
    }

    #[test]
    fn test_unsubscribe_emits_closed_and_stops_delivery() {
        let transport = MemoryTransport::new();
        let statuses = Arc::new(Mutex::new(Vec::new()));

        let mut channel = transport
            .open_channel("messages:t1", &ChannelConfig::default())
            .unwrap();
        let log = Arc::clone(&statuses);
        channel
            .subscribe(Arc::new(move |status: ChannelStatus| log.lock().push(status)))
            .unwrap();
        channel.unsubscribe().unwrap();

        assert_eq!(
            *statuses.lock(),
            vec![ChannelStatus::Subscribed, ChannelStatus::Closed]
        );
        assert_eq!(transport.unsubscribe_count(), 1);
        assert!(transport.live_channels().is_empty());
    }

    #[test]
    fn test_injected_failures() {
        let transport = MemoryTransport::new();

        transport.fail_next_open("refused");
        assert!(transport
            .open_channel("a", &ChannelConfig::default())
            .is_err());

        let mut channel = transport.open_channel("a", &ChannelConfig::default()).unwrap();
        transport.fail_next_subscribe("rejected");
        assert!(channel.subscribe(noop_status()).is_err());

        channel.subscribe(noop_status()).unwrap();
        transport.fail_next_unsubscribe("gone");
        assert!(channel.unsubscribe().is_err());
        assert!(transport.live_channels().is_empty());
        assert_eq!(transport.open_count(), 2);
    }

    #[test]
    fn test_peak_live_tracks_overlap() {
        let transport = MemoryTransport::new();

        let mut first = transport.open_channel("x", &ChannelConfig::default()).unwrap();
        first.subscribe(noop_status()).unwrap();
        let mut second = transport.open_channel("x", &ChannelConfig::default()).unwrap();
        second.subscribe(noop_status()).unwrap();

        assert_eq!(transport.peak_live("x"), 2);
        assert_eq!(transport.peak_live("y"), 0);
    }
}
