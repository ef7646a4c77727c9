//! Subscription manager: one realtime channel per subject.

use super::transport::{Channel, ChangeHandler, RealtimeTransport, StatusHandler};
use super::translate::translate_insert;
use super::types::{
    ChannelConfig, ChannelStatus, EventSpec, RawChangeEvent, SubscribeOptions, SubscriptionState,
};
use crate::config::RealtimeConfig;
use crate::error::SyncError;
use crate::store::MessageStore;
use crate::types::SubjectId;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What every slot needs to open channels.
struct ManagerContext {
    transport: Arc<dyn RealtimeTransport>,
    messages: Arc<dyn MessageStore>,
    config: RealtimeConfig,
}

/// An open channel and the flags its handlers consult.
struct LiveSubscription {
    channel: Box<dyn Channel>,
    /// Cleared before unsubscribe; handlers drop anything arriving after.
    live: Arc<AtomicBool>,
}

/// Opens subject subscriptions against a realtime transport.
///
/// Translated messages go to the injected [`MessageStore`] first, then to the
/// subscription's `on_message_received` observer.
#[derive(Clone)]
pub struct ChannelSubscriptionManager {
    context: Arc<ManagerContext>,
}

impl ChannelSubscriptionManager {
    /// Create a manager with the default [`RealtimeConfig`].
    pub fn new(transport: Arc<dyn RealtimeTransport>, messages: Arc<dyn MessageStore>) -> Self {
        Self::with_config(transport, messages, RealtimeConfig::default())
    }

    /// Create a manager with non-default table and channel naming.
    pub fn with_config(
        transport: Arc<dyn RealtimeTransport>,
        messages: Arc<dyn MessageStore>,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            context: Arc::new(ManagerContext {
                transport,
                messages,
                config,
            }),
        }
    }

    /// Naming used for channels and filters.
    pub fn config(&self) -> &RealtimeConfig {
        &self.context.config
    }

    /// Subscribe to inserts for one subject.
    ///
    /// A disabled subscription or an empty subject opens nothing; the
    /// returned slot can still be re-targeted later.
    pub fn subscribe(
        &self,
        subject: impl Into<SubjectId>,
        options: SubscribeOptions,
    ) -> SubscriptionSlot {
        let mut slot = SubscriptionSlot {
            context: Arc::clone(&self.context),
            subject: subject.into(),
            options: Arc::new(RwLock::new(options)),
            live: None,
            state: Arc::new(Mutex::new(SubscriptionState::Idle)),
        };
        slot.open();
        slot
    }

    /// Subscribe to several subjects, one independent channel each.
    ///
    /// Empty and repeated ids are skipped.
    pub fn subscribe_many<I, S>(&self, subjects: I, options: SubscribeOptions) -> MultiSubscription
    where
        I: IntoIterator<Item = S>,
        S: Into<SubjectId>,
    {
        let mut multi = MultiSubscription {
            manager: self.clone(),
            options,
            slots: Vec::new(),
        };
        multi.set_subjects(subjects);
        multi
    }
}

/// One logical subscription: at most one live channel at a time.
///
/// Re-targeting with [`SubscriptionSlot::set_subject`] or toggling `enabled`
/// closes the current channel before opening the next. Dropping the slot
/// closes it.
pub struct SubscriptionSlot {
    context: Arc<ManagerContext>,
    subject: SubjectId,
    /// Shared with the channel handlers so observer changes apply in place.
    options: Arc<RwLock<SubscribeOptions>>,
    live: Option<LiveSubscription>,
    /// State of the current channel; replaced on every open.
    state: Arc<Mutex<SubscriptionState>>,
}

impl SubscriptionSlot {
    /// Subject the slot currently points at.
    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    /// Lifecycle state of the current channel.
    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// Whether a channel is currently held open.
    pub fn is_open(&self) -> bool {
        self.live.is_some()
    }

    /// Name of the open channel.
    pub fn channel_name(&self) -> Option<&str> {
        self.live.as_ref().map(|live| live.channel.name())
    }

    /// Whether the current options allow a channel.
    pub fn is_enabled(&self) -> bool {
        self.options.read().enabled
    }

    /// Point the slot at another subject. The same subject is a no-op.
    pub fn set_subject(&mut self, subject: impl Into<SubjectId>) {
        let subject = subject.into();
        if subject == self.subject {
            return;
        }
        self.teardown();
        self.subject = subject;
        self.open();
    }

    /// Replace the options.
    ///
    /// Observers take effect immediately on the current channel; only a
    /// change of `enabled` reopens or closes it.
    pub fn set_options(&mut self, options: SubscribeOptions) {
        let toggled = {
            let mut current = self.options.write();
            let toggled = current.enabled != options.enabled;
            *current = options;
            toggled
        };
        if toggled {
            self.teardown();
            self.open();
        }
    }

    /// Close the channel, if any. The slot stays usable.
    pub fn close(&mut self) {
        self.teardown();
    }

    fn open(&mut self) {
        if !self.is_enabled() || self.subject.is_empty() {
            debug!(subject = %self.subject, "subscription disabled or subject empty, not opening");
            return;
        }

        let ctx = Arc::clone(&self.context);
        let name = ctx.config.channel_name(&self.subject);
        let state = Arc::new(Mutex::new(SubscriptionState::Connecting));
        self.state = Arc::clone(&state);

        let mut channel = match ctx.transport.open_channel(&name, &ChannelConfig::default()) {
            Ok(channel) => channel,
            Err(e) => {
                *state.lock() = SubscriptionState::ChannelError;
                self.report_failure("open channel", e);
                return;
            }
        };

        let live = Arc::new(AtomicBool::new(true));
        let spec = EventSpec::inserts(ctx.config.schema.clone(), ctx.config.table.clone())
            .with_filter(ctx.config.subject_filter(&self.subject));
        channel.on_changes(spec, self.change_handler(&live));

        debug!(subject = %self.subject, channel = %name, "subscribing");
        if let Err(e) = channel.subscribe(self.status_handler(&live, &state)) {
            live.store(false, Ordering::Release);
            *state.lock() = SubscriptionState::ChannelError;
            release(channel.as_mut(), &self.subject);
            self.report_failure("subscribe", e);
            return;
        }

        self.live = Some(LiveSubscription { channel, live });
    }

    fn change_handler(&self, live: &Arc<AtomicBool>) -> ChangeHandler {
        let live = Arc::clone(live);
        let options = Arc::clone(&self.options);
        let messages = Arc::clone(&self.context.messages);
        let subject = self.subject.clone();

        Arc::new(move |event: RawChangeEvent| {
            if !live.load(Ordering::Acquire) {
                trace!(subject = %subject, "event after teardown, dropping");
                return;
            }
            match translate_insert(&event) {
                Ok(message) => {
                    trace!(subject = %subject, message_id = %message.id, "message received");
                    messages.add_message(message.clone());
                    let observer = options.read().on_message_received.clone();
                    if let Some(observer) = observer {
                        observer(&message);
                    }
                }
                Err(e) => {
                    warn!(subject = %subject, error = %e, "dropping untranslatable event");
                    let observer = options.read().on_error.clone();
                    if let Some(observer) = observer {
                        observer(&e);
                    }
                }
            }
        })
    }

    fn status_handler(
        &self,
        live: &Arc<AtomicBool>,
        state: &Arc<Mutex<SubscriptionState>>,
    ) -> StatusHandler {
        let live = Arc::clone(live);
        let state = Arc::clone(state);
        let options = Arc::clone(&self.options);
        let subject = self.subject.clone();

        Arc::new(move |status: ChannelStatus| {
            if !live.load(Ordering::Acquire) {
                trace!(subject = %subject, ?status, "status after teardown, ignoring");
                return;
            }
            *state.lock() = SubscriptionState::after(&status);
            debug!(subject = %subject, ?status, "channel status");

            let (on_status, on_error) = {
                let options = options.read();
                (options.on_status_change.clone(), options.on_error.clone())
            };
            if let Some(observer) = on_status {
                observer(&status);
            }
            if let Some(error) = status.as_error() {
                warn!(subject = %subject, error = %error, "channel failed");
                if let Some(observer) = on_error {
                    observer(&error);
                }
            }
        })
    }

    fn report_failure(&self, action: &str, error: SyncError) {
        let error = if error.is_connection() {
            error
        } else {
            SyncError::Connection(error.to_string())
        };
        warn!(subject = %self.subject, action, error = %error, "subscription not established");
        let observer = self.options.read().on_error.clone();
        if let Some(observer) = observer {
            observer(&error);
        }
    }

    fn teardown(&mut self) {
        if let Some(mut current) = self.live.take() {
            current.live.store(false, Ordering::Release);
            release(current.channel.as_mut(), &self.subject);
            debug!(subject = %self.subject, "subscription closed");
        }
        self.state = Arc::new(Mutex::new(SubscriptionState::Idle));
    }
}

impl Drop for SubscriptionSlot {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Best-effort unsubscribe: failures and panics are logged, never raised.
fn release(channel: &mut dyn Channel, subject: &SubjectId) {
    match catch_unwind(AssertUnwindSafe(|| channel.unsubscribe())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(subject = %subject, error = %e, "unsubscribe failed"),
        Err(_) => warn!(subject = %subject, "unsubscribe panicked"),
    }
}

/// Independent subscriptions for a set of subjects.
///
/// Only the options are shared; each subject has its own slot and channel.
pub struct MultiSubscription {
    manager: ChannelSubscriptionManager,
    options: SubscribeOptions,
    slots: Vec<SubscriptionSlot>,
}

impl MultiSubscription {
    /// Replace the subject set.
    ///
    /// Subjects that stay keep their channel; removed ones are closed before
    /// new ones are opened.
    pub fn set_subjects<I, S>(&mut self, subjects: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<SubjectId>,
    {
        let mut seen = HashSet::new();
        let wanted: Vec<SubjectId> = subjects
            .into_iter()
            .map(Into::into)
            .filter(|id: &SubjectId| !id.is_empty() && seen.insert(id.clone()))
            .collect();

        let mut existing: HashMap<SubjectId, SubscriptionSlot> = std::mem::take(&mut self.slots)
            .into_iter()
            .map(|slot| (slot.subject.clone(), slot))
            .collect();

        existing.retain(|id, _| seen.contains(id));

        self.slots = wanted
            .into_iter()
            .map(|id| match existing.remove(&id) {
                Some(slot) => slot,
                None => self.manager.subscribe(id, self.options.clone()),
            })
            .collect();
    }

    /// Apply new options to every subject.
    pub fn set_options(&mut self, options: SubscribeOptions) {
        for slot in &mut self.slots {
            slot.set_options(options.clone());
        }
        self.options = options;
    }

    /// Subjects in the current set, in order.
    pub fn subjects(&self) -> Vec<SubjectId> {
        self.slots.iter().map(|slot| slot.subject.clone()).collect()
    }

    /// Slot for one subject of the set.
    pub fn slot(&self, subject: &SubjectId) -> Option<&SubscriptionSlot> {
        self.slots.iter().find(|slot| &slot.subject == subject)
    }

    /// Number of subjects in the set.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the set has no subjects.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Close every subscription and forget the subjects.
    pub fn close(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMessageStore;
    use crate::subscriptions::MemoryTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn setup() -> (Arc<MemoryTransport>, Arc<MemoryMessageStore>, ChannelSubscriptionManager) {
        let transport = Arc::new(MemoryTransport::new());
        let messages = Arc::new(MemoryMessageStore::new());
        let manager = ChannelSubscriptionManager::new(transport.clone(), messages.clone());
        (transport, messages, manager)
    }

    fn row(thread: &str, id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "thread_id": thread,
            "content": "hello",
            "created_at": "2024-01-06T12:00:00Z"
        })
    }

    #[test]
    fn test_subscribe_reaches_subscribed() {
        let (transport, _messages, manager) = setup();

        let slot = manager.subscribe("t1", SubscribeOptions::default());
        assert_eq!(slot.state(), SubscriptionState::Subscribed);
        assert_eq!(slot.channel_name(), Some("messages:t1"));
        assert_eq!(transport.open_count(), 1);
    }

    #[test]
    fn test_disabled_or_empty_is_noop() {
        let (transport, _messages, manager) = setup();

        let disabled = manager.subscribe("t1", SubscribeOptions::disabled());
        let empty = manager.subscribe("", SubscribeOptions::default());

        assert!(!disabled.is_open());
        assert!(!empty.is_open());
        assert_eq!(disabled.state(), SubscriptionState::Idle);
        assert_eq!(transport.open_count(), 0);
    }

    #[test]
    fn test_set_same_subject_does_not_churn() {
        let (transport, _messages, manager) = setup();

        let mut slot = manager.subscribe("t1", SubscribeOptions::default());
        slot.set_subject("t1");

        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.unsubscribe_count(), 0);
    }

    #[test]
    fn test_toggle_enabled() {
        let (transport, _messages, manager) = setup();

        let mut slot = manager.subscribe("t1", SubscribeOptions::default());
        slot.set_options(SubscribeOptions::disabled());
        assert!(!slot.is_open());
        assert_eq!(slot.state(), SubscriptionState::Idle);
        assert_eq!(transport.unsubscribe_count(), 1);

        slot.set_options(SubscribeOptions::default());
        assert!(slot.is_open());
        assert_eq!(transport.open_count(), 2);
    }

    #[test]
    fn test_observer_swap_keeps_channel() {
        let (transport, _messages, manager) = setup();
        let received = Arc::new(AtomicUsize::new(0));

        let mut slot = manager.subscribe("t1", SubscribeOptions::default());
        let counter = Arc::clone(&received);
        slot.set_options(SubscribeOptions::default().on_message_received(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        transport.insert("public", "messages", row("t1", "m1"));
        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(transport.open_count(), 1);
    }

    #[test]
    fn test_drop_closes_channel() {
        let (transport, _messages, manager) = setup();

        {
            let _slot = manager.subscribe("t1", SubscribeOptions::default());
            assert_eq!(transport.live_channels(), vec!["messages:t1".to_string()]);
        }

        assert!(transport.live_channels().is_empty());
        assert_eq!(transport.unsubscribe_count(), 1);
    }

    #[test]
    fn test_multi_diffs_subjects() {
        let (transport, _messages, manager) = setup();

        let mut multi = manager.subscribe_many(["t1", "t2", "t2", ""], SubscribeOptions::default());
        assert_eq!(multi.len(), 2);
        assert_eq!(transport.open_count(), 2);

        multi.set_subjects(["t2", "t3"]);
        assert_eq!(multi.subjects(), vec![SubjectId::from("t2"), SubjectId::from("t3")]);
        assert_eq!(transport.open_count(), 3);
        assert_eq!(transport.unsubscribe_count(), 1);

        multi.close();
        assert!(multi.is_empty());
        assert!(transport.live_channels().is_empty());
    }
}
