//! Subscription lifecycle through the public API.

use chrono::{TimeZone, Utc};
use livesync::{
    ChannelStatus, ChannelSubscriptionManager, ChatMessage, MemoryMessageStore, MemoryTransport,
    MessageSender, SubjectId, SubscribeOptions, SubscriptionState,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

fn test_manager(
    transport: MemoryTransport,
) -> (Arc<MemoryTransport>, Arc<MemoryMessageStore>, ChannelSubscriptionManager) {
    let transport = Arc::new(transport);
    let messages = Arc::new(MemoryMessageStore::new());
    let manager = ChannelSubscriptionManager::new(transport.clone(), messages.clone());
    (transport, messages, manager)
}

fn message_row(thread: &str, id: &str, content: &str) -> serde_json::Value {
    json!({
        "id": id,
        "thread_id": thread,
        "content": content,
        "created_at": "2024-01-06T12:00:00Z"
    })
}

// --- Delivery ---

#[test]
fn test_insert_lands_in_message_store() {
    let (transport, messages, manager) = test_manager(MemoryTransport::new());

    let _slot = manager.subscribe("t1", SubscribeOptions::default());
    transport.insert("public", "messages", message_row("t1", "m1", "hi"));

    assert_eq!(
        messages.messages(),
        vec![ChatMessage {
            id: "m1".to_string(),
            sender: MessageSender::Ai,
            content: "hi".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap(),
            streaming: false,
        }]
    );
}

#[test]
fn test_observer_sees_message_after_store() {
    let (transport, messages, manager) = test_manager(MemoryTransport::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let store = Arc::clone(&messages);
    let log = Arc::clone(&seen);
    let _slot = manager.subscribe(
        "t1",
        SubscribeOptions::default().on_message_received(move |message| {
            log.lock().push((message.id.clone(), store.len()));
        }),
    );
    transport.insert("public", "messages", message_row("t1", "m1", "a"));
    transport.insert("public", "messages", message_row("t1", "m2", "b"));

    assert_eq!(
        *seen.lock(),
        vec![("m1".to_string(), 1), ("m2".to_string(), 2)]
    );
}

#[test]
fn test_other_subjects_are_filtered_out() {
    let (transport, messages, manager) = test_manager(MemoryTransport::new());

    let _slot = manager.subscribe("t1", SubscribeOptions::default());
    transport.insert("public", "messages", message_row("t2", "m1", "not yours"));
    transport.insert("public", "threads", message_row("t1", "m2", "wrong table"));

    assert!(messages.is_empty());
}

// --- Status ---

#[test]
fn test_status_transitions_are_forwarded() {
    let (transport, _messages, manager) = test_manager(MemoryTransport::without_auto_ack());
    let statuses = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&statuses);
    let slot = manager.subscribe(
        "t1",
        SubscribeOptions::default().on_status_change(move |status| log.lock().push(status.clone())),
    );
    assert_eq!(slot.state(), SubscriptionState::Connecting);

    transport.emit_status("messages:t1", ChannelStatus::Subscribed);
    assert_eq!(slot.state(), SubscriptionState::Subscribed);

    transport.emit_status("messages:t1", ChannelStatus::Closed);
    assert_eq!(slot.state(), SubscriptionState::Closed);

    assert_eq!(
        *statuses.lock(),
        vec![ChannelStatus::Subscribed, ChannelStatus::Closed]
    );
}

#[test]
fn test_channel_error_is_not_retried() {
    let (transport, _messages, manager) = test_manager(MemoryTransport::new());
    let errors = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&errors);
    let slot = manager.subscribe(
        "t1",
        SubscribeOptions::default().on_error(move |e| log.lock().push(e.clone())),
    );
    transport.emit_status("messages:t1", ChannelStatus::ChannelError("socket reset".into()));

    assert_eq!(slot.state(), SubscriptionState::ChannelError);
    assert_eq!(errors.lock().len(), 1);
    assert!(errors.lock()[0].is_connection());
    assert_eq!(transport.open_count(), 1);
}

// --- Lifecycle ---

#[test]
fn test_resubscribe_sequence_closes_before_opening() {
    let (transport, _messages, manager) = test_manager(MemoryTransport::new());

    let mut slot = manager.subscribe("id", SubscribeOptions::default());
    slot.set_subject("other");
    slot.set_subject("id");

    assert_eq!(transport.open_count(), 3);
    assert_eq!(transport.unsubscribe_count(), 2);
    assert_eq!(
        transport.opened_names(),
        vec!["messages:id", "messages:other", "messages:id"]
    );
    assert_eq!(transport.peak_live("messages:id"), 1);
    assert_eq!(transport.live_channels(), vec!["messages:id".to_string()]);
}

#[test]
fn test_events_after_retarget_go_to_new_subject_only() {
    let (transport, messages, manager) = test_manager(MemoryTransport::new());

    let mut slot = manager.subscribe("t1", SubscribeOptions::default());
    slot.set_subject("t2");

    transport.insert("public", "messages", message_row("t1", "old", "x"));
    transport.insert("public", "messages", message_row("t2", "new", "y"));

    let ids: Vec<_> = messages.messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["new"]);
    assert_eq!(slot.subject(), &SubjectId::from("t2"));
}

#[test]
fn test_subscribe_many_is_independent_per_subject() {
    let (transport, messages, manager) = test_manager(MemoryTransport::new());

    let mut multi = manager.subscribe_many(["t1", "t2"], SubscribeOptions::default());
    assert_eq!(
        transport.live_channels(),
        vec!["messages:t1".to_string(), "messages:t2".to_string()]
    );

    transport.emit_status("messages:t1", ChannelStatus::ChannelError("boom".into()));
    assert_eq!(
        multi.slot(&"t1".into()).unwrap().state(),
        SubscriptionState::ChannelError
    );
    assert_eq!(
        multi.slot(&"t2".into()).unwrap().state(),
        SubscriptionState::Subscribed
    );

    transport.insert("public", "messages", message_row("t2", "m1", "still here"));
    assert_eq!(messages.len(), 1);

    // t2 persists across the change and keeps its channel.
    multi.set_subjects(["t2", "t3"]);
    assert_eq!(transport.open_count(), 3);
    assert_eq!(transport.unsubscribe_count(), 1);
}

#[test]
fn test_subscribe_many_disabled_opens_nothing() {
    let (transport, _messages, manager) = test_manager(MemoryTransport::new());

    let mut multi = manager.subscribe_many(["t1", "t2"], SubscribeOptions::disabled());
    assert_eq!(multi.len(), 2);
    assert_eq!(transport.open_count(), 0);

    multi.set_options(SubscribeOptions::default());
    assert_eq!(transport.open_count(), 2);
}
