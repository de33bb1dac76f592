use std::sync::{Arc, Mutex};

use chat_shared::domain::ThreadKind;
use serde_json::json;

use super::*;

fn message(body: &str) -> DomainEvent {
    DomainEvent::MessageReceived(MessageReceived {
        message_id: "mid.1".into(),
        author_id: "10".into(),
        body: body.into(),
        thread_id: "20".into(),
        thread_kind: ThreadKind::User,
        timestamp: 1_500_000_000_000,
    })
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> EventHandler) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&log);
    let make = move |label: &str| -> EventHandler {
        let log = Arc::clone(&shared);
        let label = label.to_string();
        Box::new(move |_event: &DomainEvent| -> anyhow::Result<()> {
            log.lock().unwrap().push(label.clone());
            Ok(())
        })
    };
    (log, make)
}

#[test]
fn handlers_run_in_registration_order() {
    let (log, make) = recorder();
    let mut dispatcher = EventDispatcher::new();
    dispatcher.subscribe(EventKind::MessageReceived, make("first"));
    dispatcher.subscribe(EventKind::MessageReceived, make("second"));
    dispatcher.subscribe(EventKind::InboxStatus, make("inbox"));

    let summary = dispatcher.publish(&message("hi"));
    assert_eq!(summary, DispatchSummary { delivered: 2, failed: 0 });
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn failing_handler_does_not_block_the_next_one() {
    let (log, make) = recorder();
    let mut dispatcher = EventDispatcher::new();
    dispatcher.subscribe(EventKind::MessageReceived, |_event| {
        Err(anyhow::anyhow!("handler exploded"))
    });
    dispatcher.subscribe(EventKind::MessageReceived, make("survivor"));

    let summary = dispatcher.publish(&message("hi"));
    assert_eq!(summary, DispatchSummary { delivered: 1, failed: 1 });
    assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
}

#[test]
fn panicking_handler_is_contained() {
    let (log, make) = recorder();
    let mut dispatcher = EventDispatcher::new();
    dispatcher.subscribe(EventKind::MessageReceived, |_event| panic!("boom"));
    dispatcher.subscribe(EventKind::MessageReceived, make("after panic"));

    let summary = dispatcher.publish_all([&message("one"), &message("two")]);
    assert_eq!(summary, DispatchSummary { delivered: 2, failed: 2 });
    assert_eq!(*log.lock().unwrap(), vec!["after panic", "after panic"]);
}

#[test]
fn publish_without_subscribers_is_a_no_op() {
    let dispatcher = EventDispatcher::new();
    let unknown = DomainEvent::Unknown(UnknownEvent { raw: json!({}) });
    assert_eq!(dispatcher.publish(&unknown), DispatchSummary::default());
}

#[test]
fn typed_helpers_receive_their_payload() {
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&bodies);
    let mut dispatcher = EventDispatcher::new();
    dispatcher.on_message_received(move |message| {
        sink.lock().unwrap().push(message.body.clone());
        Ok(())
    });

    dispatcher.publish(&message("typed"));
    dispatcher.publish(&DomainEvent::InboxStatus(InboxStatus {
        unseen_count: 0,
        unread_count: 0,
        recent_unread_count: 0,
    }));

    assert_eq!(*bodies.lock().unwrap(), vec!["typed"]);
    assert_eq!(dispatcher.handler_count(EventKind::MessageReceived), 1);
    assert_eq!(dispatcher.handler_count(EventKind::InboxStatus), 0);
}

#[test]
fn logging_handlers_cover_every_kind() {
    let dispatcher = EventDispatcher::with_logging_handlers();
    for kind in EventKind::ALL {
        assert_eq!(dispatcher.handler_count(kind), 1);
    }
    assert_eq!(
        dispatcher.publish(&message("logged")),
        DispatchSummary { delivered: 1, failed: 0 }
    );
}

#[test]
fn panic_message_reads_string_payloads() {
    let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
    let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
    let other: Box<dyn Any + Send> = Box::new(7_u8);
    assert_eq!(panic_message(owned.as_ref()), "owned");
    assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
    assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
}
