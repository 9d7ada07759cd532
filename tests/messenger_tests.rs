//! The async messaging runtime, driven without a realtime server: the
//! socket task keeps retrying in the background while sends, thread
//! switches and mark-read effects run against the recording backend.

mod common;

use std::time::Duration;

use common::{harness, Call, RecordingBackend, RecordingNotifier};
use plaza::cache::keys;
use plaza::messenger::Messenger;
use plaza::model::{Conversation, Message};
use plaza::realtime::{ChangeEvent, ChangeKind, RealtimeClient, RealtimeEvent};
use plaza::toast::MessageAlert;
use serde_json::{json, Value};
use tokio::sync::watch;

/// Nothing listens here, so the socket task only ever backs off.
const UNREACHABLE: &str = "ws://127.0.0.1:9/realtime/v1/websocket";

fn offline_client() -> RealtimeClient {
    let (_, token) = watch::channel("anon".to_string());
    RealtimeClient::connect(UNREACHABLE.to_string(), token)
}

/// A message row arriving on the viewer's inbox channel.
fn inbox_insert(viewer: &str, id: &str, from: &str, content: &str) -> RealtimeEvent {
    RealtimeEvent::Change {
        channel: format!("user-messages-{viewer}"),
        change: ChangeEvent {
            kind: ChangeKind::Insert,
            table: "messages".to_string(),
            record: json!({
                "id": id,
                "sender_id": from,
                "receiver_id": viewer,
                "content": content,
                "created_at": "2026-03-01T09:00:00Z",
            }),
            old_record: Value::Null,
        },
    }
}

async fn wait_for_alert(notifier: &RecordingNotifier) -> Option<MessageAlert> {
    for _ in 0..100 {
        if let Some(alert) = notifier.alerts.lock().unwrap().first().cloned() {
            return Some(alert);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

async fn wait_for_mark_read(backend: &RecordingBackend, sender: &str) -> bool {
    for _ in 0..100 {
        let marked = backend.calls().iter().any(|c| {
            matches!(c, Call::Update(q, _) if q.eq_value("sender_id") == Some(sender))
        });
        if marked {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Stop the socket task and wait until it has gone away.
async fn close(realtime: &RealtimeClient) {
    realtime.shutdown();
    for _ in 0..200 {
        if realtime.send_broadcast("closing", "noop", json!({})).is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("realtime task did not stop");
}

#[tokio::test]
async fn send_appends_to_the_open_thread() {
    let h = harness("alice");
    h.cache.set(&keys::messages("bob"), &Vec::<Message>::new());
    h.cache.set(&keys::conversations(), &Vec::<Conversation>::new());
    let realtime = offline_client();
    let messenger = Messenger::start("alice", h.mutations.clone(), realtime.clone()).unwrap();

    messenger.open_thread("bob");
    let sent = messenger.send("  hello bob ").await.unwrap();
    assert_eq!(sent.receiver_id, "bob");
    assert_eq!(sent.content, "hello bob");

    let thread: Vec<Message> = h.cache.get(&keys::messages("bob")).unwrap();
    assert_eq!(thread.last().map(|m| m.id.as_str()), Some(sent.id.as_str()));
    let list: Vec<Conversation> = h.cache.get(&keys::conversations()).unwrap();
    assert_eq!(list[0].counterpart_id, "bob");
    assert_eq!(list[0].unread_count, 0);

    messenger.shutdown();
    realtime.shutdown();
}

#[tokio::test]
async fn send_needs_an_open_thread() {
    let h = harness("alice");
    let realtime = offline_client();
    let messenger = Messenger::start("alice", h.mutations.clone(), realtime.clone()).unwrap();

    assert!(messenger.send("hi").await.is_err());
    messenger.open_thread("alice");
    assert_eq!(messenger.open_thread_id(), None);
    assert!(h.backend.inserts_into("messages").is_empty());

    realtime.shutdown();
}

#[tokio::test]
async fn opening_a_thread_marks_it_read_in_the_background() {
    let h = harness("alice");
    let realtime = offline_client();
    let messenger = Messenger::start("alice", h.mutations.clone(), realtime.clone()).unwrap();

    messenger.open_thread("bob");
    assert_eq!(messenger.open_thread_id().as_deref(), Some("bob"));
    assert!(messenger.is_watching_thread());
    assert!(
        wait_for_mark_read(&h.backend, "bob").await,
        "mark-read update was never issued"
    );

    messenger.close_thread();
    assert_eq!(messenger.open_thread_id(), None);
    assert!(!messenger.is_watching_thread());
    realtime.shutdown();
}

#[tokio::test]
async fn thread_opens_even_when_its_channel_cannot_be_joined() {
    let h = harness("alice");
    let realtime = offline_client();
    let messenger = Messenger::start("alice", h.mutations.clone(), realtime.clone()).unwrap();
    close(&realtime).await;

    messenger.open_thread("bob");
    assert_eq!(messenger.open_thread_id().as_deref(), Some("bob"));
    assert!(!messenger.is_watching_thread());
    assert!(
        wait_for_mark_read(&h.backend, "bob").await,
        "mark-read update was never issued"
    );

    // Opening it again retries the join instead of assuming it is watched.
    messenger.open_thread("bob");
    assert_eq!(messenger.open_thread_id().as_deref(), Some("bob"));
    assert!(!messenger.is_watching_thread());
}

#[tokio::test]
async fn message_outside_the_open_thread_raises_an_alert() {
    let h = harness("alice");
    h.backend.push_select(
        "profiles",
        json!([{
            "id": "carol",
            "username": "carol",
            "full_name": "Carol Haddad",
            "avatar_url": "https://img.test/carol.png",
        }]),
    );
    let realtime = offline_client();
    let messenger = Messenger::start("alice", h.mutations.clone(), realtime.clone()).unwrap();
    messenger.open_thread("bob");

    realtime.deliver(inbox_insert("alice", "m-carol-1", "carol", "are you around?"));

    let alert = wait_for_alert(&h.notifier).await.expect("no alert raised");
    assert_eq!(alert.sender_id, "carol");
    assert_eq!(alert.sender_name, "Carol Haddad");
    assert_eq!(alert.avatar_url, "https://img.test/carol.png");
    assert_eq!(alert.preview, "are you around?");
    assert!(h.backend.calls().iter().any(|c| {
        matches!(c, Call::Select(q) if q.table == "profiles" && q.eq_value("id") == Some("carol"))
    }));

    messenger.shutdown();
    realtime.shutdown();
}

#[tokio::test]
async fn alert_falls_back_when_the_sender_cannot_be_loaded() {
    let h = harness("alice");
    h.backend.fail("select:profiles");
    let realtime = offline_client();
    let messenger = Messenger::start("alice", h.mutations.clone(), realtime.clone()).unwrap();

    realtime.deliver(inbox_insert("alice", "m-dave-1", "dave", "hello"));

    let alert = wait_for_alert(&h.notifier).await.expect("no alert raised");
    assert_eq!(alert.sender_id, "dave");
    assert_eq!(alert.sender_name, "مستخدم");
    assert_eq!(
        alert.avatar_url,
        "https://api.dicebear.com/7.x/avataaars/svg?seed=dave"
    );

    messenger.shutdown();
    realtime.shutdown();
}
