//! Request shapes and client-side validation of `Api`, checked against a
//! recording backend.

mod common;

use common::{message, Call, RecordingBackend};
use plaza::api::{Api, ApiError};
use plaza::query::Filter;
use serde_json::json;

fn api_for(backend: &std::sync::Arc<RecordingBackend>) -> Api {
    Api::new(backend.clone())
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

#[test]
fn messaging_oneself_is_rejected_without_a_request() {
    let backend = RecordingBackend::signed_in("alice");
    let api = api_for(&backend);

    assert!(matches!(
        api.send_message("alice", "hi"),
        Err(ApiError::SelfMessage)
    ));
    assert!(backend.calls().is_empty());
}

#[test]
fn blank_messages_are_rejected() {
    let backend = RecordingBackend::signed_in("alice");
    let api = api_for(&backend);

    assert!(matches!(api.send_message("bob", "   "), Err(ApiError::EmptyMessage)));
    assert!(matches!(api.update_message("m1", ""), Err(ApiError::EmptyMessage)));
    assert!(backend.calls().is_empty());
}

#[test]
fn send_message_inserts_trimmed_content() {
    let backend = RecordingBackend::signed_in("alice");
    let api = api_for(&backend);

    let sent = api.send_message("bob", "  hello  ").unwrap();
    assert_eq!(sent.sender_id, "alice");
    assert_eq!(sent.receiver_id, "bob");
    assert_eq!(sent.content, "hello");

    let rows = backend.inserts_into("messages");
    assert_eq!(
        rows,
        vec![json!({ "sender_id": "alice", "receiver_id": "bob", "content": "hello" })]
    );
}

#[test]
fn mark_read_targets_unread_rows_from_the_sender() {
    let backend = RecordingBackend::signed_in("alice");
    backend.set_update_result(json!([{ "id": "m1" }, { "id": "m2" }]));
    let api = api_for(&backend);

    assert_eq!(api.mark_messages_read("bob").unwrap(), 2);

    let calls = backend.calls();
    let Some(Call::Update(query, patch)) = calls.first() else {
        panic!("expected an update, got {calls:?}");
    };
    assert_eq!(query.table, "messages");
    assert_eq!(query.eq_value("sender_id"), Some("bob"));
    assert_eq!(query.eq_value("receiver_id"), Some("alice"));
    assert_eq!(query.eq_value("is_read"), Some("false"));
    assert_eq!(patch, &json!({ "is_read": true }));
}

#[test]
fn update_message_returns_the_mutated_row() {
    let backend = RecordingBackend::signed_in("alice");
    let mut edited = message("m1", "alice", "bob", "fixed", "2026-01-01T00:00:00Z");
    edited.is_edited = true;
    backend.set_rpc_result("update_message", json!([edited]));
    let api = api_for(&backend);

    let row = api.update_message("m1", "fixed").unwrap();
    assert!(row.is_edited);
    assert_eq!(row.content, "fixed");
    assert_eq!(
        backend.calls(),
        vec![Call::Rpc(
            "update_message".into(),
            json!({ "message_id": "m1", "new_content": "fixed" })
        )]
    );
}

#[test]
fn empty_procedure_result_is_an_error() {
    let backend = RecordingBackend::signed_in("alice");
    backend.set_rpc_result("delete_message", json!([]));
    let api = api_for(&backend);

    assert!(matches!(api.update_message("m1", "x"), Err(ApiError::NotFound(_))));
    assert!(matches!(api.delete_message("m1"), Err(ApiError::NotFound(_))));
}

#[test]
fn conversations_are_grouped_per_counterpart() {
    let backend = RecordingBackend::signed_in("alice");
    backend.push_select(
        "messages",
        json!([
            message("m3", "carol", "alice", "newest", "2026-01-03T00:00:00Z"),
            message("m2", "bob", "alice", "unread", "2026-01-02T00:00:00Z"),
            message("m1", "alice", "bob", "first", "2026-01-01T00:00:00Z"),
        ]),
    );
    let api = api_for(&backend);

    let list = api.conversations().unwrap();
    let order: Vec<&str> = list.iter().map(|c| c.counterpart_id.as_str()).collect();
    assert_eq!(order, ["carol", "bob"]);
    assert_eq!(list[1].last_message.id, "m2");
    assert_eq!(list[1].unread_count, 1);

    let calls = backend.calls();
    let Some(Call::Select(query)) = calls.first() else {
        panic!("expected a select");
    };
    assert!(query.filters.contains(&Filter::Or(vec![
        "sender_id.eq.alice".into(),
        "receiver_id.eq.alice".into(),
    ])));
}

// ---------------------------------------------------------------------------
// Likes, saves, follows
// ---------------------------------------------------------------------------

#[test]
fn like_inserts_and_bumps_the_counter() {
    let backend = RecordingBackend::signed_in("alice");
    let api = api_for(&backend);

    assert!(api.toggle_like("p1").unwrap());
    assert_eq!(
        backend.inserts_into("likes"),
        vec![json!({ "post_id": "p1", "user_id": "alice" })]
    );
    assert_eq!(backend.rpc_names(), ["increment_likes_count"]);
}

#[test]
fn unlike_deletes_the_existing_row() {
    let backend = RecordingBackend::signed_in("alice");
    backend.push_select("likes", json!([{ "id": "like-9" }]));
    let api = api_for(&backend);

    assert!(!api.toggle_like("p1").unwrap());
    let deleted: Vec<_> = backend
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Delete(q) => Some(q),
            _ => None,
        })
        .collect();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].table, "likes");
    assert_eq!(deleted[0].eq_value("id"), Some("like-9"));
    assert_eq!(backend.rpc_names(), ["decrement_likes_count"]);
}

#[test]
fn counter_failures_do_not_fail_the_write() {
    let backend = RecordingBackend::signed_in("alice");
    backend.fail("rpc:increment_posts_count");
    let api = api_for(&backend);

    let post = api
        .create_post("sunset", "https://storage.test/posts/a.jpg", Some("Amman"))
        .unwrap();
    assert_eq!(post.user_id, "alice");
    assert_eq!(post.location.as_deref(), Some("Amman"));
}

#[test]
fn following_oneself_is_rejected() {
    let backend = RecordingBackend::signed_in("alice");
    let api = api_for(&backend);

    assert!(matches!(api.toggle_follow("alice"), Err(ApiError::SelfFollow)));
    assert!(backend.calls().is_empty());
}

#[test]
fn follow_updates_both_counters() {
    let backend = RecordingBackend::signed_in("alice");
    let api = api_for(&backend);

    assert!(api.toggle_follow("bob").unwrap());
    assert_eq!(
        backend.inserts_into("follows"),
        vec![json!({ "follower_id": "alice", "following_id": "bob" })]
    );
    assert_eq!(
        backend.rpc_names(),
        ["increment_following_count", "increment_followers_count"]
    );
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[test]
fn feed_marks_liked_and_saved_posts() {
    let backend = RecordingBackend::signed_in("alice");
    backend.push_select(
        "posts",
        json!([
            { "id": "p1", "user_id": "bob", "likes_count": 2 },
            { "id": "p2", "user_id": "bob" },
        ]),
    );
    backend.push_select("likes", json!([{ "post_id": "p1" }]));
    backend.push_select("saved_posts", json!([{ "post_id": "p2" }]));
    let api = api_for(&backend);

    let posts = api.feed(10, 20).unwrap();
    assert!(posts[0].is_liked && !posts[0].is_saved);
    assert!(!posts[1].is_liked && posts[1].is_saved);

    let Some(Call::Select(query)) = backend.calls().into_iter().next() else {
        panic!("expected a select");
    };
    assert_eq!(query.offset, Some(20));
    assert_eq!(query.limit, Some(10));
}

#[test]
fn search_strips_filter_syntax() {
    let backend = RecordingBackend::signed_in("alice");
    let api = api_for(&backend);

    api.search_users(" la(y),la% ", 5).unwrap();
    let Some(Call::Select(query)) = backend.calls().into_iter().next() else {
        panic!("expected a select");
    };
    assert!(query.filters.contains(&Filter::Or(vec![
        "username.ilike.%layla%".into(),
        "full_name.ilike.%layla%".into(),
    ])));

    backend.clear_calls();
    assert!(api.search_users(" ,() ", 5).unwrap().is_empty());
    assert!(backend.calls().is_empty());
}

#[test]
fn signed_out_reads_are_empty_and_writes_fail() {
    let backend = RecordingBackend::signed_out();
    let api = api_for(&backend);

    assert!(api.conversations().unwrap().is_empty());
    assert!(api.messages("bob").unwrap().is_empty());
    assert!(api.notifications().unwrap().is_empty());
    assert!(api.current_profile().unwrap().is_none());
    assert!(matches!(api.toggle_like("p1"), Err(ApiError::NotAuthenticated)));
    assert!(matches!(
        api.send_message("bob", "hi"),
        Err(ApiError::NotAuthenticated)
    ));
    assert!(backend.calls().is_empty());
}
