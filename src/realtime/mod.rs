//! Realtime change feed and broadcast channels.
//!
//! The backend speaks the Phoenix channel protocol as JSON text frames:
//! `{"topic", "event", "payload", "ref", "join_ref"}`. This module holds the
//! frame codec and channel descriptions; [`client::RealtimeClient`] owns the
//! socket.

pub mod client;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use client::{RealtimeClient, Subscription};

/// Interval between `heartbeat` frames.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 25;

const TOPIC_PREFIX: &str = "realtime:";
const PHOENIX_TOPIC: &str = "phoenix";

#[derive(Debug)]
pub enum RealtimeError {
    /// The socket task has stopped.
    Closed,
    Encode(String),
}

impl std::fmt::Display for RealtimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealtimeError::Closed => write!(f, "realtime connection closed"),
            RealtimeError::Encode(e) => write!(f, "realtime encode error: {e}"),
        }
    }
}

impl std::error::Error for RealtimeError {}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::Encode(e.to_string())
    }
}

/// One Phoenix protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl Frame {
    pub fn encode(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Frame, RealtimeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn heartbeat(reference: &str) -> Frame {
        Frame {
            topic: PHOENIX_TOPIC.to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    pub fn leave(channel: &str, reference: &str) -> Frame {
        Frame {
            topic: topic_of(channel),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    /// Hand a refreshed access token to an already joined channel.
    pub fn access_token(channel: &str, access_token: &str, reference: &str) -> Frame {
        Frame {
            topic: topic_of(channel),
            event: "access_token".to_string(),
            payload: json!({ "access_token": access_token }),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    /// Broadcast `event` with `payload` to everyone else on `channel`.
    pub fn broadcast(channel: &str, event: &str, payload: Value, reference: &str) -> Frame {
        Frame {
            topic: topic_of(channel),
            event: "broadcast".to_string(),
            payload: json!({
                "type": "broadcast",
                "event": event,
                "payload": payload,
            }),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }
}

fn topic_of(channel: &str) -> String {
    format!("{TOPIC_PREFIX}{channel}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// A row change subscription on one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    /// Row filter such as `receiver_id=eq.<id>`.
    pub filter: Option<String>,
}

/// Everything needed to join (and re-join) a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub changes: Vec<ChangeFilter>,
    /// Receive our own broadcasts back.
    pub broadcast_self: bool,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            changes: Vec::new(),
            broadcast_self: false,
        }
    }

    pub fn on_change(mut self, kind: ChangeKind, table: &str, filter: Option<String>) -> Self {
        self.changes.push(ChangeFilter {
            kind,
            schema: "public".to_string(),
            table: table.to_string(),
            filter,
        });
        self
    }

    pub fn join_frame(&self, reference: &str, access_token: &str) -> Frame {
        let changes: Vec<Value> = self
            .changes
            .iter()
            .map(|c| {
                let mut v = json!({
                    "event": c.kind.as_str(),
                    "schema": c.schema,
                    "table": c.table,
                });
                if let Some(filter) = &c.filter {
                    v["filter"] = json!(filter);
                }
                v
            })
            .collect();
        Frame {
            topic: topic_of(&self.name),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": self.broadcast_self },
                    "presence": { "key": "" },
                    "postgres_changes": changes,
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
            join_ref: Some(reference.to_string()),
        }
    }
}

/// A row change delivered on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub record: Value,
    pub old_record: Value,
}

impl ChangeEvent {
    /// The new row decoded as `T`.
    pub fn record_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.record.clone())
    }
}

/// What the socket task reports to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Change { channel: String, change: ChangeEvent },
    Broadcast { channel: String, event: String, payload: Value },
    /// A join was acknowledged (`ok == true`) or refused. Reported by the
    /// socket task, which matches replies to the joins it sent.
    Joined { channel: String, ok: bool },
    Connected,
    Disconnected,
}

/// Interpret an incoming frame. Frames with no meaning for subscribers
/// (replies, presence, system notices) yield `None`.
pub fn interpret(frame: &Frame) -> Option<RealtimeEvent> {
    let channel = frame.topic.strip_prefix(TOPIC_PREFIX)?.to_string();
    match frame.event.as_str() {
        "postgres_changes" => {
            let data = frame.payload.get("data")?;
            let kind: ChangeKind =
                serde_json::from_value(data.get("type").cloned().unwrap_or(Value::Null)).ok()?;
            Some(RealtimeEvent::Change {
                channel,
                change: ChangeEvent {
                    kind,
                    table: data
                        .get("table")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    record: data.get("record").cloned().unwrap_or(Value::Null),
                    old_record: data.get("old_record").cloned().unwrap_or(Value::Null),
                },
            })
        }
        "broadcast" => Some(RealtimeEvent::Broadcast {
            channel,
            event: frame.payload.get("event")?.as_str()?.to_string(),
            payload: frame.payload.get("payload").cloned().unwrap_or(Value::Null),
        }),
        _ => None,
    }
}

/// Status of a `phx_reply`: `Some(true)` when the server answered `ok`.
/// Replies are matched to requests by their `ref`.
pub fn reply_ok(frame: &Frame) -> Option<bool> {
    (frame.event == "phx_reply")
        .then(|| frame.payload.get("status").and_then(Value::as_str) == Some("ok"))
}
