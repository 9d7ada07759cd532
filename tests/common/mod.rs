//! In-process test doubles shared by the integration tests.
//!
//! `RecordingBackend` answers `Backend` calls from canned responses and
//! records every call; `RecordingNotifier` keeps every toast and alert.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use plaza::api::Api;
use plaza::backend::{Backend, BackendError, UploadOptions};
use plaza::cache::QueryCache;
use plaza::model::{AuthUser, Message, Post};
use plaza::mutations::Mutations;
use plaza::query::Query;
use plaza::toast::{Language, MessageAlert, Notifier, Toast};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Select(Query),
    Insert(String, Value),
    Update(Query, Value),
    Delete(Query),
    Rpc(String, Value),
    Upload(String, String),
    Remove(String, Vec<String>),
}

#[derive(Default)]
pub struct RecordingBackend {
    user: Mutex<Option<AuthUser>>,
    calls: Mutex<Vec<Call>>,
    selects: Mutex<HashMap<String, VecDeque<Value>>>,
    rpc_results: Mutex<HashMap<String, Value>>,
    update_result: Mutex<Option<Value>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingBackend {
    pub fn signed_in(user_id: &str) -> Arc<Self> {
        let backend = Self::default();
        backend.sign_in(user_id);
        Arc::new(backend)
    }

    pub fn signed_out() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sign_in(&self, user_id: &str) {
        *self.user.lock().unwrap() = Some(AuthUser {
            id: user_id.to_string(),
            email: Some(format!("{user_id}@example.com")),
            user_metadata: json!({ "username": user_id }),
        });
    }

    /// Queue the response of the next select on `table`. Unqueued selects
    /// answer with an empty array.
    pub fn push_select(&self, table: &str, rows: Value) {
        self.selects
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push_back(rows);
    }

    pub fn set_rpc_result(&self, function: &str, result: Value) {
        self.rpc_results
            .lock()
            .unwrap()
            .insert(function.to_string(), result);
    }

    pub fn set_update_result(&self, rows: Value) {
        *self.update_result.lock().unwrap() = Some(rows);
    }

    /// Make calls fail. `op` is `select`, `insert`, `update`, `delete` or
    /// `rpc`, followed by `:` and the table or function name.
    pub fn fail(&self, op: &str) {
        self.failing.lock().unwrap().insert(op.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn inserts_into(&self, table: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Insert(t, row) if t == table => Some(row),
                _ => None,
            })
            .collect()
    }

    pub fn rpc_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Rpc(name, _) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: &str, target: &str) -> Result<(), BackendError> {
        if self.failing.lock().unwrap().contains(&format!("{op}:{target}")) {
            return Err(BackendError::Http {
                status: 500,
                message: format!("{op} on {target} failed"),
            });
        }
        Ok(())
    }
}

impl Backend for RecordingBackend {
    fn current_user(&self) -> Result<Option<AuthUser>, BackendError> {
        Ok(self.user.lock().unwrap().clone())
    }

    fn select(&self, query: &Query) -> Result<Value, BackendError> {
        self.record(Call::Select(query.clone()));
        self.check("select", &query.table)?;
        let queued = self
            .selects
            .lock()
            .unwrap()
            .get_mut(&query.table)
            .and_then(VecDeque::pop_front);
        Ok(queued.unwrap_or_else(|| json!([])))
    }

    fn insert(
        &self,
        table: &str,
        row: &Value,
        returning: Option<&str>,
    ) -> Result<Value, BackendError> {
        self.record(Call::Insert(table.to_string(), row.clone()));
        self.check("insert", table)?;
        if returning.is_none() {
            return Ok(json!([]));
        }
        let mut echoed = row.clone();
        if let Some(fields) = echoed.as_object_mut() {
            let n = self.calls.lock().unwrap().len();
            fields
                .entry("id")
                .or_insert_with(|| json!(format!("{table}-{n}")));
            fields
                .entry("created_at")
                .or_insert_with(|| json!("2026-01-01T00:00:00Z"));
        }
        Ok(json!([echoed]))
    }

    fn update(&self, query: &Query, patch: &Value) -> Result<Value, BackendError> {
        self.record(Call::Update(query.clone(), patch.clone()));
        self.check("update", &query.table)?;
        Ok(self.update_result.lock().unwrap().clone().unwrap_or_else(|| json!([])))
    }

    fn delete(&self, query: &Query) -> Result<(), BackendError> {
        self.record(Call::Delete(query.clone()));
        self.check("delete", &query.table)
    }

    fn rpc(&self, function: &str, args: &Value) -> Result<Value, BackendError> {
        self.record(Call::Rpc(function.to_string(), args.clone()));
        self.check("rpc", function)?;
        Ok(self
            .rpc_results
            .lock()
            .unwrap()
            .get(function)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn upload(
        &self,
        bucket: &str,
        path: &str,
        _bytes: &[u8],
        _options: &UploadOptions,
    ) -> Result<(), BackendError> {
        self.record(Call::Upload(bucket.to_string(), path.to_string()));
        self.check("upload", bucket)
    }

    fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        self.record(Call::Remove(bucket.to_string(), paths.to_vec()));
        self.check("remove", bucket)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("https://storage.test/{bucket}/{path}")
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub toasts: Mutex<Vec<Toast>>,
    pub alerts: Mutex<Vec<MessageAlert>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.toasts
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.title.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn toast(&self, toast: Toast) {
        self.toasts.lock().unwrap().push(toast);
    }

    fn message_alert(&self, alert: MessageAlert) {
        self.alerts.lock().unwrap().push(alert);
    }
}

pub struct Harness {
    pub backend: Arc<RecordingBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub cache: Arc<QueryCache>,
    pub mutations: Mutations,
}

pub fn harness(viewer: &str) -> Harness {
    let backend = RecordingBackend::signed_in(viewer);
    let notifier = Arc::new(RecordingNotifier::default());
    let cache = Arc::new(QueryCache::new());
    let mutations = Mutations::new(
        Api::new(backend.clone()),
        cache.clone(),
        notifier.clone(),
        Language::English,
    );
    Harness {
        backend,
        notifier,
        cache,
        mutations,
    }
}

pub fn post(id: &str, likes: i64, liked: bool) -> Post {
    serde_json::from_value(json!({
        "id": id,
        "user_id": "author",
        "caption": format!("post {id}"),
        "likes_count": likes,
        "is_liked": liked,
    }))
    .unwrap()
}

pub fn message(id: &str, from: &str, to: &str, content: &str, at: &str) -> Message {
    serde_json::from_value(json!({
        "id": id,
        "sender_id": from,
        "receiver_id": to,
        "content": content,
        "created_at": at,
    }))
    .unwrap()
}
