//! Seam between the client and the hosted backend.
//!
//! [`Backend`] exposes the backend's primitives (row queries, stored
//! procedures, object storage, current user) and nothing else. Row-level
//! security, query execution and storage are the platform's business; the
//! client only speaks to it. [`rest::RestBackend`] is the HTTP
//! implementation.

pub mod rest;

use serde_json::Value;

use crate::model::AuthUser;
use crate::query::Query;

#[derive(Debug)]
pub enum BackendError {
    /// The backend answered with a non-success status.
    Http { status: u16, message: String },
    /// The request never got an answer (DNS, TLS, connection reset, ...).
    Transport(String),
    /// The answer could not be decoded.
    Decode(String),
    NotAuthenticated,
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Http { status, message } => write!(f, "backend error {status}: {message}"),
            BackendError::Transport(e) => write!(f, "transport error: {e}"),
            BackendError::Decode(e) => write!(f, "decode error: {e}"),
            BackendError::NotAuthenticated => write!(f, "not authenticated"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Decode(e.to_string())
    }
}

/// Options for object uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: String,
    /// `Cache-Control: max-age` in seconds.
    pub cache_control_secs: u32,
    pub upsert: bool,
}

impl UploadOptions {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            cache_control_secs: 3600,
            upsert: false,
        }
    }
}

/// Primitive operations of the hosted backend.
///
/// Calls block the current thread; async callers go through
/// `tokio::task::spawn_blocking`.
pub trait Backend: Send + Sync {
    /// The signed-in user, or `None` when there is no session.
    fn current_user(&self) -> Result<Option<AuthUser>, BackendError>;

    /// Rows matching `query`, as a JSON array.
    fn select(&self, query: &Query) -> Result<Value, BackendError>;

    /// Insert `row` into `table`. With `returning`, the inserted rows are
    /// returned using that select list; otherwise an empty array.
    fn insert(&self, table: &str, row: &Value, returning: Option<&str>)
        -> Result<Value, BackendError>;

    /// Apply `patch` to the rows matching `query`; returns the updated rows.
    fn update(&self, query: &Query, patch: &Value) -> Result<Value, BackendError>;

    fn delete(&self, query: &Query) -> Result<(), BackendError>;

    /// Call a stored procedure.
    fn rpc(&self, function: &str, args: &Value) -> Result<Value, BackendError>;

    fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        options: &UploadOptions,
    ) -> Result<(), BackendError>;

    fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError>;

    /// Public URL of an object. Pure string construction, no request.
    fn public_url(&self, bucket: &str, path: &str) -> String;
}
