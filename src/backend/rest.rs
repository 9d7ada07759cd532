//! HTTP implementation of [`Backend`] plus session management.
//!
//! Speaks the hosted platform's REST surface with `ureq`:
//!
//! - rows: `/rest/v1/<table>` (GET/POST/PATCH/DELETE)
//! - stored procedures: `POST /rest/v1/rpc/<name>`
//! - objects: `/storage/v1/object/<bucket>/<path>`
//! - auth: `/auth/v1/token`, `/auth/v1/signup`, `/auth/v1/logout`, `/auth/v1/user`
//!
//! Every request carries the project's anon key as `apikey`, and the
//! session's access token (or the anon key when signed out) as bearer.

use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use url::form_urlencoded;

use crate::backend::{Backend, BackendError, UploadOptions};
use crate::model::{now_secs, AuthUser, Session};
use crate::query::Query;
use crate::session::SessionStore;

/// Refresh the access token this many seconds before it expires.
const REFRESH_MARGIN_SECS: u64 = 60;

pub struct RestBackend {
    agent: ureq::Agent,
    base_url: String,
    anon_key: String,
    session: Mutex<Option<Session>>,
    store: Option<Mutex<SessionStore>>,
    /// Current bearer token, for the realtime socket.
    token: watch::Sender<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    expires_at: Option<u64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| now_secs() + self.expires_in);
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        let (token, _) = watch::channel(anon_key.to_string());
        Self {
            agent: ureq::AgentBuilder::new().build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: Mutex::new(None),
            store: None,
            token,
        }
    }

    /// Attach a session store and restore any session saved in it.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        match store.load_session() {
            Ok(Some(session)) => {
                crate::tlog!(
                    "auth: restored session for {}",
                    crate::logging::user_id(&session.user.id)
                );
                self.token.send_replace(session.access_token.clone());
                *self.session.get_mut().unwrap_or_else(|e| e.into_inner()) = Some(session);
            }
            Ok(None) => {}
            Err(e) => crate::tlog!("auth: could not load saved session: {}", e),
        }
        self.store = Some(Mutex::new(store));
        self
    }

    /// Snapshot of the current session, if signed in.
    pub fn session(&self) -> Option<Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Access token for the realtime socket; the anon key when signed out.
    pub fn access_token(&self) -> String {
        self.session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.anon_key.clone())
    }

    /// Follows [`access_token`](Self::access_token) through sign-in, refresh
    /// and sign-out.
    pub fn watch_access_token(&self) -> watch::Receiver<String> {
        self.token.subscribe()
    }

    /// WebSocket endpoint of the realtime service.
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0")
            .finish();
        format!("{ws_base}/realtime/v1/websocket?{query}")
    }

    // -- Auth -----------------------------------------------------------------

    pub fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let response = self
            .agent
            .post(&url)
            .set("apikey", &self.anon_key)
            .send_json(serde_json::json!({ "email": email, "password": password }))
            .map_err(map_ureq_error)?;
        let token: TokenResponse = response
            .into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let session = token.into_session();
        self.set_session(Some(session.clone()));
        crate::tlog!(
            "auth: signed in as {}",
            crate::logging::user_id(&session.user.id)
        );
        Ok(session)
    }

    /// Create an account. Returns the session when the platform signs the
    /// new user in immediately, `None` when email confirmation is pending.
    pub fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<Option<Session>, BackendError> {
        let url = format!("{}/auth/v1/signup", self.base_url);
        let body: Value = self
            .agent
            .post(&url)
            .set("apikey", &self.anon_key)
            .send_json(serde_json::json!({
                "email": email,
                "password": password,
                "data": { "username": username },
            }))
            .map_err(map_ureq_error)?
            .into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        if body.get("access_token").is_none() {
            crate::tlog!("auth: sign-up pending email confirmation");
            return Ok(None);
        }
        let token: TokenResponse = serde_json::from_value(body)?;
        let session = token.into_session();
        self.set_session(Some(session.clone()));
        Ok(Some(session))
    }

    pub fn refresh_session(&self) -> Result<Session, BackendError> {
        let refresh_token = self
            .session()
            .map(|s| s.refresh_token)
            .ok_or(BackendError::NotAuthenticated)?;
        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.base_url);
        let response = self
            .agent
            .post(&url)
            .set("apikey", &self.anon_key)
            .send_json(serde_json::json!({ "refresh_token": refresh_token }))
            .map_err(map_ureq_error)?;
        let token: TokenResponse = response
            .into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let session = token.into_session();
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    /// Revoke the session server-side (best effort) and forget it locally.
    pub fn sign_out(&self) -> Result<(), BackendError> {
        if let Some(session) = self.session() {
            let url = format!("{}/auth/v1/logout", self.base_url);
            if let Err(e) = self
                .agent
                .post(&url)
                .set("apikey", &self.anon_key)
                .set("Authorization", &format!("Bearer {}", session.access_token))
                .call()
            {
                crate::tlog!("auth: logout request failed: {}", map_ureq_error(e));
            }
        }
        self.set_session(None);
        Ok(())
    }

    /// Validate the session against the auth service and return its user.
    pub fn fetch_user(&self) -> Result<Option<AuthUser>, BackendError> {
        if self.session().is_none() {
            return Ok(None);
        }
        let url = format!("{}/auth/v1/user", self.base_url);
        let user: AuthUser = self
            .authed(self.agent.get(&url))?
            .call()
            .map_err(map_ureq_error)?
            .into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(Some(user))
    }

    /// URL to open in a browser to sign in with an OAuth provider.
    pub fn oauth_url(&self, provider: &str, redirect_to: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to)
            .finish();
        format!("{}/auth/v1/authorize?{query}", self.base_url)
    }

    fn set_session(&self, session: Option<Session>) {
        if let Some(store) = &self.store {
            let store = store.lock().unwrap_or_else(|e| e.into_inner());
            let result = match &session {
                Some(s) => store.save_session(s, now_secs()),
                None => store.clear_session().map(|_| ()),
            };
            if let Err(e) = result {
                crate::tlog!("auth: could not persist session: {}", e);
            }
        }
        let token = session
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = session;
        self.token.send_if_modified(|current| {
            if *current == token {
                return false;
            }
            *current = token;
            true
        });
    }

    /// Refresh the access token when it is about to expire.
    pub fn ensure_fresh(&self) {
        let needs_refresh = self
            .session()
            .map(|s| s.is_expired(now_secs() + REFRESH_MARGIN_SECS))
            .unwrap_or(false);
        if needs_refresh {
            if let Err(e) = self.refresh_session() {
                crate::tlog!("auth: token refresh failed, signing out: {}", e);
                self.set_session(None);
            }
        }
    }

    fn authed(&self, request: ureq::Request) -> Result<ureq::Request, BackendError> {
        self.ensure_fresh();
        let token = self.access_token();
        Ok(request
            .set("apikey", &self.anon_key)
            .set("Authorization", &format!("Bearer {token}")))
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }
}

impl Backend for RestBackend {
    fn current_user(&self) -> Result<Option<AuthUser>, BackendError> {
        self.ensure_fresh();
        Ok(self.session().map(|s| s.user))
    }

    fn select(&self, query: &Query) -> Result<Value, BackendError> {
        let url = self.rest_url(&query.table);
        with_params(self.authed(self.agent.get(&url))?, &query.to_params())
            .call()
            .map_err(map_ureq_error)?
            .into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn insert(
        &self,
        table: &str,
        row: &Value,
        returning: Option<&str>,
    ) -> Result<Value, BackendError> {
        let params: Vec<(String, String)> = returning
            .map(|sel| vec![("select".to_string(), compact_select(sel))])
            .unwrap_or_default();
        let url = self.rest_url(table);
        let prefer = if returning.is_some() {
            "return=representation"
        } else {
            "return=minimal"
        };
        let response = with_params(self.authed(self.agent.post(&url))?, &params)
            .set("Prefer", prefer)
            .send_json(row.clone())
            .map_err(map_ureq_error)?;
        if returning.is_none() {
            return Ok(Value::Array(Vec::new()));
        }
        response
            .into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn update(&self, query: &Query, patch: &Value) -> Result<Value, BackendError> {
        let url = self.rest_url(&query.table);
        with_params(self.authed(self.agent.request("PATCH", &url))?, &query.to_params())
            .set("Prefer", "return=representation")
            .send_json(patch.clone())
            .map_err(map_ureq_error)?
            .into_json()
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn delete(&self, query: &Query) -> Result<(), BackendError> {
        let params: Vec<(String, String)> = query
            .to_params()
            .into_iter()
            .filter(|(k, _)| k != "select")
            .collect();
        let url = self.rest_url(&query.table);
        with_params(self.authed(self.agent.delete(&url))?, &params)
            .call()
            .map_err(map_ureq_error)?;
        Ok(())
    }

    fn rpc(&self, function: &str, args: &Value) -> Result<Value, BackendError> {
        let url = format!("{}/rest/v1/rpc/{function}", self.base_url);
        let body = self
            .authed(self.agent.post(&url))?
            .send_json(args.clone())
            .map_err(map_ureq_error)?
            .into_string()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        options: &UploadOptions,
    ) -> Result<(), BackendError> {
        let url = format!("{}/storage/v1/object/{bucket}/{path}", self.base_url);
        self.authed(self.agent.post(&url))?
            .set("Content-Type", &options.content_type)
            .set(
                "Cache-Control",
                &format!("max-age={}", options.cache_control_secs),
            )
            .set("x-upsert", if options.upsert { "true" } else { "false" })
            .send_bytes(bytes)
            .map_err(map_ureq_error)?;
        Ok(())
    }

    fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        let url = format!("{}/storage/v1/object/{bucket}", self.base_url);
        self.authed(self.agent.delete(&url))?
            .send_json(serde_json::json!({ "prefixes": paths }))
            .map_err(map_ureq_error)?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base_url)
    }
}

fn compact_select(select: &str) -> String {
    select.split_whitespace().collect::<Vec<_>>().join("")
}

/// Add query parameters; ureq takes care of the encoding.
fn with_params(request: ureq::Request, params: &[(String, String)]) -> ureq::Request {
    params
        .iter()
        .fold(request, |request, (k, v)| request.query(k, v))
}

fn map_ureq_error(error: ureq::Error) -> BackendError {
    match error {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            BackendError::Http {
                status,
                message: error_message(&body),
            }
        }
        ureq::Error::Transport(transport) => BackendError::Transport(transport.to_string()),
    }
}

/// Human-readable message from an error body. The REST, auth and storage
/// services each use a different field name.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|field| v.get(field).and_then(|m| m.as_str()))
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}
