//! SQLite persistence for the signed-in session and local settings.
//!
//! The backend owns identities; this store only remembers the tokens it
//! handed out so the client stays signed in across restarts, plus a handful
//! of local preferences (interface language, last opened thread).

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{AuthUser, Session};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum SessionError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            SessionError::Io(e) => write!(f, "io error: {e}"),
            SessionError::Serde(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<rusqlite::Error> for SessionError {
    fn from(e: rusqlite::Error) -> Self {
        SessionError::Sqlite(e)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Serde(e)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn };
        store.create_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, SessionError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<(), SessionError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS session (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                user_id TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                user_json TEXT NOT NULL,
                saved_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Replace the stored session.
    pub fn save_session(&self, session: &Session, now: u64) -> Result<(), SessionError> {
        let user_json = serde_json::to_string(&session.user)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO session
                (id, user_id, access_token, refresh_token, expires_at, user_json, saved_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.user.id,
                session.access_token,
                session.refresh_token,
                session.expires_at as i64,
                user_json,
                now as i64,
            ],
        )?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<Session>, SessionError> {
        let row = self
            .conn
            .query_row(
                "SELECT access_token, refresh_token, expires_at, user_json
                 FROM session WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((access_token, refresh_token, expires_at, user_json)) => {
                let user: AuthUser = serde_json::from_str(&user_json)?;
                Ok(Some(Session {
                    access_token,
                    refresh_token,
                    expires_at: expires_at as u64,
                    user,
                }))
            }
            None => Ok(None),
        }
    }

    /// Forget the stored session. Returns whether one existed.
    pub fn clear_session(&self) -> Result<bool, SessionError> {
        let changed = self.conn.execute("DELETE FROM session", [])?;
        Ok(changed > 0)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, SessionError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

/// Path of the session database inside a data directory.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("plaza.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(user_id: &str, token: &str) -> Session {
        Session {
            access_token: token.to_string(),
            refresh_token: format!("refresh-{token}"),
            expires_at: 1_900_000_000,
            user: AuthUser {
                id: user_id.to_string(),
                email: Some("layla@example.com".to_string()),
                user_metadata: serde_json::json!({ "username": "layla" }),
            },
        }
    }

    #[test]
    fn test_session_round_trip_and_replace() {
        let store = SessionStore::open_in_memory().unwrap();
        assert!(store.load_session().unwrap().is_none());

        store.save_session(&session("u1", "t1"), 100).unwrap();
        store.save_session(&session("u1", "t2"), 200).unwrap();

        let loaded = store.load_session().unwrap().unwrap();
        assert_eq!(loaded.access_token, "t2");
        assert_eq!(loaded.user.username(), Some("layla"));
    }

    #[test]
    fn test_clear_session() {
        let store = SessionStore::open_in_memory().unwrap();
        assert!(!store.clear_session().unwrap());
        store.save_session(&session("u1", "t1"), 100).unwrap();
        assert!(store.clear_session().unwrap());
        assert!(store.load_session().unwrap().is_none());
    }

    #[test]
    fn test_settings() {
        let store = SessionStore::open_in_memory().unwrap();
        assert_eq!(store.get_setting("lang").unwrap(), None);
        store.set_setting("lang", "ar").unwrap();
        store.set_setting("lang", "en").unwrap();
        assert_eq!(store.get_setting("lang").unwrap().as_deref(), Some("en"));
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!(
            "plaza-session-test-{}-{}",
            std::process::id(),
            crate::model::now_millis()
        ));
        let store = SessionStore::open(&db_path(&dir)).unwrap();
        store.set_setting("k", "v").unwrap();
        assert!(db_path(&dir).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
