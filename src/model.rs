//! Row types returned by the backend and the client-derived conversation view.
//!
//! Field names follow the backend's column names so rows deserialize straight
//! from the REST responses and realtime change records.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::logging::civil_from_unix;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub followers_count: i64,
    #[serde(default)]
    pub following_count: i64,
    #[serde(default)]
    pub posts_count: i64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Profile {
    /// Name shown in notifications and headers: full name, then username.
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.username,
        }
    }

    /// Avatar URL, falling back to a generated avatar seeded by username.
    pub fn avatar_or_fallback(&self) -> String {
        match self.avatar_url.as_deref() {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!(
                "https://api.dicebear.com/7.x/avataaars/svg?seed={}",
                self.username
            ),
        }
    }
}

/// Partial profile update. Absent fields are left untouched server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ProfileUpdate::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    /// Derived per viewer at read time.
    #[serde(default)]
    pub is_liked: bool,
    /// Derived per viewer at read time.
    #[serde(default)]
    pub is_saved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub user_id: String,
    pub media_url: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub views_count: i64,
    pub expires_at: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub is_viewed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub edited_at: Option<String>,
    #[serde(default)]
    pub original_content: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Profile>,
}

impl Message {
    /// The other party of this message as seen by `viewer`.
    pub fn counterpart(&self, viewer: &str) -> &str {
        if self.sender_id == viewer {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Profile of the other party, if the row was fetched with expansions.
    pub fn counterpart_profile(&self, viewer: &str) -> Option<&Profile> {
        if self.sender_id == viewer {
            self.receiver.as_ref()
        } else {
            self.sender.as_ref()
        }
    }

    /// Whether this row is part of the thread between `viewer` and `counterpart`.
    pub fn belongs_to_thread(&self, viewer: &str, counterpart: &str) -> bool {
        (self.sender_id == viewer && self.receiver_id == counterpart)
            || (self.sender_id == counterpart && self.receiver_id == viewer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    Mention,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub comment_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Profile>,
}

/// One entry of the conversation list. Derived client-side, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub counterpart_id: String,
    #[serde(default)]
    pub user: Option<Profile>,
    pub last_message: Message,
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl AuthUser {
    pub fn username(&self) -> Option<&str> {
        self.user_metadata.get("username").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry, seconds since UNIX epoch.
    #[serde(default)]
    pub expires_at: u64,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && now >= self.expires_at
    }
}

/// Current time as seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current time as milliseconds since UNIX epoch.
pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// RFC 3339 UTC timestamp (`2026-10-18T09:15:00Z`) for the given instant.
pub fn iso8601(secs: u64) -> String {
    let (y, m, d, hours, minutes, seconds) = civil_from_unix(secs);
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, from: &str, to: &str) -> Message {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "sender_id": from,
            "receiver_id": to,
            "content": "hi",
        }))
        .unwrap()
    }

    #[test]
    fn counterpart_is_the_other_party() {
        let m = message("m1", "alice", "bob");
        assert_eq!(m.counterpart("alice"), "bob");
        assert_eq!(m.counterpart("bob"), "alice");
        assert!(m.belongs_to_thread("bob", "alice"));
        assert!(!m.belongs_to_thread("bob", "carol"));
    }

    #[test]
    fn notification_kind_uses_type_column() {
        let n: Notification = serde_json::from_value(serde_json::json!({
            "id": "n1",
            "user_id": "u1",
            "type": "follow",
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationKind::Follow);
    }

    #[test]
    fn profile_fallbacks() {
        let p: Profile = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "username": "layla",
            "full_name": "",
        }))
        .unwrap();
        assert_eq!(p.display_name(), "layla");
        assert!(p.avatar_or_fallback().ends_with("seed=layla"));
    }

    #[test]
    fn empty_update_serializes_to_empty_object() {
        let update = ProfileUpdate::default();
        assert!(update.is_empty());
        assert_eq!(serde_json::to_value(&update).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn iso8601_formats_utc() {
        assert_eq!(iso8601(0), "1970-01-01T00:00:00Z");
    }
}
