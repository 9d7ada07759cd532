//! Typed operations over the hosted backend.
//!
//! [`Api`] is a translation layer: every method maps one client operation to
//! backend primitives (row queries, stored procedures, object storage). The
//! only logic it owns is client-side validation that must happen before any
//! request (no messaging or following oneself, no blank messages) and the
//! derivation of the conversation list from raw message history.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::backend::{Backend, BackendError, UploadOptions};
use crate::model::{
    now_millis, AuthUser, Comment, Conversation, MediaType, Message, Notification, Post, Profile,
    ProfileUpdate, Story,
};
use crate::query::{cond_and, cond_eq, Query};

const POST_SELECT: &str = "*, profile:profiles!posts_user_id_fkey(*)";
const COMMENT_SELECT: &str = "*, profile:profiles!comments_user_id_fkey(*)";
const STORY_SELECT: &str = "*, profile:profiles!stories_user_id_fkey(*)";
const MESSAGE_SELECT: &str = "*, sender:profiles!messages_sender_id_fkey(*), \
                              receiver:profiles!messages_receiver_id_fkey(*)";
const NOTIFICATION_SELECT: &str = "*, actor:profiles!notifications_actor_id_fkey(*)";
const SAVED_SELECT: &str = "post_id, posts!inner(*, profile:profiles!posts_user_id_fkey(*))";

const AVATAR_BUCKET: &str = "avatars";
const POST_BUCKET: &str = "posts";
const NOTIFICATION_LIMIT: usize = 50;

#[derive(Debug)]
pub enum ApiError {
    NotAuthenticated,
    /// Sender and receiver would be the same user.
    SelfMessage,
    SelfFollow,
    EmptyMessage,
    NotFound(String),
    Backend(BackendError),
    Decode(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotAuthenticated => write!(f, "Not authenticated"),
            ApiError::SelfMessage => write!(f, "Cannot send messages to yourself"),
            ApiError::SelfFollow => write!(f, "Cannot follow yourself"),
            ApiError::EmptyMessage => write!(f, "Message cannot be empty"),
            ApiError::NotFound(what) => write!(f, "{what}"),
            ApiError::Backend(e) => write!(f, "{e}"),
            ApiError::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<BackendError> for ApiError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotAuthenticated => ApiError::NotAuthenticated,
            other => ApiError::Backend(other),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

/// A local file about to be uploaded to object storage.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let content_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .to_string();
        Self {
            name,
            content_type,
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(name, bytes))
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    /// Extension after the last dot, or the whole name when there is none.
    pub fn extension(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Progress callback for uploads, called with a percentage.
pub type Progress<'a> = Option<&'a mut dyn FnMut(u8)>;

fn report(progress: &mut Progress<'_>, pct: u8) {
    if let Some(cb) = progress.as_mut() {
        cb(pct);
    }
}

/// Rows from an array response.
fn rows<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, ApiError> {
    match value {
        Value::Null => Ok(Vec::new()),
        other => Ok(serde_json::from_value(other)?),
    }
}

/// First row of an array response, or the object itself.
fn first<T: DeserializeOwned>(value: Value) -> Result<Option<T>, ApiError> {
    match value {
        Value::Array(mut items) => {
            if items.is_empty() {
                Ok(None)
            } else {
                Ok(Some(serde_json::from_value(items.swap_remove(0))?))
            }
        }
        Value::Null => Ok(None),
        other => Ok(Some(serde_json::from_value(other)?)),
    }
}

fn ids_of(value: &Value, column: &str) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.get(column).and_then(|id| id.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Length of the random part of an uploaded post image name.
const RANDOM_SUFFIX_LEN: usize = 7;

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..RANDOM_SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Strip characters that would break out of a PostgREST `or(...)` group.
fn sanitize_search(query: &str) -> String {
    query
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '%' | '*'))
        .collect()
}

/// Derive the conversation list from a viewer's message history.
///
/// One entry per counterpart holding the chronologically latest message and
/// the number of messages received by `viewer` that are still unread. The
/// result is sorted newest first; the input order does not matter.
pub fn group_conversations(viewer: &str, messages: &[Message]) -> Vec<Conversation> {
    let mut by_counterpart: HashMap<&str, Conversation> = HashMap::new();

    for message in messages {
        let other = message.counterpart(viewer);
        if other == viewer {
            continue;
        }
        let entry = by_counterpart
            .entry(other)
            .or_insert_with(|| Conversation {
                counterpart_id: other.to_string(),
                user: message.counterpart_profile(viewer).cloned(),
                last_message: message.clone(),
                unread_count: 0,
            });
        // Same-instant rows fall back to id order.
        if (&message.created_at, &message.id)
            > (&entry.last_message.created_at, &entry.last_message.id)
        {
            entry.last_message = message.clone();
        }
        if entry.user.is_none() {
            entry.user = message.counterpart_profile(viewer).cloned();
        }
        if message.receiver_id == viewer && !message.is_read {
            entry.unread_count += 1;
        }
    }

    let mut conversations: Vec<Conversation> = by_counterpart.into_values().collect();
    conversations.sort_by(|a, b| {
        b.last_message
            .created_at
            .cmp(&a.last_message.created_at)
            .then_with(|| a.counterpart_id.cmp(&b.counterpart_id))
    });
    conversations
}

/// Typed façade over a [`Backend`].
#[derive(Clone)]
pub struct Api {
    backend: Arc<dyn Backend>,
}

impl Api {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn viewer(&self) -> Result<Option<AuthUser>, ApiError> {
        Ok(self.backend.current_user()?)
    }

    fn require_viewer(&self) -> Result<AuthUser, ApiError> {
        self.viewer()?.ok_or(ApiError::NotAuthenticated)
    }

    /// Counter procedures are bookkeeping; a failure is logged, not returned.
    fn bump_counter(&self, function: &str, args: Value) {
        if let Err(e) = self.backend.rpc(function, &args) {
            crate::tlog!("api: {} failed: {}", function, e);
        }
    }

    // -- Profiles -------------------------------------------------------------

    pub fn current_profile(&self) -> Result<Option<Profile>, ApiError> {
        let Some(user) = self.viewer()? else {
            return Ok(None);
        };
        self.profile_by_id(&user.id)
    }

    pub fn profile_by_username(&self, username: &str) -> Result<Option<Profile>, ApiError> {
        let q = Query::table("profiles").eq("username", username).limit(1);
        first(self.backend.select(&q)?)
    }

    pub fn profile_by_id(&self, user_id: &str) -> Result<Option<Profile>, ApiError> {
        let q = Query::table("profiles").eq("id", user_id).limit(1);
        first(self.backend.select(&q)?)
    }

    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, ApiError> {
        let user = self.require_viewer()?;
        let q = Query::table("profiles").eq("id", &user.id);
        let patch = serde_json::to_value(update)?;
        first(self.backend.update(&q, &patch)?)?
            .ok_or_else(|| ApiError::NotFound("profile not found".to_string()))
    }

    pub fn create_profile(&self, user_id: &str, username: &str) -> Result<Profile, ApiError> {
        let row = json!({
            "id": user_id,
            "username": username,
            "full_name": username,
        });
        first(self.backend.insert("profiles", &row, Some("*"))?)?
            .ok_or_else(|| ApiError::NotFound("profile was not created".to_string()))
    }

    /// Upload a new avatar and return its public URL. The previous avatar is
    /// removed only after the new one is stored.
    pub fn upload_avatar(
        &self,
        file: &UploadFile,
        mut progress: Progress<'_>,
    ) -> Result<String, ApiError> {
        let user = self.require_viewer()?;
        let old_avatar = self.current_profile()?.and_then(|p| p.avatar_url);

        let path = format!("{}/{}.{}", user.id, now_millis(), file.extension());
        report(&mut progress, 10);

        self.backend.upload(
            AVATAR_BUCKET,
            &path,
            &file.bytes,
            &UploadOptions::new(&file.content_type),
        )?;
        report(&mut progress, 80);

        let new_avatar = self.backend.public_url(AVATAR_BUCKET, &path);
        if let Some(old) = old_avatar.filter(|old| *old != new_avatar) {
            self.delete_avatar(&old);
        }
        report(&mut progress, 100);
        Ok(new_avatar)
    }

    /// Remove an avatar object by its public URL. URLs outside the avatars
    /// bucket are ignored; failures are logged.
    pub fn delete_avatar(&self, avatar_url: &str) {
        const MARKER: &str = "/storage/v1/object/public/avatars/";
        let Some((_, path)) = avatar_url.split_once(MARKER) else {
            return;
        };
        if path.is_empty() {
            return;
        }
        if let Err(e) = self.backend.remove(AVATAR_BUCKET, &[path.to_string()]) {
            crate::tlog!("api: failed to delete old avatar {}: {}", path, e);
        }
    }

    pub fn suggested_users(&self, limit: usize) -> Result<Vec<Profile>, ApiError> {
        let Some(user) = self.viewer()? else {
            return Ok(Vec::new());
        };
        let q = Query::table("profiles").neq("id", &user.id).limit(limit);
        rows(self.backend.select(&q)?)
    }

    pub fn search_users(&self, query: &str, limit: usize) -> Result<Vec<Profile>, ApiError> {
        let term = sanitize_search(query);
        if term.is_empty() {
            return Ok(Vec::new());
        }
        let q = Query::table("profiles")
            .or(vec![
                format!("username.ilike.%{term}%"),
                format!("full_name.ilike.%{term}%"),
            ])
            .limit(limit);
        rows(self.backend.select(&q)?)
    }

    // -- Posts ----------------------------------------------------------------

    /// Newest posts with the viewer's like/save flags filled in.
    pub fn feed(&self, limit: usize, offset: usize) -> Result<Vec<Post>, ApiError> {
        let q = Query::table("posts")
            .select(POST_SELECT)
            .order("created_at", false)
            .range(offset, offset + limit.max(1) - 1);
        let mut posts: Vec<Post> = rows(self.backend.select(&q)?)?;

        let Some(user) = self.viewer()? else {
            return Ok(posts);
        };
        if posts.is_empty() {
            return Ok(posts);
        }

        let post_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        let likes = self.backend.select(
            &Query::table("likes")
                .select("post_id")
                .eq("user_id", &user.id)
                .is_in("post_id", &post_ids),
        )?;
        let saves = self.backend.select(
            &Query::table("saved_posts")
                .select("post_id")
                .eq("user_id", &user.id)
                .is_in("post_id", &post_ids),
        )?;
        let liked = ids_of(&likes, "post_id");
        let saved = ids_of(&saves, "post_id");

        for post in &mut posts {
            post.is_liked = liked.contains(&post.id);
            post.is_saved = saved.contains(&post.id);
        }
        Ok(posts)
    }

    pub fn explore(&self, limit: usize) -> Result<Vec<Post>, ApiError> {
        let q = Query::table("posts")
            .select(POST_SELECT)
            .order("likes_count", false)
            .limit(limit);
        rows(self.backend.select(&q)?)
    }

    pub fn user_posts(&self, user_id: &str) -> Result<Vec<Post>, ApiError> {
        let q = Query::table("posts")
            .select(POST_SELECT)
            .eq("user_id", user_id)
            .order("created_at", false);
        rows(self.backend.select(&q)?)
    }

    pub fn upload_post_image(
        &self,
        file: &UploadFile,
        mut progress: Progress<'_>,
    ) -> Result<String, ApiError> {
        let user = self.require_viewer()?;
        let path = format!(
            "{}/{}-{}.{}",
            user.id,
            now_millis(),
            random_suffix(),
            file.extension()
        );
        report(&mut progress, 10);
        self.backend.upload(
            POST_BUCKET,
            &path,
            &file.bytes,
            &UploadOptions::new(&file.content_type),
        )?;
        report(&mut progress, 80);
        let url = self.backend.public_url(POST_BUCKET, &path);
        report(&mut progress, 100);
        Ok(url)
    }

    pub fn create_post(
        &self,
        caption: &str,
        image_url: &str,
        location: Option<&str>,
    ) -> Result<Post, ApiError> {
        let user = self.require_viewer()?;
        let row = json!({
            "user_id": user.id,
            "caption": caption,
            "image_url": image_url,
            "location": location,
        });
        let post: Post = first(self.backend.insert("posts", &row, Some(POST_SELECT))?)?
            .ok_or_else(|| ApiError::NotFound("post was not created".to_string()))?;
        self.bump_counter("increment_posts_count", json!({ "profile_id": user.id }));
        Ok(post)
    }

    /// Delete one of the viewer's own posts.
    pub fn delete_post(&self, post_id: &str) -> Result<(), ApiError> {
        let user = self.require_viewer()?;
        let q = Query::table("posts").eq("id", post_id).eq("user_id", &user.id);
        self.backend.delete(&q)?;
        self.bump_counter("decrement_posts_count", json!({ "profile_id": user.id }));
        Ok(())
    }

    // -- Likes and saves ------------------------------------------------------

    /// Flip the viewer's like on a post. Returns whether the post is now liked.
    pub fn toggle_like(&self, post_id: &str) -> Result<bool, ApiError> {
        let user = self.require_viewer()?;
        let existing = self.backend.select(
            &Query::table("likes")
                .select("id")
                .eq("post_id", post_id)
                .eq("user_id", &user.id)
                .limit(1),
        )?;

        if let Some(like_id) = ids_of(&existing, "id").into_iter().next() {
            self.backend
                .delete(&Query::table("likes").eq("id", like_id))?;
            self.bump_counter("decrement_likes_count", json!({ "post_id": post_id }));
            Ok(false)
        } else {
            self.backend.insert(
                "likes",
                &json!({ "post_id": post_id, "user_id": user.id }),
                None,
            )?;
            self.bump_counter("increment_likes_count", json!({ "post_id": post_id }));
            Ok(true)
        }
    }

    /// Flip the viewer's bookmark on a post. Returns whether it is now saved.
    pub fn toggle_save(&self, post_id: &str) -> Result<bool, ApiError> {
        let user = self.require_viewer()?;
        let existing = self.backend.select(
            &Query::table("saved_posts")
                .select("id")
                .eq("post_id", post_id)
                .eq("user_id", &user.id)
                .limit(1),
        )?;

        if let Some(save_id) = ids_of(&existing, "id").into_iter().next() {
            self.backend
                .delete(&Query::table("saved_posts").eq("id", save_id))?;
            Ok(false)
        } else {
            self.backend.insert(
                "saved_posts",
                &json!({ "post_id": post_id, "user_id": user.id }),
                None,
            )?;
            Ok(true)
        }
    }

    pub fn saved_posts(&self) -> Result<Vec<Post>, ApiError> {
        let Some(user) = self.viewer()? else {
            return Ok(Vec::new());
        };
        let q = Query::table("saved_posts")
            .select(SAVED_SELECT)
            .eq("user_id", &user.id)
            .order("created_at", false);
        let items = self.backend.select(&q)?;
        let mut posts = Vec::new();
        for item in items.as_array().into_iter().flatten() {
            if let Some(raw) = item.get("posts") {
                let mut post: Post = serde_json::from_value(raw.clone())?;
                post.is_saved = true;
                posts.push(post);
            }
        }
        Ok(posts)
    }

    // -- Comments -------------------------------------------------------------

    pub fn comments(&self, post_id: &str) -> Result<Vec<Comment>, ApiError> {
        let q = Query::table("comments")
            .select(COMMENT_SELECT)
            .eq("post_id", post_id)
            .order("created_at", true);
        rows(self.backend.select(&q)?)
    }

    pub fn create_comment(&self, post_id: &str, content: &str) -> Result<Comment, ApiError> {
        let user = self.require_viewer()?;
        let row = json!({
            "post_id": post_id,
            "user_id": user.id,
            "content": content,
        });
        let comment: Comment =
            first(self.backend.insert("comments", &row, Some(COMMENT_SELECT))?)?
                .ok_or_else(|| ApiError::NotFound("comment was not created".to_string()))?;
        self.bump_counter("increment_comments_count", json!({ "post_id": post_id }));
        Ok(comment)
    }

    // -- Stories --------------------------------------------------------------

    /// Stories that have not expired at `now` (RFC 3339), newest first.
    pub fn stories(&self, now: &str) -> Result<Vec<Story>, ApiError> {
        let q = Query::table("stories")
            .select(STORY_SELECT)
            .gt("expires_at", now)
            .order("created_at", false);
        rows(self.backend.select(&q)?)
    }

    pub fn create_story(&self, media_url: &str, media_type: MediaType) -> Result<Story, ApiError> {
        let user = self.require_viewer()?;
        let row = json!({
            "user_id": user.id,
            "media_url": media_url,
            "media_type": media_type.as_str(),
        });
        first(self.backend.insert("stories", &row, Some(STORY_SELECT))?)?
            .ok_or_else(|| ApiError::NotFound("story was not created".to_string()))
    }

    // -- Follows --------------------------------------------------------------

    /// Follow or unfollow `target`. Returns whether the viewer now follows.
    pub fn toggle_follow(&self, target: &str) -> Result<bool, ApiError> {
        let user = self.require_viewer()?;
        if user.id == target {
            return Err(ApiError::SelfFollow);
        }
        let existing = self.backend.select(
            &Query::table("follows")
                .select("id")
                .eq("follower_id", &user.id)
                .eq("following_id", target)
                .limit(1),
        )?;

        if let Some(follow_id) = ids_of(&existing, "id").into_iter().next() {
            self.backend
                .delete(&Query::table("follows").eq("id", follow_id))?;
            self.bump_counter("decrement_following_count", json!({ "profile_id": user.id }));
            self.bump_counter("decrement_followers_count", json!({ "profile_id": target }));
            Ok(false)
        } else {
            self.backend.insert(
                "follows",
                &json!({ "follower_id": user.id, "following_id": target }),
                None,
            )?;
            self.bump_counter("increment_following_count", json!({ "profile_id": user.id }));
            self.bump_counter("increment_followers_count", json!({ "profile_id": target }));
            Ok(true)
        }
    }

    pub fn is_following(&self, target: &str) -> Result<bool, ApiError> {
        let Some(user) = self.viewer()? else {
            return Ok(false);
        };
        let existing = self.backend.select(
            &Query::table("follows")
                .select("id")
                .eq("follower_id", &user.id)
                .eq("following_id", target)
                .limit(1),
        )?;
        Ok(!ids_of(&existing, "id").is_empty())
    }

    // -- Messages -------------------------------------------------------------

    pub fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let Some(user) = self.viewer()? else {
            return Ok(Vec::new());
        };
        let q = Query::table("messages")
            .select(MESSAGE_SELECT)
            .or(vec![
                cond_eq("sender_id", &user.id),
                cond_eq("receiver_id", &user.id),
            ])
            .order("created_at", false);
        let messages: Vec<Message> = rows(self.backend.select(&q)?)?;
        Ok(group_conversations(&user.id, &messages))
    }

    /// The thread between the viewer and `counterpart`, oldest first.
    pub fn messages(&self, counterpart: &str) -> Result<Vec<Message>, ApiError> {
        let Some(user) = self.viewer()? else {
            return Ok(Vec::new());
        };
        if user.id == counterpart {
            crate::tlog!("api: refusing to load a thread with oneself");
            return Ok(Vec::new());
        }
        let q = Query::table("messages")
            .select(MESSAGE_SELECT)
            .or(vec![
                cond_and(&[
                    cond_eq("sender_id", &user.id),
                    cond_eq("receiver_id", counterpart),
                ]),
                cond_and(&[
                    cond_eq("sender_id", counterpart),
                    cond_eq("receiver_id", &user.id),
                ]),
            ])
            .order("created_at", true);
        let messages: Vec<Message> = rows(self.backend.select(&q)?)?;
        crate::tlog!(
            "api: fetched {} message(s) with {}",
            messages.len(),
            crate::logging::user_id(counterpart)
        );
        Ok(messages)
    }

    pub fn send_message(&self, receiver_id: &str, content: &str) -> Result<Message, ApiError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::EmptyMessage);
        }
        let user = self.require_viewer()?;
        if user.id == receiver_id {
            return Err(ApiError::SelfMessage);
        }
        let row = json!({
            "sender_id": user.id,
            "receiver_id": receiver_id,
            "content": content,
        });
        let message: Message = first(self.backend.insert("messages", &row, Some(MESSAGE_SELECT))?)?
            .ok_or_else(|| ApiError::NotFound("message was not sent".to_string()))?;
        crate::tlog!(
            "api: sent {} to {}",
            crate::logging::msg_id(&message.id),
            crate::logging::user_id(receiver_id)
        );
        Ok(message)
    }

    /// Mark every unread message from `sender` to the viewer as read.
    /// Returns how many rows changed.
    pub fn mark_messages_read(&self, sender: &str) -> Result<usize, ApiError> {
        let user = self.require_viewer()?;
        let q = Query::table("messages")
            .eq("sender_id", sender)
            .eq("receiver_id", &user.id)
            .eq("is_read", false);
        let updated = self.backend.update(&q, &json!({ "is_read": true }))?;
        let count = updated.as_array().map(Vec::len).unwrap_or(0);
        crate::tlog!(
            "api: marked {} message(s) from {} as read",
            count,
            crate::logging::user_id(sender)
        );
        Ok(count)
    }

    /// Edit a message through the `update_message` procedure, which enforces
    /// ownership and returns the mutated row.
    pub fn update_message(&self, message_id: &str, content: &str) -> Result<Message, ApiError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::EmptyMessage);
        }
        self.require_viewer()?;
        let result = self.backend.rpc(
            "update_message",
            &json!({ "message_id": message_id, "new_content": content }),
        )?;
        first(result)?.ok_or_else(|| ApiError::NotFound("Failed to update message".to_string()))
    }

    /// Soft-delete a message through the `delete_message` procedure.
    pub fn delete_message(&self, message_id: &str) -> Result<Message, ApiError> {
        self.require_viewer()?;
        let result = self
            .backend
            .rpc("delete_message", &json!({ "message_id": message_id }))?;
        first(result)?.ok_or_else(|| ApiError::NotFound("Failed to delete message".to_string()))
    }

    // -- Notifications --------------------------------------------------------

    pub fn notifications(&self) -> Result<Vec<Notification>, ApiError> {
        let Some(user) = self.viewer()? else {
            return Ok(Vec::new());
        };
        let q = Query::table("notifications")
            .select(NOTIFICATION_SELECT)
            .eq("user_id", &user.id)
            .order("created_at", false)
            .limit(NOTIFICATION_LIMIT);
        rows(self.backend.select(&q)?)
    }

    pub fn mark_notification_read(&self, notification_id: &str) -> Result<(), ApiError> {
        let q = Query::table("notifications").eq("id", notification_id);
        self.backend.update(&q, &json!({ "is_read": true }))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, from: &str, to: &str, at: &str, read: bool) -> Message {
        serde_json::from_value(json!({
            "id": id,
            "sender_id": from,
            "receiver_id": to,
            "content": format!("body of {id}"),
            "is_read": read,
            "created_at": at,
        }))
        .unwrap()
    }

    #[test]
    fn grouping_yields_one_entry_per_counterpart_with_latest_message() {
        let history = vec![
            msg("1", "bob", "me", "2026-01-01T10:00:00Z", true),
            msg("2", "me", "bob", "2026-01-01T10:05:00Z", true),
            msg("3", "carol", "me", "2026-01-01T09:00:00Z", false),
            msg("4", "bob", "me", "2026-01-01T10:01:00Z", false),
            msg("5", "me", "dan", "2026-01-01T08:00:00Z", false),
        ];
        let conversations = group_conversations("me", &history);

        assert_eq!(conversations.len(), 3);
        assert_eq!(conversations[0].counterpart_id, "bob");
        assert_eq!(conversations[0].last_message.id, "2");
        assert_eq!(conversations[0].unread_count, 1);
        assert_eq!(conversations[1].counterpart_id, "carol");
        assert_eq!(conversations[1].unread_count, 1);
        // Unread messages the viewer sent do not count.
        assert_eq!(conversations[2].counterpart_id, "dan");
        assert_eq!(conversations[2].unread_count, 0);
    }

    #[test]
    fn grouping_does_not_depend_on_input_order() {
        let mut history = vec![
            msg("a", "bob", "me", "2026-01-01T10:00:00Z", true),
            msg("b", "bob", "me", "2026-01-02T10:00:00Z", true),
            msg("c", "me", "bob", "2026-01-03T10:00:00Z", true),
        ];
        let forward = group_conversations("me", &history);
        history.reverse();
        let backward = group_conversations("me", &history);
        assert_eq!(forward[0].last_message.id, "c");
        assert_eq!(backward[0].last_message.id, "c");

        let mut tied = vec![
            msg("m1", "bob", "me", "2026-01-01T10:00:00Z", true),
            msg("m2", "me", "bob", "2026-01-01T10:00:00Z", true),
        ];
        let forward = group_conversations("me", &tied);
        tied.reverse();
        let backward = group_conversations("me", &tied);
        assert_eq!(forward[0].last_message.id, "m2");
        assert_eq!(backward[0].last_message.id, "m2");
    }

    #[test]
    fn grouping_skips_rows_addressed_to_oneself() {
        let history = vec![msg("x", "me", "me", "2026-01-01T10:00:00Z", false)];
        assert!(group_conversations("me", &history).is_empty());
    }

    #[test]
    fn upload_file_metadata() {
        let file = UploadFile::new("holiday.photo.JPG", vec![1, 2, 3]);
        assert_eq!(file.extension(), "JPG");
        assert!(file.is_image());
        let other = UploadFile::new("notes.txt", Vec::new());
        assert!(!other.is_image());
    }

    #[test]
    fn search_terms_cannot_escape_the_or_group() {
        assert_eq!(sanitize_search("  a,b(c)%* "), "abc");
    }

    #[test]
    fn random_suffix_is_base36() {
        let s = random_suffix();
        assert_eq!(s.len(), 7);
        assert!(s.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }
}
