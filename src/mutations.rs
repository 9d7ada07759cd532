//! Server writes with cache bookkeeping.
//!
//! Each mutation calls [`Api`], then invalidates the cache keys whose data
//! it changed and raises the matching toast. Likes and saves are applied to
//! the cached feed pages before the server call and rolled back if it fails.

use std::sync::Arc;

use crate::api::{Api, ApiError};
use crate::cache::{keys, QueryCache, QueryKey};
use crate::model::{Comment, MediaType, Message, Post, Profile, ProfileUpdate, Story};
use crate::toast::{Language, Notice, Notifier};

#[derive(Clone)]
pub struct Mutations {
    api: Api,
    cache: Arc<QueryCache>,
    notifier: Arc<dyn Notifier>,
    language: Language,
}

impl Mutations {
    pub fn new(
        api: Api,
        cache: Arc<QueryCache>,
        notifier: Arc<dyn Notifier>,
        language: Language,
    ) -> Self {
        Self {
            api,
            cache,
            notifier,
            language,
        }
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn notify(&self, notice: Notice) {
        self.notifier.toast(notice.toast(self.language));
    }

    fn invalidate(&self, keys: &[QueryKey]) {
        for key in keys {
            self.cache.invalidate(key);
        }
    }

    /// On success invalidate `keys` and raise `ok`; on failure raise `failed`.
    fn settle<T>(
        &self,
        result: Result<T, ApiError>,
        keys: &[QueryKey],
        ok: Option<Notice>,
        failed: Option<Notice>,
    ) -> Result<T, ApiError> {
        match &result {
            Ok(_) => {
                self.invalidate(keys);
                if let Some(notice) = ok {
                    self.notify(notice);
                }
            }
            Err(e) => {
                crate::tlog!("mutation failed: {}", e);
                if let Some(notice) = failed {
                    self.notify(notice);
                }
            }
        }
        result
    }

    // -- Optimistic -----------------------------------------------------------

    /// Like or unlike a post. Cached feed pages flip immediately; the server
    /// result either confirms or rolls them back.
    pub fn toggle_like(&self, post_id: &str) -> Result<bool, ApiError> {
        let snapshot = self.cache.snapshot(&keys::feeds());
        let touched = self
            .cache
            .update_matching::<Vec<Post>, _>(&keys::feeds(), |posts| {
                for post in posts.iter_mut().filter(|p| p.id == post_id) {
                    post.is_liked = !post.is_liked;
                    post.likes_count += if post.is_liked { 1 } else { -1 };
                }
            });
        crate::tlog!("like {}: optimistic update on {} page(s)", post_id, touched);

        let result = self.api.toggle_like(post_id);
        if let Err(e) = &result {
            crate::tlog!("like {} failed, rolling back: {}", post_id, e);
            self.cache.restore(snapshot);
            self.notify(Notice::LikeFailed);
        }
        self.invalidate(&[keys::feeds(), keys::posts()]);
        result
    }

    /// Save or unsave a post, with the same optimistic pattern as likes.
    pub fn toggle_save(&self, post_id: &str) -> Result<bool, ApiError> {
        let snapshot = self.cache.snapshot(&keys::feeds());
        self.cache
            .update_matching::<Vec<Post>, _>(&keys::feeds(), |posts| {
                for post in posts.iter_mut().filter(|p| p.id == post_id) {
                    post.is_saved = !post.is_saved;
                }
            });

        let result = self.api.toggle_save(post_id);
        if let Err(e) = &result {
            crate::tlog!("save {} failed, rolling back: {}", post_id, e);
            self.cache.restore(snapshot);
            self.notify(Notice::SaveFailed);
        }
        self.invalidate(&[keys::feeds(), keys::saved()]);
        result
    }

    // -- Posts, profiles, stories ---------------------------------------------

    pub fn create_post(
        &self,
        caption: &str,
        image_url: &str,
        location: Option<&str>,
    ) -> Result<Post, ApiError> {
        self.create_post_with_notice(caption, image_url, location, Notice::PostPublished)
    }

    /// `create_post` with a caller-chosen success toast.
    pub fn create_post_with_notice(
        &self,
        caption: &str,
        image_url: &str,
        location: Option<&str>,
        ok: Notice,
    ) -> Result<Post, ApiError> {
        let result = self.api.create_post(caption, image_url, location);
        self.settle(
            result,
            &[keys::feeds(), keys::posts(), keys::profiles()],
            Some(ok),
            Some(Notice::PostPublishFailed),
        )
    }

    pub fn delete_post(&self, post_id: &str) -> Result<(), ApiError> {
        let result = self.api.delete_post(post_id);
        self.settle(
            result,
            &[keys::feeds(), keys::posts(), keys::profiles()],
            Some(Notice::PostDeleted),
            Some(Notice::PostDeleteFailed),
        )
    }

    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, ApiError> {
        let result = self.api.update_profile(update);
        self.settle(
            result,
            &[keys::profiles()],
            Some(Notice::ProfileUpdated),
            Some(Notice::ProfileUpdateFailed),
        )
    }

    pub fn create_comment(&self, post_id: &str, content: &str) -> Result<Comment, ApiError> {
        let result = self.api.create_comment(post_id, content);
        self.settle(
            result,
            &[keys::comments(post_id), keys::feeds(), keys::posts()],
            None,
            Some(Notice::CommentFailed),
        )
    }

    pub fn create_story(&self, media_url: &str, media_type: MediaType) -> Result<Story, ApiError> {
        let result = self.api.create_story(media_url, media_type);
        self.settle(
            result,
            &[keys::stories()],
            Some(Notice::StoryPublished),
            Some(Notice::StoryFailed),
        )
    }

    pub fn toggle_follow(&self, target: &str) -> Result<bool, ApiError> {
        let result = self.api.toggle_follow(target);
        self.settle(
            result,
            &[keys::profiles(), keys::following(target)],
            None,
            Some(Notice::FollowFailed),
        )
    }

    // -- Messages and notifications -------------------------------------------

    pub fn send_message(&self, receiver_id: &str, content: &str) -> Result<Message, ApiError> {
        let result = self.api.send_message(receiver_id, content);
        self.settle(
            result,
            &[keys::messages(receiver_id), keys::conversations()],
            None,
            Some(Notice::MessageSendFailed),
        )
    }

    /// Edit one of the viewer's messages in the thread with `counterpart`.
    pub fn edit_message(
        &self,
        counterpart: &str,
        message_id: &str,
        content: &str,
    ) -> Result<Message, ApiError> {
        let result = self.api.update_message(message_id, content);
        self.settle(
            result,
            &[keys::messages(counterpart), keys::conversations()],
            Some(Notice::MessageEdited),
            Some(Notice::MessageEditFailed),
        )
    }

    pub fn delete_message(&self, counterpart: &str, message_id: &str) -> Result<Message, ApiError> {
        let result = self.api.delete_message(message_id);
        self.settle(
            result,
            &[keys::messages(counterpart), keys::conversations()],
            Some(Notice::MessageDeleted),
            Some(Notice::MessageDeleteFailed),
        )
    }

    pub fn mark_notification_read(&self, notification_id: &str) -> Result<(), ApiError> {
        let result = self.api.mark_notification_read(notification_id);
        self.settle(result, &[keys::notifications()], None, None)
    }
}
