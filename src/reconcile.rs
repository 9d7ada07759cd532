//! Realtime conversation reconciliation.
//!
//! [`Reconciler`] folds message change events, typing signals and thread
//! navigation into the query cache and returns the side effects the caller
//! must run ([`Effect`]). It never touches the network itself, so every
//! rule here is checked synchronously in tests; [`crate::messenger`] is the
//! async runtime around it.
//!
//! The same insert can arrive on both the viewer's inbox channel and the
//! open thread's channel; ids already applied are skipped.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{keys, QueryCache};
use crate::logging::{msg_id, user_id};
use crate::model::{Conversation, Message};
use crate::typing::TypingIndicator;

/// Message ids remembered for deduplication.
const SEEN_CAPACITY: usize = 1024;
/// Characters of message content shown in alerts.
const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Insert(Message),
    Update(Message),
    Typing { user_id: String, typing: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Mark everything from this sender as read on the server.
    MarkRead(String),
    /// Alert the user about a message outside the open thread.
    Notify { sender: String, preview: String },
    /// The open thread's typing indicator changed.
    Typing { user_id: String, typing: bool },
}

enum Unread {
    Reset,
    Increment,
    Keep,
}

/// Shorten message content for an alert: 50 characters plus `...`.
pub fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let head: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

pub struct Reconciler {
    viewer: String,
    open: Option<String>,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    typing: TypingIndicator,
    typing_shown: bool,
    cache: Arc<QueryCache>,
}

impl Reconciler {
    pub fn new(viewer: &str, cache: Arc<QueryCache>) -> Self {
        Self {
            viewer: viewer.to_string(),
            open: None,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            typing: TypingIndicator::new(),
            typing_shown: false,
            cache,
        }
    }

    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    pub fn open_thread_id(&self) -> Option<&str> {
        self.open.as_deref()
    }

    pub fn is_typing(&self, now: Instant) -> bool {
        self.typing.is_typing(now)
    }

    /// Unread count of the cached conversation with `counterpart`.
    pub fn unread(&self, counterpart: &str) -> u32 {
        self.cache
            .get::<Vec<Conversation>>(&keys::conversations())
            .and_then(|list| {
                list.into_iter()
                    .find(|c| c.counterpart_id == counterpart)
                    .map(|c| c.unread_count)
            })
            .unwrap_or(0)
    }

    /// Open the thread with `counterpart`: its unread count drops to zero
    /// locally and the server is asked to mark it read.
    pub fn open_thread(&mut self, counterpart: &str) -> Vec<Effect> {
        if counterpart == self.viewer {
            crate::tlog!("reconcile: ignoring request to open a thread with oneself");
            return Vec::new();
        }
        let mut effects = self.close_thread();
        self.open = Some(counterpart.to_string());
        self.typing.set_counterpart(Some(counterpart));
        self.cache
            .update::<Vec<Conversation>, _>(&keys::conversations(), |list| {
                for c in list.iter_mut().filter(|c| c.counterpart_id == counterpart) {
                    c.unread_count = 0;
                }
            });
        effects.push(Effect::MarkRead(counterpart.to_string()));
        effects
    }

    pub fn close_thread(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(previous) = self.open.take() {
            if self.typing_shown {
                effects.push(Effect::Typing {
                    user_id: previous,
                    typing: false,
                });
            }
        }
        self.typing.set_counterpart(None);
        self.typing_shown = false;
        effects
    }

    pub fn apply(&mut self, event: Incoming, now: Instant) -> Vec<Effect> {
        match event {
            Incoming::Insert(message) => self.on_insert(message),
            Incoming::Update(message) => self.on_update(message),
            Incoming::Typing { user_id, typing } => {
                self.typing.on_signal(&user_id, typing, now);
                self.typing_transition(now).into_iter().collect()
            }
        }
    }

    /// Expire a stale typing indicator.
    pub fn tick(&mut self, now: Instant) -> Option<Effect> {
        self.typing_transition(now)
    }

    fn typing_transition(&mut self, now: Instant) -> Option<Effect> {
        let visible = self.typing.is_typing(now);
        if visible == self.typing_shown {
            return None;
        }
        self.typing_shown = visible;
        Some(Effect::Typing {
            user_id: self.open.clone().unwrap_or_default(),
            typing: visible,
        })
    }

    fn remember(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.seen_order.push_back(id.to_string());
        if self.seen_order.len() > SEEN_CAPACITY {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    fn on_insert(&mut self, message: Message) -> Vec<Effect> {
        if message.sender_id == message.receiver_id {
            return Vec::new();
        }
        let incoming = message.receiver_id == self.viewer;
        let outgoing = message.sender_id == self.viewer;
        if !incoming && !outgoing {
            return Vec::new();
        }
        if !self.remember(&message.id) {
            crate::tlog!("reconcile: {} already applied", msg_id(&message.id));
            return Vec::new();
        }

        let counterpart = message.counterpart(&self.viewer).to_string();
        let in_open_thread = self.open.as_deref() == Some(counterpart.as_str());

        if incoming && in_open_thread {
            self.append_to_thread(&counterpart, &message);
            self.touch_conversation(&counterpart, &message, Unread::Reset);
            self.cache.invalidate(&keys::messages(&counterpart));
            self.cache.invalidate(&keys::conversations());
            return vec![Effect::MarkRead(counterpart)];
        }

        if incoming {
            crate::tlog!(
                "reconcile: {} from {} outside the open thread",
                msg_id(&message.id),
                user_id(&counterpart)
            );
            self.touch_conversation(&counterpart, &message, Unread::Increment);
            self.cache.invalidate(&keys::conversations());
            return vec![Effect::Notify {
                sender: counterpart,
                preview: preview(&message.content),
            }];
        }

        if in_open_thread {
            self.append_to_thread(&counterpart, &message);
            self.cache.invalidate(&keys::messages(&counterpart));
        }
        self.touch_conversation(&counterpart, &message, Unread::Keep);
        self.cache.invalidate(&keys::conversations());
        Vec::new()
    }

    fn on_update(&mut self, message: Message) -> Vec<Effect> {
        let Some(counterpart) = self.open.clone() else {
            return Vec::new();
        };
        if !message.belongs_to_thread(&self.viewer, &counterpart) {
            return Vec::new();
        }
        self.cache
            .update::<Vec<Message>, _>(&keys::messages(&counterpart), |thread| {
                for row in thread.iter_mut().filter(|m| m.id == message.id) {
                    *row = message.clone();
                }
            });
        self.cache
            .update::<Vec<Conversation>, _>(&keys::conversations(), |list| {
                for c in list
                    .iter_mut()
                    .filter(|c| c.last_message.id == message.id)
                {
                    c.last_message = message.clone();
                }
            });
        self.cache.invalidate(&keys::messages(&counterpart));
        self.cache.invalidate(&keys::conversations());
        Vec::new()
    }

    fn append_to_thread(&self, counterpart: &str, message: &Message) {
        self.cache
            .update::<Vec<Message>, _>(&keys::messages(counterpart), |thread| {
                if !thread.iter().any(|m| m.id == message.id) {
                    thread.push(message.clone());
                }
            });
    }

    /// Make `message` the conversation's latest and move it to the front.
    fn touch_conversation(&self, counterpart: &str, message: &Message, unread: Unread) {
        let viewer = self.viewer.as_str();
        self.cache
            .update::<Vec<Conversation>, _>(&keys::conversations(), |list| {
                let mut entry = match list.iter().position(|c| c.counterpart_id == counterpart) {
                    Some(pos) => list.remove(pos),
                    None => Conversation {
                        counterpart_id: counterpart.to_string(),
                        user: message.counterpart_profile(viewer).cloned(),
                        last_message: message.clone(),
                        unread_count: 0,
                    },
                };
                entry.last_message = message.clone();
                match unread {
                    Unread::Reset => entry.unread_count = 0,
                    Unread::Increment => entry.unread_count += 1,
                    Unread::Keep => {}
                }
                list.insert(0, entry);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_by_characters() {
        assert_eq!(preview("short"), "short");
        let arabic = "م".repeat(60);
        let shown = preview(&arabic);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), 53);
        assert_eq!(preview(&"a".repeat(50)), "a".repeat(50));
    }

    #[test]
    fn cannot_open_thread_with_oneself() {
        let mut r = Reconciler::new("me", Arc::new(QueryCache::new()));
        assert!(r.open_thread("me").is_empty());
        assert_eq!(r.open_thread_id(), None);
    }
}
