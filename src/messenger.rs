//! Async messaging runtime.
//!
//! [`Messenger`] joins the viewer's inbox channel, joins and leaves the open
//! thread's channel as the user navigates, feeds realtime events through the
//! [`Reconciler`] and runs the resulting effects. Blocking backend calls go
//! through `spawn_blocking`; mark-read and alert lookups are fire-and-forget
//! and only log their failures.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::api::ApiError;
use crate::cache::keys;
use crate::logging::user_id;
use crate::model::Message;
use crate::mutations::Mutations;
use crate::realtime::{
    ChangeKind, ChannelSpec, RealtimeClient, RealtimeError, RealtimeEvent, Subscription,
};
use crate::reconcile::{Effect, Incoming, Reconciler};
use crate::toast::MessageAlert;
use crate::typing::{channel_name, TypingEmitter, TYPING_EVENT};

/// How often typing deadlines are checked.
const TYPING_POLL: Duration = Duration::from_millis(250);
/// Name shown when the sender's profile cannot be loaded.
const UNKNOWN_SENDER: &str = "مستخدم";

/// Inbox channel: inserts addressed to the viewer.
pub fn inbox_channel(viewer: &str) -> ChannelSpec {
    ChannelSpec::new(format!("user-messages-{viewer}")).on_change(
        ChangeKind::Insert,
        "messages",
        Some(format!("receiver_id=eq.{viewer}")),
    )
}

/// Thread channel: message inserts and edits plus typing broadcasts.
pub fn thread_channel(viewer: &str, counterpart: &str) -> ChannelSpec {
    ChannelSpec::new(channel_name(viewer, counterpart))
        .on_change(ChangeKind::Insert, "messages", None)
        .on_change(ChangeKind::Update, "messages", None)
}

/// Translate a realtime event into reconciler input, if it concerns us.
pub fn to_incoming(event: &RealtimeEvent) -> Option<Incoming> {
    match event {
        RealtimeEvent::Change { change, .. } if change.table == "messages" => {
            let message: Message = match change.record_as() {
                Ok(m) => m,
                Err(e) => {
                    crate::tlog!("messenger: undecodable message row: {}", e);
                    return None;
                }
            };
            match change.kind {
                ChangeKind::Insert => Some(Incoming::Insert(message)),
                ChangeKind::Update => Some(Incoming::Update(message)),
                ChangeKind::Delete => None,
            }
        }
        RealtimeEvent::Broadcast { event, payload, .. } if event == TYPING_EVENT => {
            Some(Incoming::Typing {
                user_id: payload.get("userId")?.as_str()?.to_string(),
                typing: payload.get("isTyping")?.as_bool()?,
            })
        }
        _ => None,
    }
}

struct State {
    reconciler: Reconciler,
    emitter: TypingEmitter,
    thread: Option<Subscription>,
}

pub struct Messenger {
    viewer: String,
    mutations: Mutations,
    realtime: RealtimeClient,
    state: Mutex<State>,
    inbox: Mutex<Option<Subscription>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Messenger {
    /// Join the inbox channel and start processing realtime events.
    pub fn start(
        viewer: &str,
        mutations: Mutations,
        realtime: RealtimeClient,
    ) -> Result<Arc<Self>, RealtimeError> {
        let reconciler = Reconciler::new(viewer, Arc::clone(mutations.cache()));
        let events = realtime.events();
        let inbox = realtime.subscribe(inbox_channel(viewer))?;
        crate::tlog!("messenger: listening for messages to {}", user_id(viewer));

        let messenger = Arc::new(Self {
            viewer: viewer.to_string(),
            mutations,
            realtime,
            state: Mutex::new(State {
                reconciler,
                emitter: TypingEmitter::new(),
                thread: None,
            }),
            inbox: Mutex::new(Some(inbox)),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(event_loop(Arc::downgrade(&messenger), events));
        *lock(&messenger.task) = Some(task);
        Ok(messenger)
    }

    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    pub fn open_thread_id(&self) -> Option<String> {
        lock(&self.state).reconciler.open_thread_id().map(str::to_string)
    }

    pub fn is_counterpart_typing(&self) -> bool {
        lock(&self.state).reconciler.is_typing(Instant::now())
    }

    /// Switch to the thread with `counterpart`, joining its channel.
    ///
    /// A channel that cannot be joined is logged; the thread still opens and
    /// is marked read. Opening the same thread again retries the join.
    pub fn open_thread(&self, counterpart: &str) {
        let effects = {
            let mut state = lock(&self.state);
            let already_open = state.reconciler.open_thread_id() == Some(counterpart);
            if already_open && state.thread.is_some() {
                return;
            }
            let effects = if already_open {
                Vec::new()
            } else {
                let effects = state.reconciler.open_thread(counterpart);
                if state.reconciler.open_thread_id() != Some(counterpart) {
                    return;
                }
                state.emitter = TypingEmitter::new();
                effects
            };
            // Drop the old channel before joining the new one.
            state.thread = None;
            match self.realtime.subscribe(thread_channel(&self.viewer, counterpart)) {
                Ok(thread) => {
                    crate::tlog!("messenger: watching {}", thread.channel());
                    state.thread = Some(thread);
                }
                Err(e) => crate::tlog!(
                    "messenger: cannot watch thread with {}: {}",
                    user_id(counterpart),
                    e
                ),
            }
            effects
        };
        self.run_effects(effects);
    }

    /// Whether the open thread's channel is joined.
    pub fn is_watching_thread(&self) -> bool {
        lock(&self.state).thread.is_some()
    }

    pub fn close_thread(&self) {
        let (effects, stop) = {
            let mut state = lock(&self.state);
            let counterpart = state.reconciler.open_thread_id().map(str::to_string);
            let stop = match counterpart {
                Some(c) if state.emitter.is_typing() => state.emitter.sent().map(|t| (c, t)),
                _ => None,
            };
            state.thread = None;
            (state.reconciler.close_thread(), stop)
        };
        if let Some((counterpart, typing)) = stop {
            self.broadcast_typing(&counterpart, typing);
        }
        self.run_effects(effects);
    }

    /// The compose box changed.
    pub fn input_changed(&self, text: &str) {
        let signal = {
            let mut state = lock(&self.state);
            let Some(counterpart) = state.reconciler.open_thread_id().map(str::to_string) else {
                return;
            };
            let now = Instant::now();
            state
                .emitter
                .input_changed(text, now)
                .map(|typing| (counterpart, typing))
        };
        if let Some((counterpart, typing)) = signal {
            self.broadcast_typing(&counterpart, typing);
        }
    }

    /// Send a message to the open thread.
    pub async fn send(&self, content: &str) -> Result<Message, ApiError> {
        let (counterpart, stop) = {
            let mut state = lock(&self.state);
            let counterpart = state
                .reconciler
                .open_thread_id()
                .map(str::to_string)
                .ok_or_else(|| ApiError::NotFound("no conversation is open".to_string()))?;
            (counterpart, state.emitter.sent())
        };
        if let Some(typing) = stop {
            self.broadcast_typing(&counterpart, typing);
        }

        let mutations = self.mutations.clone();
        let receiver = counterpart.clone();
        let content = content.to_string();
        let message = tokio::task::spawn_blocking(move || {
            mutations.send_message(&receiver, &content)
        })
        .await
        .map_err(|e| ApiError::Decode(format!("send task failed: {e}")))??;

        let effects = lock(&self.state)
            .reconciler
            .apply(Incoming::Insert(message.clone()), Instant::now());
        self.run_effects(effects);
        Ok(message)
    }

    pub fn shutdown(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        lock(&self.state).thread = None;
        lock(&self.inbox).take();
    }

    fn broadcast_typing(&self, counterpart: &str, typing: bool) {
        let channel = channel_name(&self.viewer, counterpart);
        let payload = typing_payload(&self.viewer, typing);
        if let Err(e) = self.realtime.send_broadcast(&channel, TYPING_EVENT, payload) {
            crate::tlog!("messenger: typing signal not sent: {}", e);
        }
    }

    fn handle_event(&self, event: RealtimeEvent) {
        match &event {
            RealtimeEvent::Connected => {
                // Whatever arrived while disconnected is refetched, not replayed.
                let cache = self.mutations.cache();
                cache.invalidate(&keys::conversations());
                if let Some(open) = self.open_thread_id() {
                    cache.invalidate(&keys::messages(&open));
                }
                return;
            }
            RealtimeEvent::Joined { channel, ok: false } => {
                crate::tlog!("messenger: subscription to {} failed", channel);
                return;
            }
            _ => {}
        }
        let Some(incoming) = to_incoming(&event) else {
            return;
        };
        let effects = lock(&self.state).reconciler.apply(incoming, Instant::now());
        self.run_effects(effects);
    }

    fn poll_timers(&self) {
        let now = Instant::now();
        let (effect, stop) = {
            let mut state = lock(&self.state);
            let effect = state.reconciler.tick(now);
            let counterpart = state.reconciler.open_thread_id().map(str::to_string);
            let stop = match counterpart {
                Some(c) => state.emitter.poll(now).map(|t| (c, t)),
                None => None,
            };
            (effect, stop)
        };
        if let Some((counterpart, typing)) = stop {
            self.broadcast_typing(&counterpart, typing);
        }
        self.run_effects(effect.into_iter().collect());
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::MarkRead(sender) => self.mark_read(sender),
                Effect::Notify { sender, preview } => self.alert(sender, preview),
                Effect::Typing { user_id, typing } => {
                    self.mutations.notifier().typing(&user_id, typing)
                }
            }
        }
    }

    fn mark_read(&self, sender: String) {
        let api = self.mutations.api().clone();
        let cache = Arc::clone(self.mutations.cache());
        tokio::spawn(async move {
            let who = sender.clone();
            match tokio::task::spawn_blocking(move || api.mark_messages_read(&who)).await {
                Ok(Ok(_)) => {
                    cache.invalidate(&keys::conversations());
                    cache.invalidate(&keys::messages(&sender));
                }
                Ok(Err(e)) => crate::tlog!("messenger: failed to mark messages read: {}", e),
                Err(e) => crate::tlog!("messenger: mark-read task failed: {}", e),
            }
        });
    }

    fn alert(&self, sender: String, preview: String) {
        let api = self.mutations.api().clone();
        let notifier = Arc::clone(self.mutations.notifier());
        tokio::spawn(async move {
            let who = sender.clone();
            let profile = match tokio::task::spawn_blocking(move || api.profile_by_id(&who)).await
            {
                Ok(Ok(profile)) => profile,
                Ok(Err(e)) => {
                    crate::tlog!("messenger: sender lookup failed: {}", e);
                    None
                }
                Err(e) => {
                    crate::tlog!("messenger: sender lookup task failed: {}", e);
                    None
                }
            };
            let (sender_name, avatar_url) = match &profile {
                Some(p) => (p.display_name().to_string(), p.avatar_or_fallback()),
                None => (
                    UNKNOWN_SENDER.to_string(),
                    format!("https://api.dicebear.com/7.x/avataaars/svg?seed={sender}"),
                ),
            };
            notifier.message_alert(MessageAlert {
                sender_id: sender,
                sender_name,
                avatar_url,
                preview,
            });
        });
    }
}

async fn event_loop(
    messenger: std::sync::Weak<Messenger>,
    mut events: broadcast::Receiver<RealtimeEvent>,
) {
    let mut ticker = tokio::time::interval(TYPING_POLL);
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => match messenger.upgrade() {
                    Some(m) => m.handle_event(event),
                    None => return,
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    crate::tlog!("messenger: dropped {} realtime event(s)", n);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = ticker.tick() => match messenger.upgrade() {
                Some(m) => m.poll_timers(),
                None => return,
            },
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn typing_payload(viewer: &str, typing: bool) -> Value {
    json!({ "userId": viewer, "isTyping": typing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::ChangeEvent;

    #[test]
    fn inbox_channel_filters_on_receiver() {
        let spec = inbox_channel("me");
        assert_eq!(spec.name, "user-messages-me");
        assert_eq!(spec.changes.len(), 1);
        assert_eq!(spec.changes[0].filter.as_deref(), Some("receiver_id=eq.me"));
    }

    #[test]
    fn thread_channel_is_shared_by_both_parties() {
        let a = thread_channel("zed", "amy");
        let b = thread_channel("amy", "zed");
        assert_eq!(a.name, "chat-amy-zed");
        assert_eq!(a, b);
        assert_eq!(a.changes.len(), 2);
    }

    #[test]
    fn typing_broadcasts_become_incoming() {
        let event = RealtimeEvent::Broadcast {
            channel: "chat-a-b".to_string(),
            event: TYPING_EVENT.to_string(),
            payload: json!({ "userId": "b", "isTyping": true }),
        };
        assert_eq!(
            to_incoming(&event),
            Some(Incoming::Typing {
                user_id: "b".to_string(),
                typing: true
            })
        );
    }

    #[test]
    fn message_changes_become_incoming() {
        let event = RealtimeEvent::Change {
            channel: "user-messages-me".to_string(),
            change: ChangeEvent {
                kind: ChangeKind::Insert,
                table: "messages".to_string(),
                record: json!({
                    "id": "m1", "sender_id": "b", "receiver_id": "me", "content": "hi"
                }),
                old_record: Value::Null,
            },
        };
        match to_incoming(&event) {
            Some(Incoming::Insert(m)) => assert_eq!(m.id, "m1"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
