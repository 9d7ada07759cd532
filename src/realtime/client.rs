//! Realtime socket task.
//!
//! [`RealtimeClient::connect`] spawns one task that owns the WebSocket. It
//! reconnects with exponential backoff and re-joins every channel that still
//! has a live [`Subscription`]. Events that arrive while disconnected are
//! lost; callers refetch what they need.
//!
//! The access token is read from a `watch` channel on every join, and a
//! changed token is handed to the joined channels straight away.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use super::{
    interpret, reply_ok, ChannelSpec, Frame, RealtimeError, RealtimeEvent, HEARTBEAT_INTERVAL_SECS,
};

const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
enum Command {
    Join(ChannelSpec),
    Leave(String),
    Broadcast {
        channel: String,
        event: String,
        payload: Value,
    },
    Shutdown,
}

/// Handle to the realtime socket task. Cheap to clone.
#[derive(Clone)]
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<RealtimeEvent>,
}

impl RealtimeClient {
    /// Start the socket task. Must be called from within a tokio runtime.
    /// `access_token` always holds the token to present to the server.
    pub fn connect(url: String, access_token: watch::Receiver<String>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(socket_loop(url, access_token, rx, events.clone()));
        Self { commands, events }
    }

    pub fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events.subscribe()
    }

    /// Hand `event` to subscribers as if it had arrived on the socket.
    #[doc(hidden)]
    pub fn deliver(&self, event: RealtimeEvent) {
        let _ = self.events.send(event);
    }

    /// Join a channel. The channel stays joined (across reconnects) until
    /// the returned guard is dropped.
    pub fn subscribe(&self, spec: ChannelSpec) -> Result<Subscription, RealtimeError> {
        let channel = spec.name.clone();
        self.commands
            .send(Command::Join(spec))
            .map_err(|_| RealtimeError::Closed)?;
        Ok(Subscription {
            channel,
            commands: self.commands.clone(),
        })
    }

    pub fn send_broadcast(
        &self,
        channel: &str,
        event: &str,
        payload: Value,
    ) -> Result<(), RealtimeError> {
        self.commands
            .send(Command::Broadcast {
                channel: channel.to_string(),
                event: event.to_string(),
                payload,
            })
            .map_err(|_| RealtimeError::Closed)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Membership of one channel. Dropping it leaves the channel.
pub struct Subscription {
    channel: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Leave(self.channel.clone()));
    }
}

/// Joined channels with their subscriber counts.
#[derive(Default)]
struct Channels {
    joined: HashMap<String, (ChannelSpec, usize)>,
    /// Join refs awaiting a reply, with their channel.
    pending_joins: HashMap<String, String>,
    next_ref: u64,
}

impl Channels {
    fn next_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    fn join_frame(&mut self, spec: &ChannelSpec, access_token: &str) -> Frame {
        let reference = self.next_ref();
        self.pending_joins
            .insert(reference.clone(), spec.name.clone());
        spec.join_frame(&reference, access_token)
    }

    /// The join outcome carried by `frame`, if it answers one of our joins.
    fn join_reply(&mut self, frame: &Frame) -> Option<RealtimeEvent> {
        let ok = reply_ok(frame)?;
        let channel = self.pending_joins.remove(frame.reference.as_deref()?)?;
        Some(RealtimeEvent::Joined { channel, ok })
    }

    /// Record a command; returns the frame to send if the socket is up.
    fn apply(&mut self, command: Command, access_token: &str) -> Option<Frame> {
        match command {
            Command::Join(spec) => {
                let name = spec.name.clone();
                let entry = self.joined.entry(name).or_insert((spec, 0));
                entry.1 += 1;
                if entry.1 > 1 {
                    return None;
                }
                let spec = entry.0.clone();
                Some(self.join_frame(&spec, access_token))
            }
            Command::Leave(name) => {
                let remaining = match self.joined.get_mut(&name) {
                    Some(entry) => {
                        entry.1 = entry.1.saturating_sub(1);
                        entry.1
                    }
                    None => return None,
                };
                if remaining > 0 {
                    return None;
                }
                self.joined.remove(&name);
                self.pending_joins.retain(|_, channel| *channel != name);
                let reference = self.next_ref();
                Some(Frame::leave(&name, &reference))
            }
            Command::Broadcast {
                channel,
                event,
                payload,
            } => {
                let reference = self.next_ref();
                Some(Frame::broadcast(&channel, &event, payload, &reference))
            }
            Command::Shutdown => None,
        }
    }

    fn rejoin_frames(&mut self, access_token: &str) -> Vec<Frame> {
        self.pending_joins.clear();
        let specs: Vec<ChannelSpec> = self.joined.values().map(|(s, _)| s.clone()).collect();
        specs
            .iter()
            .map(|spec| self.join_frame(spec, access_token))
            .collect()
    }

    fn token_frames(&mut self, access_token: &str) -> Vec<Frame> {
        let names: Vec<String> = self.joined.keys().cloned().collect();
        names
            .iter()
            .map(|name| {
                let reference = self.next_ref();
                Frame::access_token(name, access_token, &reference)
            })
            .collect()
    }
}

async fn socket_loop(
    url: String,
    mut access_token: watch::Receiver<String>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<RealtimeEvent>,
) {
    let mut channels = Channels::default();
    let mut backoff_secs = INITIAL_BACKOFF_SECS;
    let mut token_source_open = true;

    loop {
        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _response)) => {
                backoff_secs = INITIAL_BACKOFF_SECS;
                crate::tlog!("realtime connected");
                let _ = events.send(RealtimeEvent::Connected);

                let (mut write, mut read) = ws_stream.split();
                let mut alive = true;
                let token = access_token.borrow_and_update().clone();
                for frame in channels.rejoin_frames(&token) {
                    if !send_frame(&mut write, &frame).await {
                        alive = false;
                        break;
                    }
                }

                let period = Duration::from_secs(HEARTBEAT_INTERVAL_SECS);
                let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

                while alive {
                    tokio::select! {
                        command = commands.recv() => match command {
                            None | Some(Command::Shutdown) => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                crate::tlog!("realtime shut down");
                                return;
                            }
                            Some(command) => {
                                let token = access_token.borrow().clone();
                                if let Some(frame) = channels.apply(command, &token) {
                                    alive = send_frame(&mut write, &frame).await;
                                }
                            }
                        },
                        changed = access_token.changed(), if token_source_open => match changed {
                            Err(_) => token_source_open = false,
                            Ok(()) => {
                                let token = access_token.borrow_and_update().clone();
                                crate::tlog!("realtime: access token refreshed");
                                for frame in channels.token_frames(&token) {
                                    if !send_frame(&mut write, &frame).await {
                                        alive = false;
                                        break;
                                    }
                                }
                            }
                        },
                        incoming = read.next() => match incoming {
                            Some(Ok(WsMessage::Text(text))) => dispatch(&text, &mut channels, &events),
                            Some(Ok(WsMessage::Close(_))) | None => alive = false,
                            Some(Err(e)) => {
                                crate::tlog!("realtime error: {}", e);
                                alive = false;
                            }
                            Some(Ok(_)) => {}
                        },
                        _ = heartbeat.tick() => {
                            let reference = channels.next_ref();
                            alive = send_frame(&mut write, &Frame::heartbeat(&reference)).await;
                        }
                    }
                }

                let _ = events.send(RealtimeEvent::Disconnected);
                crate::tlog!("realtime disconnected, reconnecting in {}s", backoff_secs);
            }
            Err(e) => {
                crate::tlog!(
                    "realtime connection failed (retry in {}s): {}",
                    backoff_secs,
                    e
                );
            }
        }

        // Keep tracking joins and leaves while waiting to reconnect.
        let sleep = tokio::time::sleep(Duration::from_secs(backoff_secs));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => return,
                    Some(command) => {
                        let token = access_token.borrow().clone();
                        let _ = channels.apply(command, &token);
                    }
                },
            }
        }
        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
    }
}

async fn send_frame<S>(write: &mut S, frame: &Frame) -> bool
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = match frame.encode() {
        Ok(t) => t,
        Err(e) => {
            crate::tlog!("realtime: cannot encode {} frame: {}", frame.event, e);
            return true;
        }
    };
    match write.send(WsMessage::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            crate::tlog!("realtime send failed: {}", e);
            false
        }
    }
}

fn dispatch(text: &str, channels: &mut Channels, events: &broadcast::Sender<RealtimeEvent>) {
    let frame = match Frame::decode(text) {
        Ok(f) => f,
        Err(e) => {
            crate::tlog!("realtime: undecodable frame: {}", e);
            return;
        }
    };
    let Some(event) = channels.join_reply(&frame).or_else(|| interpret(&frame)) else {
        return;
    };
    if let RealtimeEvent::Joined { channel, ok } = &event {
        if *ok {
            crate::tlog!("realtime: joined {}", channel);
        } else {
            crate::tlog!("realtime: join of {} refused: {}", channel, frame.payload);
        }
    }
    let _ = events.send(event);
}
