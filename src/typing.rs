//! Ephemeral typing presence.
//!
//! Both halves are plain state machines over [`Instant`]s. The messenger
//! runtime feeds them the clock; tests feed them fixed instants.

use std::time::{Duration, Instant};

/// Inactivity after which a local "typing" signal is withdrawn.
pub const TYPING_DEBOUNCE: Duration = Duration::from_secs(2);
/// How long a remote "typing" signal is shown without a refresh.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// Broadcast event name carrying typing signals.
pub const TYPING_EVENT: &str = "typing";

/// Channel shared by the two parties of a thread: `chat-<min>-<max>`.
pub fn channel_name(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("chat-{lo}-{hi}")
}

/// Decides when the local user's typing state should be broadcast.
#[derive(Debug, Default)]
pub struct TypingEmitter {
    deadline: Option<Instant>,
}

impl TypingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The input box changed. Returns the signal to broadcast, if any.
    pub fn input_changed(&mut self, input: &str, now: Instant) -> Option<bool> {
        if input.trim().is_empty() {
            return self.stop();
        }
        self.deadline = Some(now + TYPING_DEBOUNCE);
        Some(true)
    }

    /// The message was sent.
    pub fn sent(&mut self) -> Option<bool> {
        self.stop()
    }

    /// Check the inactivity deadline.
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(false)
            }
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }

    fn stop(&mut self) -> Option<bool> {
        self.deadline = None;
        Some(false)
    }
}

/// Tracks whether the open thread's counterpart is typing.
#[derive(Debug, Default)]
pub struct TypingIndicator {
    counterpart: Option<String>,
    visible_until: Option<Instant>,
}

impl TypingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to a thread (or none). Clears any shown state.
    pub fn set_counterpart(&mut self, counterpart: Option<&str>) {
        self.counterpart = counterpart.map(str::to_string);
        self.visible_until = None;
    }

    /// A typing signal arrived. Returns `true` when the visible state changed.
    pub fn on_signal(&mut self, user_id: &str, typing: bool, now: Instant) -> bool {
        if self.counterpart.as_deref() != Some(user_id) {
            return false;
        }
        let before = self.is_typing(now);
        self.visible_until = typing.then(|| now + TYPING_TIMEOUT);
        before != self.is_typing(now)
    }

    pub fn is_typing(&self, now: Instant) -> bool {
        self.visible_until.map(|until| now < until).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_is_order_independent() {
        assert_eq!(channel_name("b", "a"), "chat-a-b");
        assert_eq!(channel_name("a", "b"), "chat-a-b");
    }

    #[test]
    fn emitter_debounces_and_expires() {
        let t0 = Instant::now();
        let mut emitter = TypingEmitter::new();

        assert_eq!(emitter.input_changed("h", t0), Some(true));
        assert_eq!(emitter.poll(t0 + Duration::from_millis(1500)), None);

        // Another keystroke pushes the deadline out.
        emitter.input_changed("hi", t0 + Duration::from_millis(1500));
        assert_eq!(emitter.poll(t0 + Duration::from_millis(2500)), None);
        assert_eq!(emitter.poll(t0 + Duration::from_millis(3500)), Some(false));
        assert_eq!(emitter.poll(t0 + Duration::from_millis(4000)), None);
    }

    #[test]
    fn emitter_stops_on_empty_input_and_send() {
        let t0 = Instant::now();
        let mut emitter = TypingEmitter::new();
        emitter.input_changed("hello", t0);
        assert_eq!(emitter.input_changed("   ", t0), Some(false));
        assert!(!emitter.is_typing());

        emitter.input_changed("again", t0);
        assert_eq!(emitter.sent(), Some(false));
        assert_eq!(emitter.poll(t0 + Duration::from_secs(5)), None);
    }

    #[test]
    fn indicator_only_tracks_the_counterpart() {
        let t0 = Instant::now();
        let mut indicator = TypingIndicator::new();
        indicator.set_counterpart(Some("bob"));

        assert!(!indicator.on_signal("carol", true, t0));
        assert!(!indicator.is_typing(t0));

        assert!(indicator.on_signal("bob", true, t0));
        assert!(indicator.is_typing(t0 + Duration::from_millis(2900)));
        assert!(!indicator.is_typing(t0 + Duration::from_secs(3)));
    }

    #[test]
    fn indicator_clears_on_false_and_thread_switch() {
        let t0 = Instant::now();
        let mut indicator = TypingIndicator::new();
        indicator.set_counterpart(Some("bob"));
        indicator.on_signal("bob", true, t0);
        assert!(indicator.on_signal("bob", false, t0));
        assert!(!indicator.is_typing(t0));

        indicator.on_signal("bob", true, t0);
        indicator.set_counterpart(Some("carol"));
        assert!(!indicator.is_typing(t0));
    }
}
