//! Typing indicators in both directions.
//!
//! Outgoing: every keystroke emits `typing` and pushes a single stop
//! deadline out by the timeout (debounce, not throttle). Incoming: each
//! `user_typing` marks the sender as typing until the same timeout passes
//! without another signal.
//!
//! The tracker holds no timers of its own. The owner sleeps until
//! [`TypingTracker::next_deadline`] and then calls [`TypingTracker::expire`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use huddle_shared::{ClientEvent, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outgoing {
    to: UserId,
    deadline: Instant,
}

/// What [`TypingTracker::expire`] found overdue.
#[derive(Debug, Default, PartialEq)]
pub struct Expired {
    /// `stop_typing` to emit for our own lapsed indicator.
    pub stop: Option<ClientEvent>,
    /// Remote users whose indicator just cleared.
    pub cleared: Vec<UserId>,
}

#[derive(Debug)]
pub struct TypingTracker {
    me: UserId,
    timeout: Duration,
    outgoing: Option<Outgoing>,
    remote: HashMap<UserId, Instant>,
}

impl TypingTracker {
    pub fn new(me: UserId, timeout: Duration) -> Self {
        Self {
            me,
            timeout,
            outgoing: None,
            remote: HashMap::new(),
        }
    }

    /// A local keystroke in the conversation with `to`. Returns the events to
    /// emit: a `stop_typing` for a previous counterpart if the user switched
    /// conversations mid-word, then `typing`.
    pub fn keystroke(&mut self, to: UserId, now: Instant) -> Vec<ClientEvent> {
        let mut events = Vec::with_capacity(2);
        if let Some(prev) = self.outgoing {
            if prev.to != to {
                events.push(self.stop_event(prev.to));
            }
        }
        events.push(ClientEvent::Typing {
            sender_id: self.me,
            receiver_id: to,
        });
        self.outgoing = Some(Outgoing {
            to,
            deadline: now + self.timeout,
        });
        events
    }

    /// Cancel the pending debounce and return the `stop_typing` it would
    /// have sent, if any.
    pub fn stop(&mut self) -> Option<ClientEvent> {
        self.outgoing.take().map(|o| self.stop_event(o.to))
    }

    /// `user_typing` from `from`. Returns `true` if the indicator just turned on.
    pub fn remote_typing(&mut self, from: UserId, now: Instant) -> bool {
        self.remote.insert(from, now + self.timeout).is_none()
    }

    /// `user_stop_typing` from `from`. Returns `true` if an indicator cleared.
    pub fn remote_stopped(&mut self, from: UserId) -> bool {
        self.remote.remove(&from).is_some()
    }

    pub fn is_typing(&self, from: UserId) -> bool {
        self.remote.contains_key(&from)
    }

    /// Remote users currently shown as typing, sorted.
    pub fn typing_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.remote.keys().copied().collect();
        users.sort();
        users
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let remote = self.remote.values().min().copied();
        match (self.outgoing.map(|o| o.deadline), remote) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn expire(&mut self, now: Instant) -> Expired {
        let mut expired = Expired::default();

        if let Some(o) = self.outgoing {
            if o.deadline <= now {
                self.outgoing = None;
                expired.stop = Some(self.stop_event(o.to));
            }
        }

        self.remote.retain(|user, deadline| {
            if *deadline <= now {
                expired.cleared.push(*user);
                false
            } else {
                true
            }
        });
        expired.cleared.sort();
        expired
    }

    fn stop_event(&self, to: UserId) -> ClientEvent {
        ClientEvent::StopTyping {
            sender_id: self.me,
            receiver_id: to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: UserId = UserId(1);
    const BOB: UserId = UserId(2);
    const CAROL: UserId = UserId(3);

    fn tracker() -> TypingTracker {
        TypingTracker::new(ME, Duration::from_secs(2))
    }

    fn typing_to(to: UserId) -> ClientEvent {
        ClientEvent::Typing {
            sender_id: ME,
            receiver_id: to,
        }
    }

    fn stop_to(to: UserId) -> ClientEvent {
        ClientEvent::StopTyping {
            sender_id: ME,
            receiver_id: to,
        }
    }

    #[test]
    fn test_keystrokes_debounce_the_stop() {
        let mut t = tracker();
        let start = Instant::now();

        assert_eq!(t.keystroke(BOB, start), vec![typing_to(BOB)]);
        let later = start + Duration::from_millis(1500);
        assert_eq!(t.keystroke(BOB, later), vec![typing_to(BOB)]);

        // The first keystroke's deadline has passed but was reset
        assert_eq!(t.expire(start + Duration::from_millis(2100)), Expired::default());
        assert_eq!(t.next_deadline(), Some(later + Duration::from_secs(2)));

        let expired = t.expire(later + Duration::from_secs(2));
        assert_eq!(expired.stop, Some(stop_to(BOB)));
        assert_eq!(t.next_deadline(), None);
    }

    #[test]
    fn test_stop_on_send() {
        let mut t = tracker();
        t.keystroke(BOB, Instant::now());
        assert_eq!(t.stop(), Some(stop_to(BOB)));
        assert_eq!(t.stop(), None);
        assert_eq!(t.next_deadline(), None);
    }

    #[test]
    fn test_switching_counterpart_stops_previous() {
        let mut t = tracker();
        let now = Instant::now();
        t.keystroke(BOB, now);
        assert_eq!(t.keystroke(CAROL, now), vec![stop_to(BOB), typing_to(CAROL)]);
    }

    #[test]
    fn test_remote_indicator_expires() {
        let mut t = tracker();
        let start = Instant::now();

        assert!(t.remote_typing(BOB, start));
        assert!(!t.remote_typing(BOB, start + Duration::from_millis(500)));
        assert!(t.is_typing(BOB));

        let expired = t.expire(start + Duration::from_millis(2400));
        assert!(expired.cleared.is_empty());

        let expired = t.expire(start + Duration::from_millis(2500));
        assert_eq!(expired.cleared, vec![BOB]);
        assert!(!t.is_typing(BOB));
    }

    #[test]
    fn test_remote_stop_clears_immediately() {
        let mut t = tracker();
        t.remote_typing(BOB, Instant::now());
        t.remote_typing(CAROL, Instant::now());
        assert!(t.remote_stopped(BOB));
        assert!(!t.remote_stopped(BOB));
        assert_eq!(t.typing_users(), vec![CAROL]);
    }
}
