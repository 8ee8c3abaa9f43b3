//! Cached conversation list with refresh scheduling.
//!
//! The list is never edited locally; every change is a full refetch from
//! the store. Refreshes requested after a send or delete are due at once,
//! those triggered by inbound messages wait out a short debounce so a burst
//! costs one fetch. At most one fetch is in flight; a request made during a
//! fetch is served after it completes.

use std::time::Duration;

use tokio::time::Instant;

use huddle_shared::{ConversationSummary, UserId};

#[derive(Debug)]
pub struct Directory {
    conversations: Vec<ConversationSummary>,
    debounce: Duration,
    due: Option<Instant>,
    in_flight: bool,
    loaded: bool,
}

impl Directory {
    pub fn new(debounce: Duration) -> Self {
        Self {
            conversations: Vec::new(),
            debounce,
            due: None,
            in_flight: false,
            loaded: false,
        }
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    /// `true` once the first fetch has landed.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn unread_from(&self, counterpart: UserId) -> u32 {
        self.conversations
            .iter()
            .find(|c| c.user_id == counterpart)
            .map_or(0, |c| c.unread_count)
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    /// Schedule a refresh now.
    pub fn refresh_now(&mut self, now: Instant) {
        self.due = Some(now);
    }

    /// Schedule a refresh after the debounce window, pushing back any
    /// debounced refresh already pending. An immediate one is kept.
    pub fn refresh_debounced(&mut self, now: Instant) {
        let at = now + self.debounce;
        self.due = Some(match self.due {
            Some(due) if due <= now => due,
            _ => at,
        });
    }

    /// When the owner should call [`Directory::begin`]. `None` while a fetch
    /// is running or nothing is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.in_flight {
            None
        } else {
            self.due
        }
    }

    /// Start a fetch if one is due. Returns `true` if the caller should fetch.
    pub fn begin(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if !self.in_flight && due <= now => {
                self.due = None;
                self.in_flight = true;
                true
            }
            _ => false,
        }
    }

    pub fn complete(&mut self, conversations: Vec<ConversationSummary>) {
        self.in_flight = false;
        self.loaded = true;
        self.conversations = conversations;
    }

    /// The fetch failed; the cached list stays as it was.
    pub fn failed(&mut self) {
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(user: i64, unread: u32) -> ConversationSummary {
        ConversationSummary {
            user_id: UserId(user),
            user_name: format!("user {user}"),
            last_message: Some("hey".into()),
            last_message_time: None,
            unread_count: unread,
        }
    }

    fn directory() -> Directory {
        Directory::new(Duration::from_millis(100))
    }

    #[test]
    fn test_burst_is_coalesced() {
        let mut d = directory();
        let t0 = Instant::now();

        d.refresh_debounced(t0);
        d.refresh_debounced(t0 + Duration::from_millis(40));
        d.refresh_debounced(t0 + Duration::from_millis(80));

        assert!(!d.begin(t0 + Duration::from_millis(150)));
        assert_eq!(d.next_deadline(), Some(t0 + Duration::from_millis(180)));
        assert!(d.begin(t0 + Duration::from_millis(180)));
        assert!(!d.begin(t0 + Duration::from_millis(180)));
    }

    #[test]
    fn test_immediate_refresh_wins_over_debounce() {
        let mut d = directory();
        let t0 = Instant::now();
        d.refresh_now(t0);
        d.refresh_debounced(t0);
        assert!(d.begin(t0));
    }

    #[test]
    fn test_request_during_fetch_runs_after() {
        let mut d = directory();
        let t0 = Instant::now();
        d.refresh_now(t0);
        assert!(d.begin(t0));

        d.refresh_now(t0);
        assert_eq!(d.next_deadline(), None);
        assert!(!d.begin(t0));

        d.complete(vec![summary(2, 1)]);
        assert!(d.begin(t0));
    }

    #[test]
    fn test_failed_fetch_keeps_cache() {
        let mut d = directory();
        let t0 = Instant::now();
        d.refresh_now(t0);
        d.begin(t0);
        d.complete(vec![summary(2, 3), summary(3, 1)]);

        d.refresh_now(t0);
        d.begin(t0);
        d.failed();

        assert!(d.is_loaded());
        assert_eq!(d.unread_from(UserId(2)), 3);
        assert_eq!(d.unread_from(UserId(9)), 0);
        assert_eq!(d.total_unread(), 4);
    }
}
