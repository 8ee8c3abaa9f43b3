//! The open conversation: its cached messages and paging state.
//!
//! Page 1 holds the newest messages. Loading page 1 replaces the list;
//! every further page is older and is prepended. Each load is issued with a
//! [`LoadTicket`] and a response is only applied if its ticket still
//! matches the open conversation.

use huddle_shared::{Message, MessageId, MessagePage, Pagination, UserId};

/// Identifies one history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub counterpart: UserId,
    pub page: u32,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Applied { added: usize },
    /// The user has navigated away since the request went out.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Appended,
    Duplicate,
    /// The message belongs to a conversation that is not open.
    NotOpen,
}

#[derive(Debug)]
pub struct History {
    me: UserId,
    counterpart: Option<UserId>,
    messages: Vec<Message>,
    pagination: Pagination,
    loading: Option<u32>,
    /// Bumped on every open/close; tickets from older generations are stale.
    generation: u64,
}

impl History {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            counterpart: None,
            messages: Vec::new(),
            pagination: Pagination::first(),
            loading: None,
            generation: 0,
        }
    }

    /// Open the conversation with `counterpart`: clear the list, reset
    /// paging and return the ticket for page 1.
    pub fn open(&mut self, counterpart: UserId) -> LoadTicket {
        self.generation += 1;
        self.counterpart = Some(counterpart);
        self.messages.clear();
        self.pagination = Pagination::first();
        self.loading = Some(1);
        LoadTicket {
            counterpart,
            page: 1,
            generation: self.generation,
        }
    }

    pub fn close(&mut self) {
        self.generation += 1;
        self.counterpart = None;
        self.messages.clear();
        self.pagination = Pagination::first();
        self.loading = None;
    }

    pub fn counterpart(&self) -> Option<UserId> {
        self.counterpart
    }

    pub fn is_open(&self, counterpart: UserId) -> bool {
        self.counterpart == Some(counterpart)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    pub fn has_older(&self) -> bool {
        self.counterpart.is_some() && self.pagination.has_next
    }

    /// Ticket for the next older page, if there is one and nothing is in flight.
    pub fn load_older(&mut self) -> Option<LoadTicket> {
        let counterpart = self.counterpart?;
        if self.loading.is_some() || !self.pagination.has_next {
            return None;
        }
        let page = self.pagination.current_page + 1;
        self.loading = Some(page);
        Some(LoadTicket {
            counterpart,
            page,
            generation: self.generation,
        })
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation && self.counterpart == Some(ticket.counterpart)
    }

    pub fn apply_page(&mut self, ticket: LoadTicket, page: MessagePage) -> PageOutcome {
        if !self.is_current(&ticket) {
            return PageOutcome::Stale;
        }
        self.loading = None;
        self.pagination = page.pagination;

        let mut incoming = Vec::with_capacity(page.data.len());
        for m in page.data {
            if !incoming.iter().any(|x: &Message| x.id == m.id) {
                incoming.push(m);
            }
        }

        if ticket.page <= 1 {
            let added = incoming.len();
            self.messages = incoming;
            return PageOutcome::Applied { added };
        }

        incoming.retain(|m| !self.contains(m.id));
        let added = incoming.len();
        incoming.append(&mut self.messages);
        self.messages = incoming;
        PageOutcome::Applied { added }
    }

    /// A load failed; allow it to be retried. Stale tickets are ignored.
    pub fn load_failed(&mut self, ticket: &LoadTicket) {
        if self.is_current(ticket) {
            self.loading = None;
        }
    }

    /// Idempotent insert of a live message.
    pub fn insert(&mut self, message: Message) -> InsertOutcome {
        let Some(counterpart) = self.counterpart else {
            return InsertOutcome::NotOpen;
        };
        if !message.is_between(self.me, counterpart) {
            return InsertOutcome::NotOpen;
        }
        if self.contains(message.id) {
            return InsertOutcome::Duplicate;
        }
        self.messages.push(message);
        InsertOutcome::Appended
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub fn remove(&mut self, id: MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    /// Drop every cached message if `counterpart`'s conversation is open.
    pub fn clear_conversation(&mut self, counterpart: UserId) -> bool {
        if !self.is_open(counterpart) {
            return false;
        }
        self.messages.clear();
        self.pagination = Pagination::first();
        true
    }

    /// Flip messages from `sender` to me to read. Returns how many changed.
    pub fn mark_inbound_read(&mut self, sender: UserId) -> usize {
        let me = self.me;
        self.flip_read(|m| m.sender_id == sender && m.receiver_id == me)
    }

    /// `messages_read` from `reader`: flip my messages to them to read.
    pub fn mark_outbound_read(&mut self, reader: UserId) -> usize {
        let me = self.me;
        self.flip_read(|m| m.sender_id == me && m.receiver_id == reader)
    }

    /// Cached messages from `sender` to me still unread.
    pub fn unread_from(&self, sender: UserId) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender_id == sender && m.receiver_id == self.me && !m.is_read)
            .count()
    }

    fn flip_read(&mut self, pred: impl Fn(&Message) -> bool) -> usize {
        let mut flipped = 0;
        for m in self.messages.iter_mut().filter(|m| !m.is_read && pred(m)) {
            m.is_read = true;
            flipped += 1;
        }
        flipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const ME: UserId = UserId(1);
    const SEVEN: UserId = UserId(7);
    const NINE: UserId = UserId(9);

    fn msg(id: i64, from: UserId, to: UserId) -> Message {
        Message {
            id: MessageId(id),
            sender_id: from,
            receiver_id: to,
            body: format!("m{id}"),
            attachment: None,
            created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            is_read: false,
        }
    }

    fn page(ids: &[i64], current: u32, total: u32) -> MessagePage {
        MessagePage {
            data: ids.iter().map(|id| msg(*id, SEVEN, ME)).collect(),
            pagination: Pagination {
                current_page: current,
                total_pages: total,
                has_next: current < total,
            },
        }
    }

    fn ids(h: &History) -> Vec<i64> {
        h.messages().iter().map(|m| m.id.0).collect()
    }

    #[test]
    fn test_page_one_replaces() {
        let mut h = History::new(ME);
        let t = h.open(SEVEN);
        h.apply_page(t, page(&[3, 4], 1, 1));

        let t = h.open(SEVEN);
        assert!(h.messages().is_empty());
        h.apply_page(t, page(&[5, 6], 1, 1));
        assert_eq!(ids(&h), vec![5, 6]);
    }

    #[test]
    fn test_older_pages_prepend_without_duplicates() {
        let mut h = History::new(ME);
        let t = h.open(SEVEN);
        assert_eq!(h.apply_page(t, page(&[21, 22, 23], 1, 2)), PageOutcome::Applied { added: 3 });
        assert!(h.has_older());

        let older = h.load_older().unwrap();
        assert_eq!(older.page, 2);
        // Nothing else is issued while a page is in flight
        assert!(h.load_older().is_none());

        // A message shifted across the page boundary shows up again
        let outcome = h.apply_page(older, page(&[19, 20, 21], 2, 2));
        assert_eq!(outcome, PageOutcome::Applied { added: 2 });
        assert_eq!(ids(&h), vec![19, 20, 21, 22, 23]);
        assert!(!h.has_older());
        assert!(h.load_older().is_none());
    }

    #[test]
    fn test_stale_response_after_switch_is_discarded() {
        let mut h = History::new(ME);
        let t = h.open(SEVEN);
        h.apply_page(t, page(&[3, 4], 1, 3));
        let older = h.load_older().unwrap();

        let nine = h.open(NINE);
        h.apply_page(
            nine,
            MessagePage {
                data: vec![msg(50, NINE, ME)],
                pagination: Pagination::first(),
            },
        );

        assert_eq!(h.apply_page(older, page(&[1, 2], 2, 3)), PageOutcome::Stale);
        assert_eq!(ids(&h), vec![50]);
        assert_eq!(h.counterpart(), Some(NINE));
    }

    #[test]
    fn test_reopening_same_counterpart_invalidates_old_tickets() {
        let mut h = History::new(ME);
        let first = h.open(SEVEN);
        let second = h.open(SEVEN);
        assert_eq!(h.apply_page(first, page(&[1], 1, 1)), PageOutcome::Stale);
        assert!(h.is_loading());
        assert_eq!(h.apply_page(second, page(&[2], 1, 1)), PageOutcome::Applied { added: 1 });
        assert!(!h.is_loading());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut h = History::new(ME);
        h.open(SEVEN);
        for id in [1, 2, 1, 3, 2, 2] {
            h.insert(msg(id, SEVEN, ME));
        }
        assert_eq!(ids(&h), vec![1, 2, 3]);
        assert_eq!(h.insert(msg(1, SEVEN, ME)), InsertOutcome::Duplicate);
    }

    #[test]
    fn test_insert_other_conversation() {
        let mut h = History::new(ME);
        assert_eq!(h.insert(msg(1, SEVEN, ME)), InsertOutcome::NotOpen);
        h.open(SEVEN);
        assert_eq!(h.insert(msg(2, NINE, ME)), InsertOutcome::NotOpen);
        assert_eq!(h.insert(msg(3, ME, SEVEN)), InsertOutcome::Appended);
    }

    #[test]
    fn test_read_flags() {
        let mut h = History::new(ME);
        h.open(SEVEN);
        h.insert(msg(1, SEVEN, ME));
        h.insert(msg(2, SEVEN, ME));
        h.insert(msg(3, ME, SEVEN));
        assert_eq!(h.unread_from(SEVEN), 2);

        assert_eq!(h.mark_inbound_read(SEVEN), 2);
        assert_eq!(h.unread_from(SEVEN), 0);
        assert!(!h.messages()[2].is_read);

        assert_eq!(h.mark_outbound_read(SEVEN), 1);
        assert!(h.messages().iter().all(|m| m.is_read));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut h = History::new(ME);
        h.open(SEVEN);
        h.insert(msg(1, SEVEN, ME));
        h.insert(msg(2, SEVEN, ME));

        assert!(h.remove(MessageId(1)));
        assert!(!h.remove(MessageId(1)));
        assert!(!h.clear_conversation(NINE));
        assert!(h.clear_conversation(SEVEN));
        assert!(h.messages().is_empty());
    }
}
