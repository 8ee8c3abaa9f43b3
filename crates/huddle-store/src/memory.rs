//! In-process message store.
//!
//! Several [`MemoryStore`] handles can share one backing dataset, each
//! acting as a different viewer (see [`MemoryStore::as_user`]).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use huddle_shared::{
    Attachment, ConversationSummary, Message, MessageId, MessagePage, Pagination, UserId,
};

use crate::error::{Result, StoreError};
use crate::store::{MessageStore, PageRequest, Upload, UploadedFile};

/// Which store operation a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Conversations,
    Messages,
    Upload,
    DeleteMessage,
    DeleteConversation,
}

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<Message>,
    names: HashMap<UserId, String>,
    next_id: i64,
    uploads: Vec<String>,
    failures: VecDeque<StoreOp>,
    calls: HashMap<StoreOp, usize>,
}

impl Inner {
    fn record(&mut self, op: StoreOp) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(pos) = self.failures.iter().position(|f| *f == op) {
            self.failures.remove(pos);
            return Err(StoreError::Unavailable(format!("{op:?} failed")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    viewer: UserId,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            inner: Arc::new(Mutex::new(Inner {
                next_id: 1,
                ..Inner::default()
            })),
        }
    }

    /// Another handle onto the same data, viewed by `user`.
    pub fn as_user(&self, user: UserId) -> Self {
        Self {
            viewer: user,
            inner: self.inner.clone(),
        }
    }

    pub fn viewer(&self) -> UserId {
        self.viewer
    }

    pub async fn set_name(&self, user: UserId, name: impl Into<String>) {
        self.inner.lock().await.names.insert(user, name.into());
    }

    /// Persist a message and assign its identifier, the way the server does
    /// before fanning it out.
    pub async fn insert_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        body: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> Message {
        let mut inner = self.inner.lock().await;
        let id = MessageId(inner.next_id);
        inner.next_id += 1;
        // Strictly increasing timestamps keep history order deterministic.
        let created_at = Utc::now() + Duration::milliseconds(id.0);
        let message = Message {
            id,
            sender_id,
            receiver_id,
            body: body.into(),
            attachment,
            created_at,
            is_read: false,
        };
        inner.messages.push(message.clone());
        message
    }

    /// Mark everything `sender` sent to `reader` as read.
    pub async fn mark_read(&self, reader: UserId, sender: UserId) -> usize {
        let mut inner = self.inner.lock().await;
        let mut flipped = 0;
        for m in inner
            .messages
            .iter_mut()
            .filter(|m| m.sender_id == sender && m.receiver_id == reader && !m.is_read)
        {
            m.is_read = true;
            flipped += 1;
        }
        flipped
    }

    /// Make the next call of `op` fail with [`StoreError::Unavailable`].
    pub async fn fail_next(&self, op: StoreOp) {
        self.inner.lock().await.failures.push_back(op);
    }

    pub async fn call_count(&self, op: StoreOp) -> usize {
        self.inner
            .lock()
            .await
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    pub async fn uploaded(&self) -> Vec<String> {
        self.inner.lock().await.uploads.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.lock().await.messages.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        let mut inner = self.inner.lock().await;
        inner.record(StoreOp::Conversations)?;
        let me = self.viewer;

        let mut rows: HashMap<UserId, ConversationSummary> = HashMap::new();
        for m in inner
            .messages
            .iter()
            .filter(|m| m.sender_id == me || m.receiver_id == me)
        {
            let other = m.counterpart_of(me);
            let row = rows.entry(other).or_insert_with(|| ConversationSummary {
                user_id: other,
                user_name: inner.names.get(&other).cloned().unwrap_or_default(),
                last_message: None,
                last_message_time: None,
                unread_count: 0,
            });
            if row.last_message_time.map_or(true, |t| m.created_at >= t) {
                row.last_message = Some(m.body.clone());
                row.last_message_time = Some(m.created_at);
            }
            if m.receiver_id == me && m.sender_id == other && !m.is_read {
                row.unread_count += 1;
            }
        }

        let mut summaries: Vec<ConversationSummary> = rows.into_values().collect();
        summaries.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(summaries)
    }

    async fn messages(&self, counterpart: UserId, page: PageRequest) -> Result<MessagePage> {
        let mut inner = self.inner.lock().await;
        inner.record(StoreOp::Messages)?;

        let mut thread: Vec<&Message> = inner
            .messages
            .iter()
            .filter(|m| m.is_between(self.viewer, counterpart))
            .collect();
        thread.sort_by_key(|m| (m.created_at, m.id));

        let limit = page.limit.max(1) as usize;
        let total = thread.len();
        let total_pages = total.div_ceil(limit) as u32;
        let current = page.page.max(1);

        // Page 1 is the newest slice; each further page reaches further back.
        let skip_newest = (current as usize - 1) * limit;
        let end = total.saturating_sub(skip_newest);
        let start = end.saturating_sub(limit);
        let data = thread[start..end].iter().map(|m| (*m).clone()).collect();

        Ok(MessagePage {
            data,
            pagination: Pagination {
                current_page: current,
                total_pages,
                has_next: current < total_pages,
            },
        })
    }

    async fn upload_file(&self, file: Upload) -> Result<UploadedFile> {
        let mut inner = self.inner.lock().await;
        inner.record(StoreOp::Upload)?;
        let url = format!("/uploads/{}-{}", inner.uploads.len() + 1, file.name);
        inner.uploads.push(url.clone());
        Ok(UploadedFile { url })
    }

    async fn delete_message(&self, id: MessageId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(StoreOp::DeleteMessage)?;
        let me = self.viewer;
        let before = inner.messages.len();
        inner
            .messages
            .retain(|m| !(m.id == id && (m.sender_id == me || m.receiver_id == me)));
        if inner.messages.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_conversation(&self, counterpart: UserId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(StoreOp::DeleteConversation)?;
        let me = self.viewer;
        inner.messages.retain(|m| !m.is_between(me, counterpart));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: UserId = UserId(1);
    const BOB: UserId = UserId(2);
    const EVE: UserId = UserId(3);

    #[tokio::test]
    async fn test_unread_count_counts_only_inbound_unread() {
        let store = MemoryStore::new(ME);
        store.set_name(BOB, "Bob").await;
        store.insert_message(BOB, ME, "one", None).await;
        store.insert_message(BOB, ME, "two", None).await;
        store.insert_message(ME, BOB, "reply", None).await;
        store.insert_message(EVE, BOB, "not mine", None).await;

        let rows = store.conversations().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, BOB);
        assert_eq!(rows[0].user_name, "Bob");
        assert_eq!(rows[0].unread_count, 2);
        assert_eq!(rows[0].last_message.as_deref(), Some("reply"));

        store.mark_read(ME, BOB).await;
        let rows = store.conversations().await.unwrap();
        assert_eq!(rows[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_pages_walk_backwards_oldest_first() {
        let store = MemoryStore::new(ME);
        for i in 0..45 {
            store.insert_message(BOB, ME, format!("m{i}"), None).await;
        }

        let first = store
            .messages(BOB, PageRequest { page: 1, limit: 20 })
            .await
            .unwrap();
        assert_eq!(first.data.len(), 20);
        assert_eq!(first.data[0].body, "m25");
        assert_eq!(first.data[19].body, "m44");
        assert_eq!(first.pagination.total_pages, 3);
        assert!(first.pagination.has_next);

        let last = store
            .messages(BOB, PageRequest { page: 3, limit: 20 })
            .await
            .unwrap();
        assert_eq!(last.data.len(), 5);
        assert_eq!(last.data[0].body, "m0");
        assert!(!last.pagination.has_next);

        let beyond = store
            .messages(BOB, PageRequest { page: 4, limit: 20 })
            .await
            .unwrap();
        assert!(beyond.data.is_empty());
    }

    #[tokio::test]
    async fn test_empty_conversation_has_no_next_page() {
        let store = MemoryStore::new(ME);
        let page = store
            .messages(BOB, PageRequest { page: 1, limit: 20 })
            .await
            .unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.pagination.total_pages, 0);
        assert!(!page.pagination.has_next);
    }

    #[tokio::test]
    async fn test_delete_scoped_to_viewer() {
        let store = MemoryStore::new(ME);
        let theirs = store.insert_message(BOB, EVE, "private", None).await;
        let mine = store.insert_message(BOB, ME, "hello", None).await;

        assert!(matches!(
            store.delete_message(theirs.id).await,
            Err(StoreError::NotFound)
        ));
        store.delete_message(mine.id).await.unwrap();
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_conversation_only_touches_pair() {
        let store = MemoryStore::new(ME);
        store.insert_message(BOB, ME, "a", None).await;
        store.insert_message(ME, BOB, "b", None).await;
        store.insert_message(EVE, ME, "c", None).await;

        store.delete_conversation(BOB).await.unwrap();
        let rows = store.conversations().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, EVE);
    }

    #[tokio::test]
    async fn test_scripted_failure_hits_once() {
        let store = MemoryStore::new(ME);
        store.fail_next(StoreOp::Conversations).await;

        assert!(store.conversations().await.is_err());
        assert!(store.conversations().await.is_ok());
        assert_eq!(store.call_count(StoreOp::Conversations).await, 2);
    }

    #[tokio::test]
    async fn test_views_share_data() {
        let mine = MemoryStore::new(ME);
        let bobs = mine.as_user(BOB);
        mine.insert_message(ME, BOB, "hey", None).await;

        let rows = bobs.conversations().await.unwrap();
        assert_eq!(rows[0].user_id, ME);
        assert_eq!(rows[0].unread_count, 1);
    }
}
