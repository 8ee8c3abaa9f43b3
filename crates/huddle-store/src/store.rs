use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use huddle_shared::{ConversationSummary, MessageId, MessagePage, UserId};

use crate::error::Result;

/// Page selector for history requests. Pages are 1-based, page 1 being the
/// most recent messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

/// A local file picked for attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl Upload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub url: String,
}

/// The message store as seen by the logged-in user. The viewer identity
/// is implied by the store's credentials.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// One summary row per counterpart, most recent first.
    async fn conversations(&self) -> Result<Vec<ConversationSummary>>;

    /// One page of the conversation with `counterpart`, oldest first.
    async fn messages(&self, counterpart: UserId, page: PageRequest) -> Result<MessagePage>;

    async fn upload_file(&self, file: Upload) -> Result<UploadedFile>;

    async fn delete_message(&self, id: MessageId) -> Result<()>;

    /// Delete every message exchanged with `counterpart`.
    async fn delete_conversation(&self, counterpart: UserId) -> Result<()>;
}
