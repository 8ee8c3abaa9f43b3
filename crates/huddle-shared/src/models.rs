//! Message and conversation models as the message store hands them out.
//!
//! The store speaks a flat JSON record (`message_id`, `sender_id`,
//! `attachment_url`, ...). [`Message`] keeps the attachment grouped and
//! converts through [`MessageRecord`] on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A file attached to a message after it was uploaded to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub mime_type: String,
    /// Original file name as picked by the sender.
    pub name: String,
}

/// A single direct message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "MessageRecord", into = "MessageRecord")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// May be empty for attachment-only messages.
    pub body: String,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

impl Message {
    /// The other participant of this message, seen from `me`.
    pub fn counterpart_of(&self, me: UserId) -> UserId {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    /// Whether this message belongs to the conversation between `me` and `other`.
    pub fn is_between(&self, me: UserId, other: UserId) -> bool {
        (self.sender_id == me && self.receiver_id == other)
            || (self.sender_id == other && self.receiver_id == me)
    }
}

/// Flat wire shape of a message record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl From<MessageRecord> for Message {
    fn from(r: MessageRecord) -> Self {
        let attachment = r.attachment_url.map(|url| Attachment {
            url,
            mime_type: r
                .attachment_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            name: r.attachment_name.unwrap_or_default(),
        });
        Self {
            id: r.message_id,
            sender_id: r.sender_id,
            receiver_id: r.receiver_id,
            body: r.message.unwrap_or_default(),
            attachment,
            created_at: r.created_at,
            is_read: r.is_read,
        }
    }
}

impl From<Message> for MessageRecord {
    fn from(m: Message) -> Self {
        let (attachment_url, attachment_type, attachment_name) = match m.attachment {
            Some(a) => (Some(a.url), Some(a.mime_type), Some(a.name)),
            None => (None, None, None),
        };
        Self {
            message_id: m.id,
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            message: Some(m.body),
            attachment_url,
            attachment_type,
            attachment_name,
            created_at: m.created_at,
            is_read: m.is_read,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation summary
// ---------------------------------------------------------------------------

/// One row of the conversation list: the latest message exchanged with a
/// counterpart and how many of their messages are still unread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub user_id: UserId,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// History pages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub has_next: bool,
}

impl Pagination {
    pub fn first() -> Self {
        Self {
            current_page: 1,
            total_pages: 1,
            has_next: false,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::first()
    }
}

/// One page of a conversation, oldest message first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePage {
    pub data: Vec<Message>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_from_flat_record() {
        let json = r#"{
            "message_id": 7,
            "sender_id": 1,
            "receiver_id": 2,
            "message": "",
            "attachment_url": "/uploads/a.pdf",
            "attachment_type": "application/pdf",
            "attachment_name": "a.pdf",
            "created_at": "2024-05-01T10:00:00Z",
            "is_read": false
        }"#;

        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, MessageId(7));
        assert_eq!(msg.body, "");
        let attachment = msg.attachment.unwrap();
        assert_eq!(attachment.name, "a.pdf");
        assert_eq!(attachment.mime_type, "application/pdf");
    }

    #[test]
    fn test_message_without_attachment_omits_fields() {
        let msg = Message {
            id: MessageId(1),
            sender_id: UserId(1),
            receiver_id: UserId(42),
            body: "hi".into(),
            attachment: None,
            created_at: Utc::now(),
            is_read: false,
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["message"], "hi");
        assert!(value.get("attachment_url").is_none());
    }

    #[test]
    fn test_counterpart_of() {
        let msg = Message {
            id: MessageId(1),
            sender_id: UserId(1),
            receiver_id: UserId(42),
            body: "hi".into(),
            attachment: None,
            created_at: Utc::now(),
            is_read: false,
        };

        assert_eq!(msg.counterpart_of(UserId(1)), UserId(42));
        assert_eq!(msg.counterpart_of(UserId(42)), UserId(1));
        assert!(msg.is_between(UserId(42), UserId(1)));
        assert!(!msg.is_between(UserId(42), UserId(3)));
    }

    #[test]
    fn test_pagination_camel_case() {
        let json = r#"{"currentPage":2,"totalPages":5,"hasNext":true}"#;
        let p: Pagination = serde_json::from_str(json).unwrap();
        assert_eq!(p.current_page, 2);
        assert_eq!(p.total_pages, 5);
        assert!(p.has_next);
    }
}
