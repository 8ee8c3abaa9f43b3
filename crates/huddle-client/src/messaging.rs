//! Outgoing message validation and payload composition.

use huddle_shared::protocol::OutgoingMessage;
use huddle_shared::UserId;
use huddle_store::{Upload, UploadedFile};

use crate::error::ValidationError;

/// What the user typed and picked, before anything touches the network.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub body: String,
    pub attachment: Option<Upload>,
}

impl Draft {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, file: Upload) -> Self {
        self.attachment = Some(file);
        self
    }
}

/// Check a draft against the open conversation. Returns the receiver.
pub fn validate(
    counterpart: Option<UserId>,
    draft: &Draft,
    max_upload: usize,
) -> Result<UserId, ValidationError> {
    let receiver = counterpart.ok_or(ValidationError::NoConversationSelected)?;

    if draft.body.trim().is_empty() && draft.attachment.is_none() {
        return Err(ValidationError::EmptyMessage);
    }

    if let Some(ref file) = draft.attachment {
        if file.len() > max_upload {
            return Err(ValidationError::AttachmentTooLarge {
                size: file.len(),
                max: max_upload,
            });
        }
    }

    Ok(receiver)
}

/// Build the `send_message` payload. `uploaded` pairs the picked file with
/// the location the store gave it.
pub fn compose(
    receiver: UserId,
    body: &str,
    uploaded: Option<(&Upload, UploadedFile)>,
) -> OutgoingMessage {
    let (attachment_url, attachment_type, attachment_name) = match uploaded {
        Some((file, stored)) => (
            Some(stored.url),
            Some(file.mime_type.clone()),
            Some(file.name.clone()),
        ),
        None => (None, None, None),
    };
    OutgoingMessage {
        receiver_id: receiver,
        message: body.trim().to_string(),
        attachment_url,
        attachment_type,
        attachment_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::constants::MAX_UPLOAD_SIZE;

    const BOB: UserId = UserId(42);

    fn file(size: usize) -> Upload {
        Upload::new("report.pdf", "application/pdf", vec![0u8; size])
    }

    #[test]
    fn test_text_message() {
        let draft = Draft::text("  hi ");
        assert_eq!(validate(Some(BOB), &draft, MAX_UPLOAD_SIZE), Ok(BOB));

        let out = compose(BOB, &draft.body, None);
        assert_eq!(out.receiver_id, BOB);
        assert_eq!(out.message, "hi");
        assert!(out.attachment_url.is_none());
    }

    #[test]
    fn test_requires_counterpart() {
        assert_eq!(
            validate(None, &Draft::text("hi"), MAX_UPLOAD_SIZE),
            Err(ValidationError::NoConversationSelected)
        );
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(
            validate(Some(BOB), &Draft::text("   "), MAX_UPLOAD_SIZE),
            Err(ValidationError::EmptyMessage)
        );
    }

    #[test]
    fn test_attachment_only_is_allowed() {
        let draft = Draft::default().with_attachment(file(10));
        assert_eq!(validate(Some(BOB), &draft, MAX_UPLOAD_SIZE), Ok(BOB));

        let upload = draft.attachment.as_ref().unwrap();
        let out = compose(
            BOB,
            &draft.body,
            Some((upload, UploadedFile { url: "/uploads/1".into() })),
        );
        assert_eq!(out.message, "");
        assert_eq!(out.attachment_url.as_deref(), Some("/uploads/1"));
        assert_eq!(out.attachment_type.as_deref(), Some("application/pdf"));
        assert_eq!(out.attachment_name.as_deref(), Some("report.pdf"));
    }

    #[test]
    fn test_rejects_oversized_attachment() {
        let draft = Draft::default().with_attachment(file(MAX_UPLOAD_SIZE + 1));
        assert_eq!(
            validate(Some(BOB), &draft, MAX_UPLOAD_SIZE),
            Err(ValidationError::AttachmentTooLarge {
                size: MAX_UPLOAD_SIZE + 1,
                max: MAX_UPLOAD_SIZE,
            })
        );
    }
}
