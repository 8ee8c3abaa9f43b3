use thiserror::Error;

use huddle_media::{CallError, MediaError};
use huddle_net::TransportError;
use huddle_store::StoreError;

/// Rejected before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is empty: type something or attach a file")]
    EmptyMessage,

    #[error("No conversation selected")]
    NoConversationSelected,

    #[error("Attachment too large: {size} bytes (max {max})")]
    AttachmentTooLarge { size: usize, max: usize },
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Client has shut down")]
    Closed,
}

impl ClientError {
    /// Text to show the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(e) => e.to_string(),
            ClientError::Transport(_) => {
                "You are offline. The message was not sent; try again once reconnected.".to_string()
            }
            ClientError::Call(CallError::Media(e)) => match e {
                MediaError::PermissionDenied(_) => {
                    "Camera, microphone or screen access was denied.".to_string()
                }
                MediaError::DeviceUnavailable(_) => {
                    "No camera or microphone is available.".to_string()
                }
                MediaError::PeerConnection(_) => "Could not set up the call.".to_string(),
            },
            ClientError::Call(CallError::Negotiation(_)) => "Could not set up the call.".to_string(),
            ClientError::Call(e) => e.to_string(),
            ClientError::Store(StoreError::NotFound) => {
                "That message or conversation no longer exists.".to_string()
            }
            ClientError::Store(_) => {
                "The message service is unavailable. Please try again.".to_string()
            }
            ClientError::Closed => "The chat client has stopped.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_is_shown_verbatim() {
        let err = ClientError::from(ValidationError::AttachmentTooLarge {
            size: 50 * 1024 * 1024,
            max: 10 * 1024 * 1024,
        });
        assert_eq!(
            err.user_message(),
            "Attachment too large: 52428800 bytes (max 10485760)"
        );
    }

    #[test]
    fn test_media_errors_are_humanized() {
        let err = ClientError::from(CallError::Media(MediaError::PermissionDenied(
            "Video access denied".into(),
        )));
        assert!(err.user_message().contains("denied"));
        assert!(!err.user_message().contains("Video"));
    }

    #[test]
    fn test_busy_is_shown_as_is() {
        let err = ClientError::from(CallError::Busy);
        assert_eq!(err.user_message(), "Another call is already in progress");
    }
}
