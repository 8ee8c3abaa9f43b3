use huddle_media::{CallOutcome, CallPhase, IncomingCall};
use huddle_shared::{ConversationSummary, Pagination, UserId};

/// Notifications for the UI layer. Carry just enough to know what to
/// re-render; current state is read with `ChatClient::snapshot`.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Connected,
    Disconnected { reason: String },
    PresenceChanged { online: Vec<UserId> },
    ConversationOpened { counterpart: UserId },
    /// The open conversation's message list changed.
    MessagesChanged { counterpart: UserId },
    HistoryLoaded { counterpart: UserId, pagination: Pagination },
    ConversationsRefreshed { conversations: Vec<ConversationSummary> },
    TypingChanged { user: UserId, typing: bool },
    IncomingCall(IncomingCall),
    CallPhaseChanged(CallPhase),
    CallEnded(CallOutcome),
    /// A failure to surface to the user, already in human-readable form.
    Error(String),
}
