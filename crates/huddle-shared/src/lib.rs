//! Types and wire protocol shared by every huddle crate.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use models::{Attachment, ConversationSummary, Message, MessagePage, Pagination};
pub use protocol::{CallKind, ClientEvent, IceCandidate, SdpType, ServerEvent, SessionDescription};
pub use types::{MessageId, TenantId, User, UserId};
