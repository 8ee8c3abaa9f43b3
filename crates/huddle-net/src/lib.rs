// Real-time channel layer: one persistent, tenant-scoped connection per session.

pub mod connection;
pub mod error;
pub mod presence;
pub mod transport;

pub use connection::{ChannelNotification, ConnectionConfig, ConnectionManager, ReconnectPolicy};
pub use error::TransportError;
pub use presence::{ConnectionId, PresenceRegistry, PresenceTracker};
pub use transport::{ConnectTarget, Connector, Link, MemoryConnector, MemoryPeer, MemoryServer, WsConnector};
