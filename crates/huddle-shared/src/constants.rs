/// Handshake / request header carrying the tenant identifier
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Inactivity window after which a typing indicator clears (milliseconds)
pub const TYPING_TIMEOUT_MS: u64 = 2_000;

/// Messages per history page
pub const HISTORY_PAGE_SIZE: u32 = 20;

/// Maximum attachment size accepted for upload (10 MiB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Coalescing window for conversation list refreshes after inbound messages (milliseconds)
pub const DIRECTORY_REFRESH_DEBOUNCE_MS: u64 = 100;

/// Default STUN server handed to peer connections
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
