//! Real-time messaging and call client core.
//!
//! Wires the channel ([`huddle_net`]), the message store
//! ([`huddle_store`]) and call negotiation ([`huddle_media`]) into one
//! client loop driven through [`ChatClient`].

pub mod calls;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod history;
pub mod messaging;
pub mod typing;

use tracing_subscriber::{fmt, EnvFilter};

pub use calls::CallStatus;
pub use client::{ChatClient, Snapshot};
pub use config::ClientConfig;
pub use error::{ClientError, ValidationError};
pub use events::UiEvent;
pub use messaging::Draft;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("huddle_client=debug,huddle_net=debug,huddle_store=info,huddle_media=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
