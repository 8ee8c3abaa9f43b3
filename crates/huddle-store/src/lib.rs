//! # huddle-store
//!
//! Client for the external message store: conversation aggregation,
//! paginated history, attachment upload and deletion.
//!
//! [`MessageStore`] is the seam the client depends on. [`HttpStore`] talks
//! to the REST endpoints; [`MemoryStore`] keeps everything in process and
//! backs tests and offline demos.

pub mod http;
pub mod memory;
pub mod store;

mod error;

pub use error::{Result, StoreError};
pub use http::HttpStore;
pub use memory::{MemoryStore, StoreOp};
pub use store::{MessageStore, PageRequest, Upload, UploadedFile};
