//! Gemini-compatible Files API for the ditto gateway.
//!
//! Uploaded attachments are either cached on local disk ([`filestore`]) and
//! inlined into generation requests ([`rewrite`]), or passed through to the
//! upstream provider with the uploading credential pinned per session
//! ([`gateway`], behind the `gateway` feature).

pub mod clock;
pub mod error;
pub mod filestore;
pub mod rewrite;
pub(crate) mod utils;

#[cfg(feature = "gateway")]
pub mod gateway;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, FilesError, Result};
pub use filestore::{FileRecord, FileState, FileStore, FileStoreConfig};
pub use rewrite::PayloadRewriter;
