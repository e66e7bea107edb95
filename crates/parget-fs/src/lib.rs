//! Filesystem side of a resumable range download.
//!
//! A run writes into a pre-allocated payload file next to the final output and
//! keeps its progress store beside it. Nothing here knows about HTTP or ranges;
//! the functions only guarantee that the payload has its full length before any
//! worker writes into it, and that the output appears in a single rename.
//!
//! ```text
//! <output>.tmp   payload, sized up front, written at arbitrary offsets
//! <output>.db    progress store directory
//! <output>       appears only after commit
//! ```

mod error;
mod paths;
mod payload;

pub use error::{Error, Result};
pub use paths::PayloadPaths;
pub use payload::{commit, payload_len, preallocate, remove_store};
