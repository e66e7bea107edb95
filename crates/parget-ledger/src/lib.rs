//! Progress ledger for resumable ranged downloads.
//!
//! A ledger lives next to the output file (`<output>.db`) and records:
//! - the size, block size and modification tag of the remote resource,
//! - how many bytes of each range have reached the payload file.
//!
//! Opening a ledger whose metadata no longer matches the remote resource
//! fails with [`LedgerError::Mismatch`] instead of silently mixing content.

mod error;
mod ledger;
mod metadata;
mod writer;

pub use error::{LedgerError, Result};
pub use ledger::{Ledger, Validation};
pub use metadata::Metadata;
