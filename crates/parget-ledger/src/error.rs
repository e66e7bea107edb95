use std::path::PathBuf;

use thiserror::Error;

use crate::Metadata;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error(transparent)]
    Fs(#[from] parget_fs::Error),

    #[error("metadata not matched: stored {stored}, probed {probed}")]
    Mismatch { stored: Metadata, probed: Metadata },

    #[error("payload {path:?} has length {actual:?}, expected {expected}")]
    PayloadLength {
        path:     PathBuf,
        expected: u64,
        actual:   Option<u64>,
    },

    #[error("progress of range {id} went backwards: {previous} -> {next}")]
    Regressed { id: u64, previous: u64, next: u64 },

    #[error("corrupt progress record for range {id}")]
    CorruptRecord { id: u64 },

    #[error("progress writer failed: {0}")]
    Writer(String),

    #[error("ledger already closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, LedgerError>;
