//! Error types for parget-fetch.

use std::io;
use std::path::PathBuf;

use parget_ledger::LedgerError;
use thiserror::Error;

use crate::size::ParseSizeError;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported output path: {0:?}")]
    InvalidOutput(PathBuf),

    #[error("output is a directory: {0:?}")]
    OutputIsDirectory(PathBuf),

    #[error("proxy only supports socks5, http or https, not {0:?}")]
    InvalidProxy(String),

    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    #[error("worker must be greater than 0, got {0}")]
    InvalidWorkers(usize),

    #[error("block size must be greater than 0")]
    InvalidBlock,

    #[error("invalid block size: {0}")]
    InvalidSize(#[from] ParseSizeError),

    #[error("server not supported: Accept-Ranges")]
    ServerUnsupported,

    #[error("probe failed with status {0}")]
    ProbeStatus(u16),

    #[error("malformed {name} header: {value:?}")]
    MalformedHeader { name: &'static str, value: String },

    #[error("expected 206 Partial Content, got {0}")]
    NotPartial(u16),

    #[error("range {id} records {progress} bytes, more than its length {len}")]
    ProgressOverflow { id: u64, progress: u64, len: u64 },

    #[error("ledger records range {id}, which is not part of the plan")]
    UnknownRange { id: u64 },

    #[error("range {id} incomplete: {progress}/{len}")]
    Incomplete { id: u64, progress: u64, len: u64 },

    #[error("downloaded {downloaded} bytes, expected {size}")]
    SizeMismatch { downloaded: u64, size: u64 },

    #[error("range {id} ended after {received} of {expected} bytes")]
    ShortRead { id: u64, received: u64, expected: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("payload I/O error at {path:?}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Fs(#[from] parget_fs::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("download cancelled")]
    Cancelled,
}

/// Coarse classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any network access.
    Config,
    /// The server does not speak range requests the way we need.
    Protocol,
    /// On-disk state cannot be trusted for this resource.
    Validation,
    /// Network failure mid-range; a later run resumes past durable bytes.
    Transport,
    /// Local storage failure.
    Resource,
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl { .. }
            | Self::InvalidOutput(_)
            | Self::OutputIsDirectory(_)
            | Self::InvalidProxy(_)
            | Self::InvalidHeader(_)
            | Self::InvalidWorkers(_)
            | Self::InvalidBlock
            | Self::InvalidSize(_) => ErrorKind::Config,
            Self::ServerUnsupported
            | Self::ProbeStatus(_)
            | Self::MalformedHeader { .. }
            | Self::NotPartial(_) => ErrorKind::Protocol,
            Self::ProgressOverflow { .. }
            | Self::UnknownRange { .. }
            | Self::Incomplete { .. }
            | Self::SizeMismatch { .. } => ErrorKind::Validation,
            Self::Ledger(e) => match e {
                LedgerError::Mismatch { .. }
                | LedgerError::PayloadLength { .. }
                | LedgerError::Regressed { .. }
                | LedgerError::CorruptRecord { .. } => ErrorKind::Validation,
                _ => ErrorKind::Resource,
            },
            Self::ShortRead { .. } | Self::Http(_) | Self::Stream(_) => ErrorKind::Transport,
            Self::Io { .. } | Self::Fs(_) | Self::Join(_) => ErrorKind::Resource,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_split_by_cause() {
        let mismatch = FetchError::from(LedgerError::Regressed {
            id:       1,
            previous: 2,
            next:     1,
        });
        assert_eq!(mismatch.kind(), ErrorKind::Validation);
        assert_eq!(FetchError::from(LedgerError::Closed).kind(), ErrorKind::Resource);
    }

    #[test]
    fn protocol_errors_are_not_transport() {
        assert_eq!(FetchError::ServerUnsupported.kind(), ErrorKind::Protocol);
        assert_eq!(FetchError::NotPartial(200).kind(), ErrorKind::Protocol);
        assert_eq!(
            FetchError::ShortRead {
                id:       1,
                received: 0,
                expected: 1,
            }
            .kind(),
            ErrorKind::Transport
        );
    }
}
