use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported output path: {0:?}")]
    InvalidOutput(PathBuf),

    #[error("failed to write {path:?}: {source}")]
    Write {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read {path:?}: {source}")]
    Read {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("failed to rename {from:?} to {to:?}: {source}")]
    Rename {
        from:   PathBuf,
        to:     PathBuf,
        source: std::io::Error,
    },

    #[error("failed to remove {path:?}: {source}")]
    Remove {
        path:   PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
