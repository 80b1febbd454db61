use std::path::PathBuf;
use thiserror::Error;

/// All errors generated in `tickreel-data`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
pub enum DataError {
    #[error("invalid identifier {id:?}: {reason}")]
    InvalidIdentifier { id: String, reason: &'static str },

    #[error("identifier {id:?} resolves to {path:?} which escapes root {root:?}")]
    PathEscapesRoot {
        id: String,
        path: PathBuf,
        root: PathBuf,
    },

    #[error("recording {id:?} not found at {path:?}")]
    RecordingNotFound { id: String, path: PathBuf },

    #[error("I/O error at {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("failed to deserialise tick at {path:?} line {line}: {error}")]
    Deserialise {
        path: PathBuf,
        line: usize,
        error: String,
    },

    #[error("failed to serialise tick: {0}")]
    Serialise(String),

    #[error("tick source does not support seeking")]
    SeekUnsupported,

    #[error("seek index {index} out of range for source of length {length}")]
    SeekOutOfRange { index: usize, length: usize },
}

impl DataError {
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error: error.to_string(),
        }
    }

    /// Determine if an error originates from the filesystem rather than from caller input.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_io(&self) -> bool {
        match self {
            DataError::Io { .. } | DataError::Deserialise { .. } => true,
            _ => false,
        }
    }
}
