use crate::envelope::{EpisodeId, EventKind, Sequence};
use std::path::PathBuf;
use thiserror::Error;
use tickreel_data::error::DataError;
use tickreel_integration::Unrecoverable;

/// All errors generated in `tickreel-store`.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StoreError {
    #[error("identifier: {0}")]
    Identifier(#[from] DataError),

    #[error("episode {episode} sequence {received} does not follow last recorded sequence {last}")]
    SequenceRegression {
        episode: EpisodeId,
        last: Sequence,
        received: Sequence,
    },

    #[error("envelope {episode}/{sequence} has kind {kind} but carries a {payload} payload")]
    KindMismatch {
        episode: EpisodeId,
        sequence: Sequence,
        kind: EventKind,
        payload: EventKind,
    },

    #[error("amendment target {episode}/{sequence} was never recorded by this writer")]
    AmendmentTargetNotFound {
        episode: EpisodeId,
        sequence: Sequence,
    },

    #[error("amendment target {episode}/{sequence} has already been flushed & is immutable")]
    AmendmentTargetFlushed {
        episode: EpisodeId,
        sequence: Sequence,
    },

    #[error("episode {0} not found in store")]
    EpisodeNotFound(EpisodeId),

    #[error("feature window must be at least 1")]
    InvalidFeatureWindow,

    #[error("I/O error at {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("failed to serialise envelope: {0}")]
    Serialise(String),

    #[error("failed to deserialise {path:?} line {line}: {error}")]
    Deserialise {
        path: PathBuf,
        line: usize,
        error: String,
    },

    #[error("manifest {path:?} has schema version {found}, expected {expected}")]
    ManifestSchema {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("flush failed at {path:?}: {error} (fatal: {fatal})")]
    FlushFailed {
        path: PathBuf,
        error: String,
        fatal: bool,
    },

    #[error("recorder has stopped after repeated I/O failure, a new instance is required")]
    WriterStopped,

    #[error("recorder has been closed")]
    WriterClosed,
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error: error.to_string(),
        }
    }
}

impl Unrecoverable for StoreError {
    fn is_unrecoverable(&self) -> bool {
        match self {
            StoreError::WriterStopped => true,
            StoreError::FlushFailed { fatal, .. } => *fatal,
            _ => false,
        }
    }
}
