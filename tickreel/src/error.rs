use crate::{playback::error::PlaybackError, state::error::StateError};
use std::path::PathBuf;
use thiserror::Error;
use tickreel_data::error::DataError;
use tickreel_store::{
    envelope::{EpisodeId, Sequence},
    error::StoreError,
};

/// All errors generated in `tickreel`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickreelError {
    #[error("data: {0}")]
    Data(#[from] DataError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("state: {0}")]
    State(#[from] StateError),

    #[error("playback: {0}")]
    Playback(#[from] PlaybackError),

    #[error("config {path:?}: {error}")]
    Config { path: PathBuf, error: String },

    #[error("envelope {sequence} of episode {episode} is not a player action")]
    NotPlayerAction {
        episode: EpisodeId,
        sequence: Sequence,
    },
}
