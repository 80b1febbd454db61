use crate::playback::PlaybackState;
use thiserror::Error;
use tickreel_data::error::DataError;

/// All errors generated by the [`PlaybackController`](super::PlaybackController).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("{operation} is invalid while playback is {state}")]
    InvalidState {
        operation: &'static str,
        state: PlaybackState,
    },

    #[error("{operation} must not be called while this thread is delivering a tick")]
    ReentrantCall { operation: &'static str },

    #[error("playback thread cannot join itself")]
    SelfJoin,

    #[error("previous playback thread has not finished shutting down")]
    PreviousRunActive,

    #[error("playback thread did not exit within {timeout_ms}ms")]
    JoinTimeout { timeout_ms: u64 },

    #[error("playback thread panicked")]
    ThreadPanicked,

    #[error("failed to spawn playback thread: {0}")]
    Spawn(String),

    #[error("no tick source loaded")]
    NoSource,

    #[error("speed {speed} outside permitted range [{min}, {max}]")]
    InvalidSpeed { speed: f64, min: f64, max: f64 },

    #[error("tick source: {0}")]
    Source(#[from] DataError),
}
