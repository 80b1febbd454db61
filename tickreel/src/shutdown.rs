/// Synchronous graceful shutdown of a component that owns a background thread.
///
/// eg/ the [`PlaybackController`](crate::playback::PlaybackController) stopping & joining its
/// playback thread.
pub trait SyncShutdown {
    type Result;
    fn shutdown(&mut self) -> Self::Result;
}
