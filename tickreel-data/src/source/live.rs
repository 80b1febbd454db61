use crate::{Feed, error::DataError, source::TickSource, tick::Tick};
use tickreel_integration::channel::{UnboundedRx, UnboundedTx, mpsc_unbounded};
use tracing::debug;

/// Construct a connected feed adapter [`UnboundedTx`] & [`LiveFeedSource`] pair.
///
/// The feed adapter thread sends each normalised [`Tick`] into the transmitter. Dropping every
/// transmitter ends the feed, which the [`LiveFeedSource`] reports as [`Feed::Finished`].
pub fn live_feed() -> (UnboundedTx<Tick>, LiveFeedSource) {
    let (tx, rx) = mpsc_unbounded();
    (tx, LiveFeedSource::new(rx))
}

/// Live [`TickSource`] of ticks pushed by a feed adapter.
///
/// [`TickSource::next`] blocks until the next tick arrives, so this must not be polled from an
/// async runtime thread.
#[derive(Debug)]
pub struct LiveFeedSource {
    rx: UnboundedRx<Tick>,
    delivered: usize,
}

impl LiveFeedSource {
    pub fn new(rx: UnboundedRx<Tick>) -> Self {
        Self { rx, delivered: 0 }
    }
}

impl TickSource for LiveFeedSource {
    fn next(&mut self) -> Result<Feed<Tick>, DataError> {
        match self.rx.recv_blocking() {
            Some(tick) => {
                self.delivered += 1;
                Ok(Feed::Next(tick))
            }
            None => {
                debug!(delivered = self.delivered, "LiveFeedSource feed adapter disconnected");
                Ok(Feed::Finished)
            }
        }
    }

    fn seek(&mut self, _: usize) -> Result<(), DataError> {
        Err(DataError::SeekUnsupported)
    }

    fn length(&self) -> Option<usize> {
        None
    }

    fn position(&self) -> usize {
        self.delivered
    }
}
