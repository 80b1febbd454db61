use crate::{Feed, error::DataError, tick::Tick};
use std::fmt::Debug;

/// Live [`TickSource`] fed by a feed adapter through an unbounded channel.
pub mod live;

/// Recorded [`TickSource`] loaded from a JSON-lines recording, plus recording file helpers.
pub mod recording;

/// Ordered producer of normalised [`Tick`]s, from either a live feed or a stored recording.
///
/// The cursor model is positional: [`TickSource::position`] is the zero-based index of the tick
/// the next call to [`TickSource::next`] will yield. Rewinding one delivered tick is therefore
/// `seek(position - 2)` followed by `next()`.
pub trait TickSource
where
    Self: Debug + Send,
{
    /// Return the next [`Tick`], [`Feed::Finished`] once the source is exhausted, or
    /// [`Feed::Unhealthy`] if a live feed is temporarily unable to produce one.
    fn next(&mut self) -> Result<Feed<Tick>, DataError>;

    /// Reposition the cursor so the next call to [`TickSource::next`] yields tick `index`.
    fn seek(&mut self, index: usize) -> Result<(), DataError>;

    /// Total number of ticks, if known. Always `None` for live sources.
    fn length(&self) -> Option<usize>;

    /// Zero-based index of the tick the next call to [`TickSource::next`] will yield.
    fn position(&self) -> usize;
}

impl<T> TickSource for Box<T>
where
    T: TickSource + ?Sized,
{
    fn next(&mut self) -> Result<Feed<Tick>, DataError> {
        (**self).next()
    }

    fn seek(&mut self, index: usize) -> Result<(), DataError> {
        (**self).seek(index)
    }

    fn length(&self) -> Option<usize> {
        (**self).length()
    }

    fn position(&self) -> usize {
        (**self).position()
    }
}
