#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]

//! # Tickreel-Data
//! Normalised tick data model & tick sources.
//!
//! The feed adapter upstream of Tickreel decodes third-party wire messages into a normalised
//! `{tick_index, price, phase_signals}` record. This crate turns that record into an immutable
//! [`Tick`](tick::Tick), deriving its [`Phase`](tick::Phase) exactly once, and provides the
//! [`TickSource`](source::TickSource) abstraction that both live capture and replay pull ticks
//! from:
//! * [`LiveFeedSource`](source::live::LiveFeedSource): ticks pushed by a feed adapter thread.
//! * [`FileRecordingSource`](source::recording::FileRecordingSource): ticks loaded from a
//!   recording confined to a configured recordings root.
//!
//! ## Example
//! ```
//! use tickreel_data::{
//!     Feed,
//!     source::{TickSource, recording::FileRecordingSource},
//!     tick::{Phase, PhaseSignals, Tick},
//! };
//! use rust_decimal::Decimal;
//!
//! let ticks = (1..=3)
//!     .map(|index| Tick::new(index, Decimal::from(index), PhaseSignals::round_active()))
//!     .collect();
//!
//! let mut source = FileRecordingSource::from_ticks("demo", ticks);
//!
//! while let Feed::Next(tick) = source.next().unwrap() {
//!     assert_eq!(tick.phase(), Phase::Active);
//! }
//! ```

use serde::{Deserialize, Serialize};
use tickreel_integration::Terminal;

/// All [`Error`](std::error::Error)s generated in Tickreel-Data.
pub mod error;

/// [`Tick`](tick::Tick), [`PhaseSignals`](tick::PhaseSignals) & [`Phase`](tick::Phase) derivation.
pub mod tick;

/// [`TickSource`](source::TickSource) abstraction & its live/recording implementations.
pub mod source;

/// Validation & sanitisation of external identifiers before they are used to build paths.
pub mod identifier;

/// Communicates the state of a tick feed.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum Feed<Event> {
    Next(Event),
    Unhealthy,
    Finished,
}

impl<Event> Feed<Event> {
    pub fn map<F, O>(self, op: F) -> Feed<O>
    where
        F: FnOnce(Event) -> O,
    {
        match self {
            Feed::Next(event) => Feed::Next(op(event)),
            Feed::Unhealthy => Feed::Unhealthy,
            Feed::Finished => Feed::Finished,
        }
    }
}

impl<Event> Terminal for Feed<Event> {
    fn is_terminal(&self) -> bool {
        matches!(self, Feed::Finished)
    }
}
