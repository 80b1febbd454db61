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
#![allow(clippy::type_complexity)]

//! # Tickreel-Integration
//! Low-level plumbing shared by every Tickreel crate.
//!
//! Tickreel moves ticks, state updates and durable envelopes between threads: a live feed thread,
//! a playback thread, the recorder flush thread and whatever UI sits on the other side of a
//! state observer. This crate holds the small, dependency-light pieces those hand-offs share:
//! - **Channels**: a [`Tx`](channel::Tx) abstraction over transmitters, plus
//!   [`ChannelTxDroppable`](channel::ChannelTxDroppable) which quietly disables itself once the
//!   receiver goes away.
//! - **Snapshots**: [`SnapUpdates`](snapshot::SnapUpdates) for
//!   "current value + stream of changes" subscriptions.
//! - **Markers**: [`Terminal`] & [`Unrecoverable`].

/// Defines a trait [`Tx`](channel::Tx) abstraction over different channel kinds, as well as
/// other channel utilities.
///
/// eg/ `UnboundedTx`, `ChannelTxDroppable`, etc.
pub mod channel;

/// Snapshot wrappers used when a subscriber needs the current value before any updates.
pub mod snapshot;

/// Crash-safe file replacement (temp file, fsync, rename) used by every on-disk writer.
pub mod fs;

/// Determines if something is considered "unrecoverable", such as an unrecoverable error.
///
/// Note that the meaning of [`Unrecoverable`] may vary depending on the context.
pub trait Unrecoverable {
    fn is_unrecoverable(&self) -> bool;
}

/// Trait that communicates if something is terminal (eg/ requires shutdown or restart).
pub trait Terminal {
    fn is_terminal(&self) -> bool;
}
