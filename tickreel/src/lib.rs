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

//! # Tickreel
//! Capture, observe & replay tick-structured round data.
//!
//! Tickreel sits between a normalised tick feed and whatever wants to look at it:
//! * **State**: the [`StateContainer`](state::StateContainer) owns the session aggregate (current
//!   tick & derived phase, position, cash, sidebet, bounded history & event log). Every mutator
//!   is atomic and observers are notified with an immutable snapshot once the lock is released.
//! * **Playback**: the [`PlaybackController`](playback::PlaybackController) drives a recorded
//!   [`TickSource`](tickreel_data::source::TickSource) into the same state container on a
//!   background thread, with play/pause/step/seek/speed controls.
//! * **Capture**: a [`CaptureSession`](capture::CaptureSession) applies live ticks & player
//!   actions to the state and publishes each of them to the
//!   [`Recorder`](tickreel_store::recorder::Recorder) of the durable event store.
//!
//! ## Example
//! Replay a recording at full speed and read back the final state.
//! ```
//! use rust_decimal::Decimal;
//! use std::{sync::Arc, time::Duration};
//! use tickreel::{
//!     playback::{PlaybackConfig, PlaybackController, PlaybackState},
//!     state::{StateConfig, StateContainer},
//! };
//! use tickreel_data::{
//!     source::recording::FileRecordingSource,
//!     tick::{PhaseSignals, Tick},
//! };
//!
//! let ticks = (1..=20)
//!     .map(|index| Tick::new(index, Decimal::from(index), PhaseSignals::round_active()))
//!     .collect();
//!
//! let state = Arc::new(StateContainer::new(StateConfig::default()));
//! let playback = PlaybackController::new(
//!     Arc::clone(&state),
//!     PlaybackConfig { base_interval_ms: 0, ..PlaybackConfig::default() },
//! );
//!
//! playback.load(FileRecordingSource::from_ticks("round-1", ticks)).unwrap();
//! playback.play().unwrap();
//! assert!(playback.wait_idle(Duration::from_secs(5)));
//!
//! assert_eq!(playback.state(), PlaybackState::Stopped);
//! assert_eq!(state.current().tick.as_ref().map(Tick::index), Some(20));
//! ```

/// Session state: [`StateContainer`](state::StateContainer), its aggregate & observers.
pub mod state;

/// Background playback of recorded ticks into the state.
pub mod playback;

/// Live capture of ticks & player actions into state and event store.
pub mod capture;

/// Serde deserialisable [`SystemConfig`](config::SystemConfig).
pub mod config;

/// All errors generated in `tickreel`.
pub mod error;

/// Tracing subscriber initialisation & playback log filtering.
pub mod logging;

/// Graceful shutdown traits.
pub mod shutdown;
