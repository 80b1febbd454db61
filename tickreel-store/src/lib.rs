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

//! # Tickreel-Store
//! Single-process, single-writer, local-disk event store for Tickreel episodes.
//!
//! * [`Recorder`](recorder::Recorder): the one component that owns the durable store. Producers
//!   publish [`EventEnvelope`](envelope::EventEnvelope)s into its in-memory buffer; a background
//!   thread flushes them as atomic, immutable partition files.
//! * [`QueryLayer`](query::QueryLayer): stateless read side that reconstructs episodes & derives
//!   features from committed partitions, never touching the write path.
//!
//! ## Layout
//! ```text
//! <root>/
//!   manifest.json
//!   events/<kind>/<YYYY-MM-DD>/part-<writer>-<batch>.jsonl
//! ```
//!
//! ## Example
//! ```
//! use tickreel_data::tick::{PhaseSignals, Tick};
//! use tickreel_store::{
//!     envelope::{EpisodeId, EventPayload},
//!     query::QueryLayer,
//!     recorder::{Recorder, RecorderConfig},
//! };
//! use rust_decimal::Decimal;
//!
//! let root = std::env::temp_dir().join(format!("tickreel-doc-{}", std::process::id()));
//! let recorder = Recorder::open(RecorderConfig::new_at(&root)).unwrap();
//!
//! let episode = EpisodeId::new("round-1").unwrap();
//! for index in 1..=3 {
//!     let tick = Tick::new(index, Decimal::from(index), PhaseSignals::round_active());
//!     recorder.publish(&episode, EventPayload::Tick(tick)).unwrap();
//! }
//! recorder.close().unwrap();
//!
//! let envelopes = QueryLayer::new(&root).get_episode("round-1").unwrap();
//! assert_eq!(envelopes.len(), 3);
//! # std::fs::remove_dir_all(&root).unwrap();
//! ```

/// All [`Error`](std::error::Error)s generated in Tickreel-Store.
pub mod error;

/// [`EventEnvelope`](envelope::EventEnvelope), its typed payloads & identifiers.
pub mod envelope;

/// Partition layout: where envelopes of a given kind & date live, and how partition files are
/// encoded and read.
pub mod partition;

/// Store [`Manifest`](manifest::Manifest) used for crash-recovery resumption.
pub mod manifest;

/// Buffered, crash-safe [`Recorder`](recorder::Recorder) that owns the durable store.
pub mod recorder;

/// Read-only [`QueryLayer`](query::QueryLayer) & feature computation.
pub mod query;
