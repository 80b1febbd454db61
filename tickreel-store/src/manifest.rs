use crate::{
    envelope::{EpisodeId, Sequence, WriterId},
    error::StoreError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tickreel_integration::fs::write_atomic;

/// File name of the manifest at the store root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Store manifest: schema version plus, per writer, the last flushed batch & last flushed
/// [`Sequence`] of every episode it has written.
///
/// Maps are ordered so the serialised manifest is deterministic.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub writers: BTreeMap<WriterId, WriterManifest>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            writers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct WriterManifest {
    pub last_batch: u64,
    pub last_flush: Option<DateTime<Utc>>,
    pub episodes: BTreeMap<EpisodeId, Sequence>,
}

impl Manifest {
    pub fn path(root: &Path) -> PathBuf {
        root.join(MANIFEST_FILE)
    }

    /// Load the manifest under `root`, or a fresh one if the store has never been flushed.
    pub fn load(root: &Path) -> Result<Self, StoreError> {
        let path = Self::path(root);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(error) => return Err(StoreError::io(path, error)),
        };

        let manifest = serde_json::from_slice::<Self>(&bytes).map_err(|error| {
            StoreError::Deserialise {
                path: path.clone(),
                line: error.line(),
                error: error.to_string(),
            }
        })?;

        if manifest.schema_version != SCHEMA_VERSION {
            return Err(StoreError::ManifestSchema {
                path,
                found: manifest.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        Ok(manifest)
    }

    /// Atomically replace the manifest under `root`.
    pub fn store(&self, root: &Path) -> Result<(), StoreError> {
        let path = Self::path(root);
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|error| StoreError::Serialise(error.to_string()))?;
        write_atomic(&path, &bytes).map_err(|error| StoreError::io(path, error))
    }

    pub fn writer(&self, writer: &WriterId) -> Option<&WriterManifest> {
        self.writers.get(writer)
    }

    pub fn writer_mut(&mut self, writer: &WriterId) -> &mut WriterManifest {
        self.writers.entry(writer.clone()).or_default()
    }
}

impl WriterManifest {
    /// Record that `sequence` of `episode` is durable, never moving a sequence backwards.
    pub fn advance(&mut self, episode: &EpisodeId, sequence: Sequence) {
        self.episodes
            .entry(episode.clone())
            .and_modify(|last| *last = (*last).max(sequence))
            .or_insert(sequence);
    }
}
