use crate::{
    envelope::{EpisodeId, EventEnvelope, EventKind},
    error::StoreError,
    partition::{PartitionFile, list_partition_files, read_partition},
};
use chrono::NaiveDate;
use itertools::Itertools;
use std::{
    collections::{BTreeSet, VecDeque},
    path::{Path, PathBuf},
};
use tickreel_data::tick::Tick;
use tracing::debug;

/// Windowed feature computation over an episode's ordered ticks.
pub mod feature;

pub use feature::FeatureRow;

/// Prunes which partitions & episodes a query scans.
///
/// Empty `kinds` means every kind. Dates are inclusive. `None` episodes means every episode.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct EpisodeFilter {
    pub kinds: Vec<EventKind>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub episodes: Option<Vec<EpisodeId>>,
}

impl EpisodeFilter {
    pub fn with_kinds<Kinds>(mut self, kinds: Kinds) -> Self
    where
        Kinds: IntoIterator<Item = EventKind>,
    {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_dates(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_episodes<Ids>(mut self, episodes: Ids) -> Self
    where
        Ids: IntoIterator<Item = EpisodeId>,
    {
        self.episodes = Some(episodes.into_iter().collect());
        self
    }

    fn kinds(&self) -> &[EventKind] {
        if self.kinds.is_empty() {
            &EventKind::ALL
        } else {
            &self.kinds
        }
    }

    fn includes(&self, episode: &EpisodeId) -> bool {
        self.episodes
            .as_ref()
            .is_none_or(|episodes| episodes.contains(episode))
    }
}

/// Ordered envelopes of one episode.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Episode {
    pub id: EpisodeId,
    pub envelopes: Vec<EventEnvelope>,
}

impl Episode {
    /// Ticks of the episode in sequence order.
    pub fn ticks(&self) -> Vec<Tick> {
        self.envelopes
            .iter()
            .filter_map(|envelope| envelope.payload.as_tick().cloned())
            .collect()
    }
}

/// Stateless, read-only view over committed partitions.
///
/// Every call opens its own read-only file handles & holds nothing between calls, so any number
/// of callers (and clones) may query concurrently, including while a
/// [`Recorder`](crate::recorder::Recorder) is writing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QueryLayer {
    root: PathBuf,
}

impl QueryLayer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every envelope of episode `id`, ordered by sequence.
    ///
    /// The identifier is validated before any file is opened.
    pub fn get_episode(&self, id: &str) -> Result<Vec<EventEnvelope>, StoreError> {
        let id = EpisodeId::new(id)?;
        let envelopes = self.read_episode(&id, &EpisodeFilter::default())?;

        if envelopes.is_empty() {
            return Err(StoreError::EpisodeNotFound(id));
        }

        Ok(envelopes)
    }

    /// Sorted, de-duplicated ids of every episode with at least one envelope matching `filter`.
    pub fn list_episodes(&self, filter: &EpisodeFilter) -> Result<Vec<EpisodeId>, StoreError> {
        let mut episodes = BTreeSet::new();

        for file in self.partitions(filter)? {
            for envelope in read_partition(&file.path)? {
                if filter.includes(&envelope.episode) {
                    episodes.insert(envelope.episode);
                }
            }
        }

        Ok(episodes.into_iter().collect())
    }

    /// Lazily yield every [`Episode`] matching `filter`.
    ///
    /// Nothing is read until the first call to `next`; each episode is read on demand. The
    /// iterator is finite, and restartable by cloning it before use or calling this again.
    pub fn iter_episodes(&self, filter: EpisodeFilter) -> EpisodeIter {
        EpisodeIter {
            query: self.clone(),
            filter,
            remaining: None,
        }
    }

    /// Ordered [`Tick`]s of episode `id`.
    pub fn episode_ticks(&self, id: &str) -> Result<Vec<Tick>, StoreError> {
        let id = EpisodeId::new(id)?;
        let filter = EpisodeFilter::default().with_kinds([EventKind::Tick]);
        let envelopes = self.read_episode(&id, &filter)?;

        if envelopes.is_empty() {
            return Err(StoreError::EpisodeNotFound(id));
        }

        Ok(envelopes
            .iter()
            .filter_map(|envelope| envelope.payload.as_tick().cloned())
            .collect())
    }

    /// One [`FeatureRow`] per tick of episode `id`, using a volatility window of `window`
    /// returns.
    pub fn compute_features(&self, id: &str, window: usize) -> Result<Vec<FeatureRow>, StoreError> {
        if window == 0 {
            return Err(StoreError::InvalidFeatureWindow);
        }

        let ticks = self.episode_ticks(id)?;
        Ok(feature::compute_features(&ticks, window))
    }

    fn partitions(&self, filter: &EpisodeFilter) -> Result<Vec<PartitionFile>, StoreError> {
        list_partition_files(&self.root, filter.kinds(), filter.start, filter.end)
    }

    fn read_episode(
        &self,
        id: &EpisodeId,
        filter: &EpisodeFilter,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        let files = self.partitions(filter)?;

        let mut envelopes = Vec::new();
        for file in &files {
            envelopes.extend(
                read_partition(&file.path)?
                    .into_iter()
                    .filter(|envelope| &envelope.episode == id),
            );
        }

        debug!(
            episode = %id,
            partitions = files.len(),
            envelopes = envelopes.len(),
            "QueryLayer read episode"
        );

        Ok(envelopes
            .into_iter()
            .sorted_by_key(|envelope| envelope.sequence)
            .collect())
    }
}

/// Lazy, finite iterator of [`Episode`]s produced by [`QueryLayer::iter_episodes`].
#[derive(Debug, Clone)]
pub struct EpisodeIter {
    query: QueryLayer,
    filter: EpisodeFilter,
    remaining: Option<VecDeque<EpisodeId>>,
}

impl Iterator for EpisodeIter {
    type Item = Result<Episode, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_none() {
            match self.query.list_episodes(&self.filter) {
                Ok(ids) => self.remaining = Some(ids.into()),
                Err(error) => {
                    self.remaining = Some(VecDeque::new());
                    return Some(Err(error));
                }
            }
        }

        let id = self.remaining.as_mut()?.pop_front()?;
        Some(
            self.query
                .read_episode(&id, &self.filter)
                .map(|envelopes| Episode { id, envelopes }),
        )
    }
}
