use crate::{
    envelope::{EpisodeId, EventEnvelope, EventKind, EventPayload, Sequence, WriterId},
    error::StoreError,
    manifest::Manifest,
    partition::{PartitionKey, encode_partition, list_dates, list_partition_files, read_partition},
};
use chrono::{NaiveDate, Utc};
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tickreel_integration::{Unrecoverable, fs::write_atomic};
use tracing::{debug, error, info, warn};

/// [`Recorder`] configuration.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Store root directory, created if missing.
    pub root: PathBuf,

    /// Identifier naming this writer's partition files & manifest entry. Sanitised before use.
    pub writer_id: String,

    /// Buffered envelope count that triggers a flush.
    pub flush_max_envelopes: usize,

    /// Maximum time an envelope (or an amendment) stays only in memory.
    pub flush_interval_ms: u64,

    /// Consecutive failed flushes after which the writer stops.
    pub max_consecutive_failures: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/store"),
            writer_id: "tickreel".to_string(),
            flush_max_envelopes: 256,
            flush_interval_ms: 1_000,
            max_consecutive_failures: 3,
        }
    }
}

impl RecorderConfig {
    pub fn new_at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Point-in-time [`Recorder`] counters.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct RecorderStats {
    pub recorded: u64,
    pub flushed: u64,
    pub batches: u64,
    pub failed_flushes: u64,
    pub pending: usize,
    pub stopped: bool,
}

/// Single owner of the durable event store.
///
/// Producers call [`Recorder::publish`] / [`Recorder::record`], which only enqueue into an
/// in-memory buffer. A dedicated flush thread persists the buffer once either
/// `flush_max_envelopes` or `flush_interval_ms` is reached, writing each batch as immutable
/// partition files (temp file, fsync, rename) followed by the manifest.
///
/// Share between producers with an `Arc<Recorder>`; dropping the last handle without calling
/// [`Recorder::close`] performs a best-effort close.
#[derive(Debug)]
pub struct Recorder {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Shared {
    root: PathBuf,
    writer: WriterId,
    flush_max_envelopes: usize,
    flush_interval: Duration,
    max_consecutive_failures: u32,

    /// Lock order: `durable` before `buffer`. The `durable` lock is held across a whole
    /// drain-and-write so batches reach disk in the order they were recorded.
    durable: Mutex<Durable>,
    buffer: Mutex<Buffer>,
    wake: Condvar,

    stopped: AtomicBool,
    /// Set by the first [`Recorder::close`]; no new envelopes are accepted.
    closing: AtomicBool,
    /// Set once a close has flushed everything & persisted the manifest.
    closed: AtomicBool,
    counters: Counters,
}

#[derive(Debug, Default)]
struct Buffer {
    pending: VecDeque<EventEnvelope>,
    last_recorded: FnvHashMap<EpisodeId, Sequence>,
    last_flushed: FnvHashMap<EpisodeId, Sequence>,
    flush_requested: bool,
    shutdown: bool,
}

impl Buffer {
    fn position(&self, episode: &EpisodeId, sequence: Sequence) -> Option<usize> {
        self.pending
            .iter()
            .rposition(|envelope| envelope.sequence == sequence && &envelope.episode == episode)
    }
}

#[derive(Debug)]
struct Durable {
    manifest: Manifest,
    consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct Counters {
    recorded: AtomicU64,
    flushed: AtomicU64,
    batches: AtomicU64,
    failed_flushes: AtomicU64,
}

impl Recorder {
    /// Open the store at `config.root`, resuming batch & sequence counters from its manifest,
    /// and start the background flush thread.
    pub fn open(config: RecorderConfig) -> Result<Self, StoreError> {
        let writer = WriterId::new(&config.writer_id);
        if writer.as_str() != config.writer_id {
            warn!(
                requested = %config.writer_id,
                sanitised = %writer,
                "Recorder writer_id sanitised before use in partition file names"
            );
        }

        fs::create_dir_all(&config.root).map_err(|error| StoreError::io(&config.root, error))?;

        let mut manifest = Manifest::load(&config.root)?;
        recover_orphaned_batches(&config.root, &writer, &mut manifest)?;

        let flushed = manifest
            .writer(&writer)
            .map(|entry| {
                entry
                    .episodes
                    .iter()
                    .map(|(episode, sequence)| (episode.clone(), *sequence))
                    .collect::<FnvHashMap<_, _>>()
            })
            .unwrap_or_default();

        let shared = Arc::new(Shared {
            root: config.root.clone(),
            writer: writer.clone(),
            flush_max_envelopes: config.flush_max_envelopes.max(1),
            flush_interval: config.flush_interval(),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            durable: Mutex::new(Durable {
                manifest,
                consecutive_failures: 0,
            }),
            buffer: Mutex::new(Buffer {
                last_recorded: flushed.clone(),
                last_flushed: flushed,
                ..Buffer::default()
            }),
            wake: Condvar::new(),
            stopped: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let worker = thread::Builder::new()
            .name(format!("recorder-{writer}"))
            .spawn({
                let shared = Arc::clone(&shared);
                move || shared.run()
            })
            .map_err(|error| StoreError::io(&config.root, error))?;

        info!(
            root = %config.root.display(),
            writer = %writer,
            flush_max_envelopes = shared.flush_max_envelopes,
            flush_interval_ms = config.flush_interval_ms,
            "Recorder opened"
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn writer_id(&self) -> &WriterId {
        &self.shared.writer
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    /// Assign the next [`Sequence`] of `episode` and enqueue the payload.
    pub fn publish(
        &self,
        episode: &EpisodeId,
        payload: EventPayload,
    ) -> Result<Sequence, StoreError> {
        self.ensure_accepting()?;

        let mut buffer = self.shared.buffer.lock();
        let sequence = buffer
            .last_recorded
            .get(episode)
            .map(Sequence::next)
            .unwrap_or_default();

        let envelope = EventEnvelope::new(Utc::now(), episode.clone(), sequence, payload);
        self.shared.enqueue(&mut buffer, envelope)?;

        Ok(sequence)
    }

    /// Enqueue an already sequenced envelope.
    ///
    /// Rejects a sequence that does not strictly follow the last one recorded for its episode, and
    /// an envelope whose `kind` disagrees with its payload.
    pub fn record(&self, envelope: EventEnvelope) -> Result<(), StoreError> {
        self.ensure_accepting()?;
        let mut buffer = self.shared.buffer.lock();
        self.shared.enqueue(&mut buffer, envelope)
    }

    /// Apply a late correction to a buffered, not yet flushed, envelope and request an
    /// opportunistic flush so the amendment does not linger only in memory.
    pub fn amend<F>(
        &self,
        episode: &EpisodeId,
        sequence: Sequence,
        amendment: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(&mut EventPayload),
    {
        self.ensure_accepting()?;
        let shared = &self.shared;

        let mut buffer = shared.buffer.lock();
        let _durable = if buffer.position(episode, sequence).is_none() {
            // Target may belong to an in-flight batch, wait for that flush to settle
            drop(buffer);
            let durable = shared.durable.lock();
            buffer = shared.buffer.lock();
            Some(durable)
        } else {
            None
        };

        let Some(envelope) = buffer
            .position(episode, sequence)
            .and_then(|position| buffer.pending.get_mut(position))
        else {
            return Err(match buffer.last_flushed.get(episode) {
                Some(last) if sequence <= *last => StoreError::AmendmentTargetFlushed {
                    episode: episode.clone(),
                    sequence,
                },
                _ => StoreError::AmendmentTargetNotFound {
                    episode: episode.clone(),
                    sequence,
                },
            });
        };

        amendment(&mut envelope.payload);
        envelope.kind = envelope.payload.kind();

        buffer.flush_requested = true;
        shared.wake.notify_one();

        debug!(%episode, %sequence, "Recorder amended buffered envelope");
        Ok(())
    }

    /// Synchronously flush everything buffered, returning the number of envelopes persisted.
    ///
    /// Flushing an empty buffer is a no-op that creates no files.
    pub fn flush(&self) -> Result<usize, StoreError> {
        self.shared.flush()
    }

    /// Stop the flush thread, perform a final flush & persist the manifest.
    ///
    /// New envelopes are rejected from the first call onwards. If the final flush or manifest
    /// write fails the buffer is kept, and calling `close` again retries it. Closing an already
    /// closed [`Recorder`] succeeds without doing anything.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        self.shared.closing.store(true, Ordering::Release);
        self.shared.buffer.lock().shutdown = true;
        self.shared.wake.notify_all();

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!(writer = %self.shared.writer, "Recorder flush thread panicked");
            }
        }

        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(StoreError::WriterStopped);
        }

        self.shared.flush()?;

        let durable = self.shared.durable.lock();
        durable.manifest.store(&self.shared.root)?;
        drop(durable);

        self.shared.closed.store(true, Ordering::Release);
        info!(writer = %self.shared.writer, stats = ?self.stats(), "Recorder closed");
        Ok(())
    }

    /// Delete every date partition strictly older than `date`, returning how many were removed.
    pub fn prune_before(&self, date: NaiveDate) -> Result<usize, StoreError> {
        let _durable = self.shared.durable.lock();

        let mut removed = 0;
        for kind in EventKind::ALL {
            for (partition_date, dir) in list_dates(&self.shared.root, kind)? {
                if partition_date >= date {
                    break;
                }

                fs::remove_dir_all(&dir).map_err(|error| StoreError::io(&dir, error))?;
                removed += 1;

                info!(%kind, date = %partition_date, dir = %dir.display(), "Recorder pruned partition");
            }
        }

        Ok(removed)
    }

    pub fn stats(&self) -> RecorderStats {
        let counters = &self.shared.counters;
        RecorderStats {
            recorded: counters.recorded.load(Ordering::Relaxed),
            flushed: counters.flushed.load(Ordering::Relaxed),
            batches: counters.batches.load(Ordering::Relaxed),
            failed_flushes: counters.failed_flushes.load(Ordering::Relaxed),
            pending: self.shared.buffer.lock().pending.len(),
            stopped: self.shared.stopped.load(Ordering::Acquire),
        }
    }

    fn ensure_accepting(&self) -> Result<(), StoreError> {
        if self.shared.stopped.load(Ordering::Acquire) {
            Err(StoreError::WriterStopped)
        } else if self.shared.closing.load(Ordering::Acquire) {
            Err(StoreError::WriterClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }

        warn!(writer = %self.shared.writer, "Recorder dropped before a successful close, closing");
        if let Err(error) = self.close() {
            error!(writer = %self.shared.writer, %error, "Recorder best-effort close failed");
        }
    }
}

impl Shared {
    fn enqueue(&self, buffer: &mut Buffer, envelope: EventEnvelope) -> Result<(), StoreError> {
        let payload = envelope.payload.kind();
        if envelope.kind != payload {
            return Err(StoreError::KindMismatch {
                episode: envelope.episode,
                sequence: envelope.sequence,
                kind: envelope.kind,
                payload,
            });
        }

        if let Some(&last) = buffer.last_recorded.get(&envelope.episode) {
            if envelope.sequence <= last {
                return Err(StoreError::SequenceRegression {
                    episode: envelope.episode,
                    last,
                    received: envelope.sequence,
                });
            }
        }

        buffer
            .last_recorded
            .insert(envelope.episode.clone(), envelope.sequence);
        buffer.pending.push_back(envelope);
        self.counters.recorded.fetch_add(1, Ordering::Relaxed);

        if buffer.pending.len() >= self.flush_max_envelopes && !buffer.flush_requested {
            buffer.flush_requested = true;
            self.wake.notify_one();
        }

        Ok(())
    }

    fn run(self: Arc<Self>) {
        debug!(writer = %self.writer, "Recorder flush thread started");

        loop {
            {
                let mut buffer = self.buffer.lock();
                if !buffer.shutdown && !buffer.flush_requested {
                    self.wake.wait_for(&mut buffer, self.flush_interval);
                }
                if buffer.shutdown {
                    break;
                }
            }

            // Failures are logged by flush, only a fatal one ends the thread
            if let Err(error) = self.flush() {
                if error.is_unrecoverable() {
                    break;
                }
            }
        }

        debug!(writer = %self.writer, "Recorder flush thread stopped");
    }

    fn flush(&self) -> Result<usize, StoreError> {
        let mut durable = self.durable.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Err(StoreError::WriterStopped);
        }

        let batch = {
            let mut buffer = self.buffer.lock();
            buffer.flush_requested = false;
            buffer.pending.drain(..).collect::<Vec<_>>()
        };

        if batch.is_empty() {
            return Ok(0);
        }

        match durable.write_batch(&self.root, &self.writer, &batch) {
            Ok(batch_number) => {
                durable.consecutive_failures = 0;

                let mut buffer = self.buffer.lock();
                for envelope in &batch {
                    buffer
                        .last_flushed
                        .entry(envelope.episode.clone())
                        .and_modify(|last| *last = (*last).max(envelope.sequence))
                        .or_insert(envelope.sequence);
                }
                drop(buffer);

                self.counters
                    .flushed
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                self.counters.batches.fetch_add(1, Ordering::Relaxed);

                debug!(
                    writer = %self.writer,
                    batch = batch_number,
                    envelopes = batch.len(),
                    "Recorder flushed batch"
                );
                Ok(batch.len())
            }
            Err(error) => {
                let envelopes = batch.len();
                {
                    let mut buffer = self.buffer.lock();
                    for envelope in batch.into_iter().rev() {
                        buffer.pending.push_front(envelope);
                    }
                }

                durable.consecutive_failures += 1;
                self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                let fatal = durable.consecutive_failures >= self.max_consecutive_failures;

                let (path, error) = match error {
                    StoreError::Io { path, error } => (path, error),
                    other => (self.root.clone(), other.to_string()),
                };

                if fatal {
                    self.stop(&path, &error, durable.consecutive_failures);
                } else {
                    warn!(
                        writer = %self.writer,
                        path = %path.display(),
                        %error,
                        envelopes,
                        consecutive_failures = durable.consecutive_failures,
                        "Recorder flush failed, batch retained for retry"
                    );
                }

                Err(StoreError::FlushFailed { path, error, fatal })
            }
        }
    }

    /// Transition to stopped exactly once. Never re-enters itself or joins the flush thread.
    fn stop(&self, path: &Path, error: &str, consecutive_failures: u32) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let pending = {
            let mut buffer = self.buffer.lock();
            buffer.shutdown = true;
            buffer.pending.len()
        };
        self.wake.notify_all();

        error!(
            writer = %self.writer,
            path = %path.display(),
            %error,
            consecutive_failures,
            pending,
            "Recorder stopped after repeated flush failure"
        );
    }
}

impl Durable {
    /// Write `batch` as one partition file per [`PartitionKey`], then the manifest.
    ///
    /// On failure every partition file already written for this batch is removed, so a retry
    /// never duplicates envelopes.
    fn write_batch(
        &mut self,
        root: &Path,
        writer: &WriterId,
        batch: &[EventEnvelope],
    ) -> Result<u64, StoreError> {
        let partitions = batch
            .iter()
            .into_group_map_by(|envelope| PartitionKey::of(envelope));
        let keys = partitions.keys().copied().sorted().collect::<Vec<_>>();

        let mut batch_number = self
            .manifest
            .writer(writer)
            .map_or(0, |entry| entry.last_batch)
            + 1;
        while keys
            .iter()
            .any(|key| key.file(root, writer, batch_number).exists())
        {
            batch_number += 1;
        }

        let mut written = Vec::with_capacity(keys.len());
        let result = keys
            .iter()
            .try_for_each(|key| {
                let path = key.file(root, writer, batch_number);
                let envelopes = partitions.get(key).map(Vec::as_slice).unwrap_or_default();
                let bytes = encode_partition(envelopes.iter().copied())?;
                write_atomic(&path, &bytes).map_err(|error| StoreError::io(&path, error))?;
                written.push(path);
                Ok(())
            })
            .and_then(|_| {
                let mut manifest = self.manifest.clone();
                let entry = manifest.writer_mut(writer);
                entry.last_batch = batch_number;
                entry.last_flush = Some(Utc::now());
                for envelope in batch {
                    entry.advance(&envelope.episode, envelope.sequence);
                }
                manifest.store(root)?;
                self.manifest = manifest;
                Ok(())
            });

        if let Err(error) = result {
            for path in written {
                if let Err(remove_error) = fs::remove_file(&path) {
                    warn!(
                        path = %path.display(),
                        %remove_error,
                        "Recorder failed to remove partition of failed batch"
                    );
                }
            }
            return Err(error);
        }

        Ok(batch_number)
    }
}

/// Fold partition files this writer committed after its last manifest update (eg/ a crash
/// between the partition rename and the manifest write) back into the manifest.
fn recover_orphaned_batches(
    root: &Path,
    writer: &WriterId,
    manifest: &mut Manifest,
) -> Result<(), StoreError> {
    let last_batch = manifest.writer(writer).map_or(0, |entry| entry.last_batch);

    let orphans = list_partition_files(root, &EventKind::ALL, None, None)?
        .into_iter()
        .filter(|file| file.writer == writer.as_str() && file.batch > last_batch)
        .collect::<Vec<_>>();

    if orphans.is_empty() {
        return Ok(());
    }

    let entry = manifest.writer_mut(writer);
    for file in &orphans {
        for envelope in read_partition(&file.path)? {
            entry.advance(&envelope.episode, envelope.sequence);
        }
        entry.last_batch = entry.last_batch.max(file.batch);
    }

    warn!(
        writer = %writer,
        orphans = orphans.len(),
        last_batch = entry.last_batch,
        "Recorder recovered partitions committed after the last manifest update"
    );

    Ok(())
}
