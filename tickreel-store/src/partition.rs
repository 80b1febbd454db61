use crate::{
    envelope::{EventEnvelope, EventKind, WriterId},
    error::StoreError,
};
use chrono::NaiveDate;
use derive_more::Constructor;
use std::{
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};
use tickreel_integration::fs::is_temp_file;

/// Directory under the store root holding every partition.
pub const EVENTS_DIR: &str = "events";

/// File extension of a JSON-lines partition file.
pub const PARTITION_EXTENSION: &str = "jsonl";

/// Format of the date partition directory name.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Grouping key of a partition: event kind & UTC date.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Constructor)]
pub struct PartitionKey {
    pub kind: EventKind,
    pub date: NaiveDate,
}

impl PartitionKey {
    pub fn of(envelope: &EventEnvelope) -> Self {
        Self::new(envelope.kind, envelope.date())
    }

    /// Directory holding this partition's files: `<root>/events/<kind>/<date>`.
    pub fn dir(&self, root: &Path) -> PathBuf {
        kind_dir(root, self.kind).join(self.date.format(DATE_FORMAT).to_string())
    }

    /// Path of the file written by `writer` for `batch` in this partition.
    pub fn file(&self, root: &Path, writer: &WriterId, batch: u64) -> PathBuf {
        self.dir(root).join(partition_file_name(writer, batch))
    }
}

/// Directory holding every date partition of `kind`: `<root>/events/<kind>`.
pub fn kind_dir(root: &Path, kind: EventKind) -> PathBuf {
    root.join(EVENTS_DIR).join(kind.as_str())
}

/// Name of a partition file: `part-<writer>-<batch>.jsonl`, batch zero-padded so names sort in
/// write order.
pub fn partition_file_name(writer: &WriterId, batch: u64) -> String {
    format!("part-{writer}-{batch:010}.{PARTITION_EXTENSION}")
}

/// Parse the `(writer, batch)` a partition file name was built from.
pub fn parse_partition_file_name(name: &str) -> Option<(&str, u64)> {
    let stem = name
        .strip_prefix("part-")?
        .strip_suffix(PARTITION_EXTENSION)?
        .strip_suffix('.')?;
    let (writer, batch) = stem.rsplit_once('-')?;
    Some((writer, batch.parse().ok()?))
}

/// Committed partition file discovered on disk.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PartitionFile {
    pub key: PartitionKey,
    pub writer: String,
    pub batch: u64,
    pub path: PathBuf,
}

/// Encode envelopes as one JSON object per line.
pub fn encode_partition<'a, Iter>(envelopes: Iter) -> Result<Vec<u8>, StoreError>
where
    Iter: IntoIterator<Item = &'a EventEnvelope>,
{
    let mut bytes = Vec::new();
    for envelope in envelopes {
        serde_json::to_writer(&mut bytes, envelope)
            .map_err(|error| StoreError::Serialise(error.to_string()))?;
        bytes.push(b'\n');
    }
    Ok(bytes)
}

/// Read every [`EventEnvelope`] of a partition file, in file order.
pub fn read_partition(path: &Path) -> Result<Vec<EventEnvelope>, StoreError> {
    let file = fs::File::open(path).map_err(|error| StoreError::io(path, error))?;

    let mut envelopes = Vec::new();
    for (line_index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|error| StoreError::io(path, error))?;
        if line.trim().is_empty() {
            continue;
        }

        let deserialise_error = |error: String| StoreError::Deserialise {
            path: path.to_path_buf(),
            line: line_index + 1,
            error,
        };

        let envelope = serde_json::from_str::<EventEnvelope>(&line)
            .map_err(|error| deserialise_error(error.to_string()))?;

        if envelope.kind != envelope.payload.kind() {
            return Err(deserialise_error(format!(
                "kind {} does not match payload kind {}",
                envelope.kind,
                envelope.payload.kind()
            )));
        }

        envelopes.push(envelope);
    }

    Ok(envelopes)
}

/// Date partitions of `kind` present under `root`, sorted ascending.
pub fn list_dates(root: &Path, kind: EventKind) -> Result<Vec<(NaiveDate, PathBuf)>, StoreError> {
    let mut dates = read_dir_paths(&kind_dir(root, kind))?
        .into_iter()
        .filter(|path| path.is_dir())
        .filter_map(|path| {
            let date = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| NaiveDate::parse_from_str(name, DATE_FORMAT).ok())?;
            Some((date, path))
        })
        .collect::<Vec<_>>();

    dates.sort();
    Ok(dates)
}

/// Every committed partition file of the provided kinds within the inclusive date range, sorted
/// by partition key then writer & batch.
///
/// In-flight temporary files and unrecognised names are skipped.
pub fn list_partition_files(
    root: &Path,
    kinds: &[EventKind],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<PartitionFile>, StoreError> {
    let mut files = Vec::new();

    for &kind in kinds {
        for (date, dir) in list_dates(root, kind)? {
            if start.is_some_and(|start| date < start) || end.is_some_and(|end| date > end) {
                continue;
            }

            for path in read_dir_paths(&dir)? {
                if is_temp_file(&path) || !path.is_file() {
                    continue;
                }

                let Some((writer, batch)) = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(parse_partition_file_name)
                else {
                    continue;
                };

                files.push(PartitionFile {
                    key: PartitionKey::new(kind, date),
                    writer: writer.to_string(),
                    batch,
                    path: path.clone(),
                });
            }
        }
    }

    files.sort();
    Ok(files)
}

fn read_dir_paths(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    fs::read_dir(dir)
        .map_err(|error| StoreError::io(dir, error))?
        .map(|entry| {
            entry
                .map(|entry| entry.path())
                .map_err(|error| StoreError::io(dir, error))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partition_file_name() {
        struct TestCase {
            input: &'static str,
            expected: Option<(&'static str, u64)>,
        }

        let cases = vec![
            // TC0: simple writer
            TestCase {
                input: "part-capture-0000000007.jsonl",
                expected: Some(("capture", 7)),
            },
            // TC1: writer containing dashes
            TestCase {
                input: "part-capture-eu-1-0000000012.jsonl",
                expected: Some(("capture-eu-1", 12)),
            },
            // TC2: missing batch
            TestCase {
                input: "part-capture.jsonl",
                expected: None,
            },
            // TC3: wrong extension
            TestCase {
                input: "part-capture-0000000001.json",
                expected: None,
            },
            // TC4: temp file
            TestCase {
                input: ".tmp-part-capture-0000000001.jsonl",
                expected: None,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(
                parse_partition_file_name(test.input),
                test.expected,
                "TC{index} failed"
            );
        }
    }

    #[test]
    fn test_partition_file_name_round_trips() {
        let writer = WriterId::new("capture-eu");
        let name = partition_file_name(&writer, 42);
        assert_eq!(name, "part-capture-eu-0000000042.jsonl");
        assert_eq!(parse_partition_file_name(&name), Some(("capture-eu", 42)));
    }

    #[test]
    fn test_partition_key_dir_layout() {
        let key = PartitionKey::new(
            EventKind::PlayerAction,
            NaiveDate::from_ymd_opt(2025, 3, 9).unwrap(),
        );
        assert_eq!(
            key.dir(Path::new("/store")),
            PathBuf::from("/store/events/player_action/2025-03-09")
        );
    }
}
