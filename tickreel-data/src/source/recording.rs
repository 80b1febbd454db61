use crate::{
    Feed,
    error::DataError,
    identifier::{resolve_within, validate_identifier},
    source::TickSource,
    tick::Tick,
};
use std::{
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};
use tickreel_integration::fs::{is_temp_file, write_atomic};
use tracing::{debug, info};

/// File extension of a JSON-lines tick recording.
pub const RECORDING_EXTENSION: &str = "jsonl";

fn recording_file_name(session_id: &str) -> String {
    format!("{session_id}.{RECORDING_EXTENSION}")
}

/// Recorded [`TickSource`] that replays an in-memory sequence of [`Tick`]s.
///
/// Recordings live directly inside a configured recordings root as
/// `<root>/<session_id>.jsonl`, one serialised [`Tick`] per line.
#[derive(Debug, Clone)]
pub struct FileRecordingSource {
    session_id: String,
    path: Option<PathBuf>,
    ticks: Vec<Tick>,
    cursor: usize,
}

impl FileRecordingSource {
    /// Open the recording of `session_id` inside `root`.
    ///
    /// The identifier is validated, and the resolved path verified to remain inside `root`, before
    /// any file is opened.
    pub fn open(root: impl AsRef<Path>, session_id: &str) -> Result<Self, DataError> {
        let session_id = validate_identifier(session_id)?;
        let path = resolve_within(root.as_ref(), session_id, &recording_file_name(session_id))?;

        if !path.is_file() {
            return Err(DataError::RecordingNotFound {
                id: session_id.to_string(),
                path,
            });
        }

        let ticks = read_ticks(&path)?;

        info!(
            session_id,
            path = %path.display(),
            ticks = ticks.len(),
            "FileRecordingSource opened recording"
        );

        Ok(Self {
            session_id: session_id.to_string(),
            path: Some(path),
            ticks,
            cursor: 0,
        })
    }

    /// Construct a [`FileRecordingSource`] from ticks already in memory (eg/ an episode read
    /// back from the event store).
    pub fn from_ticks(session_id: impl Into<String>, ticks: Vec<Tick>) -> Self {
        Self {
            session_id: session_id.into(),
            path: None,
            ticks,
            cursor: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Path the recording was loaded from, `None` if it was built in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }
}

impl TickSource for FileRecordingSource {
    fn next(&mut self) -> Result<Feed<Tick>, DataError> {
        match self.ticks.get(self.cursor) {
            Some(tick) => {
                self.cursor += 1;
                Ok(Feed::Next(tick.clone()))
            }
            None => Ok(Feed::Finished),
        }
    }

    fn seek(&mut self, index: usize) -> Result<(), DataError> {
        if index > self.ticks.len() {
            return Err(DataError::SeekOutOfRange {
                index,
                length: self.ticks.len(),
            });
        }

        debug!(session_id = %self.session_id, from = self.cursor, to = index, "FileRecordingSource seek");
        self.cursor = index;
        Ok(())
    }

    fn length(&self) -> Option<usize> {
        Some(self.ticks.len())
    }

    fn position(&self) -> usize {
        self.cursor
    }
}

fn read_ticks(path: &Path) -> Result<Vec<Tick>, DataError> {
    let file = fs::File::open(path).map_err(|error| DataError::io(path, error))?;

    BufReader::new(file)
        .lines()
        .enumerate()
        .filter_map(|(line_index, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(serde_json::from_str::<Tick>(&line).map_err(|error| {
                DataError::Deserialise {
                    path: path.to_path_buf(),
                    line: line_index + 1,
                    error: error.to_string(),
                }
            })),
            Err(error) => Some(Err(DataError::io(path, error))),
        })
        .collect()
}

/// Atomically write `ticks` as the recording of `session_id` inside `root`.
///
/// Returns the path of the written recording.
pub fn write_recording(
    root: impl AsRef<Path>,
    session_id: &str,
    ticks: &[Tick],
) -> Result<PathBuf, DataError> {
    let root = root.as_ref();
    let session_id = validate_identifier(session_id)?;

    fs::create_dir_all(root).map_err(|error| DataError::io(root, error))?;
    let path = resolve_within(root, session_id, &recording_file_name(session_id))?;

    let mut bytes = Vec::with_capacity(ticks.len() * 96);
    for tick in ticks {
        serde_json::to_writer(&mut bytes, tick)
            .map_err(|error| DataError::Serialise(error.to_string()))?;
        bytes.push(b'\n');
    }

    write_atomic(&path, &bytes).map_err(|error| DataError::io(&path, error))?;

    info!(
        session_id,
        path = %path.display(),
        ticks = ticks.len(),
        "wrote recording"
    );

    Ok(path)
}

/// List the session ids of every recording inside `root`, sorted.
///
/// Files that are not recordings, in-flight temporary files and names that would not pass
/// identifier validation are skipped. A missing root yields an empty list.
pub fn list_recordings(root: impl AsRef<Path>) -> Result<Vec<String>, DataError> {
    let root = root.as_ref();

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(DataError::io(root, error)),
    };

    let mut session_ids = Vec::new();
    for entry in entries {
        let path = entry.map_err(|error| DataError::io(root, error))?.path();

        if is_temp_file(&path)
            || !path.is_file()
            || path.extension().and_then(|ext| ext.to_str()) != Some(RECORDING_EXTENSION)
        {
            continue;
        }

        if let Some(session_id) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| validate_identifier(stem).is_ok())
        {
            session_ids.push(session_id.to_string());
        }
    }

    session_ids.sort();
    Ok(session_ids)
}
