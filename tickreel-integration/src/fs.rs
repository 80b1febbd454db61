use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Prefix given to in-progress temporary files. Readers skip any file carrying it.
pub const TEMP_FILE_PREFIX: &str = ".tmp-";

/// Atomically replace the file at `path` with `bytes`.
///
/// The bytes are written to a sibling temporary file, fsync'd, then renamed into place, so a
/// concurrent reader observes either the previous file (or no file) or the complete new one.
/// The parent directory is fsync'd afterwards so the rename itself is durable.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let temp = temp_path(path)?;
    let result = write_and_sync(&temp, bytes).and_then(|_| fs::rename(&temp, path));

    if result.is_err() {
        // Best-effort removal, the original error is the one worth reporting
        let _ = fs::remove_file(&temp);
    }
    result?;

    sync_dir(parent)
}

/// Returns true if the file name marks an in-progress temporary file.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(TEMP_FILE_PREFIX))
}

fn temp_path(path: &Path) -> io::Result<PathBuf> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    Ok(path.with_file_name(format!("{TEMP_FILE_PREFIX}{name}")))
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_: &Path) -> io::Result<()> {
    // Directory handles cannot be fsync'd on this platform
    Ok(())
}
