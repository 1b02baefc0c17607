use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Default cap before an append log is rotated (bytes).
pub const DEFAULT_ROTATION_CAP_BYTES: u64 = 5 * 1024 * 1024;
/// Default number of rotated generations kept (`.1` .. `.N`).
pub const DEFAULT_RETENTION: usize = 5;

const READ_RETRIES: u32 = 3;
const READ_BACKOFF: Duration = Duration::from_millis(20);

/// Stateless helper for atomic single-file writes and size-bounded append
/// logs. Every contract, submission, and sidecar file in this crate goes
/// through here; nothing calls `std::fs::write` directly.
pub struct AtomicStore;

impl AtomicStore {
    /// Write `bytes` to `path` via stage-fsync-rename. On any failure the
    /// staged `.tmp` file is removed rather than left behind half-written.
    pub fn write(path: &Path, bytes: &[u8]) -> CoreResult<()> {
        let tmp_path = tmp_sibling(path);
        let result = (|| -> CoreResult<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(bytes)?;
            tmp.sync_all()?;
            fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    /// Read `path`, retrying briefly to tolerate a write that is mid-rename.
    /// A genuinely missing file returns `Ok(None)` rather than an error.
    pub fn read(path: &Path) -> CoreResult<Option<Vec<u8>>> {
        let mut last_err = None;
        for attempt in 0..READ_RETRIES {
            match fs::read(path) {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < READ_RETRIES {
                        thread::sleep(READ_BACKOFF);
                    }
                }
            }
        }
        Err(CoreError::resource(
            "atomic_store.read",
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    /// Append a newline-terminated record to a size-bounded log, rotating
    /// generations when the cap is exceeded. The newest rotation is never
    /// lost mid-append: rotation happens strictly before the triggering
    /// write is flushed to the fresh file.
    pub fn append(path: &Path, record: &[u8]) -> CoreResult<()> {
        Self::append_with_limits(path, record, DEFAULT_ROTATION_CAP_BYTES, DEFAULT_RETENTION)
    }

    pub fn append_with_limits(
        path: &Path,
        record: &[u8],
        cap_bytes: u64,
        retention: usize,
    ) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let current_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if current_size >= cap_bytes {
            rotate(path, retention)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(record)?;
        if !record.ends_with(b"\n") {
            file.write_all(b"\n")?;
        }
        file.sync_all()?;
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

fn rotated_path(path: &Path, generation: usize) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(format!(".{generation}"));
    PathBuf::from(os)
}

/// Shift `path.(N-1)` -> `path.N` down to `path.1`, dropping whatever was
/// at the oldest retained generation, then move `path` itself to `path.1`.
fn rotate(path: &Path, retention: usize) -> CoreResult<()> {
    if retention == 0 {
        // Nothing retained: just truncate by removing the current file.
        let _ = fs::remove_file(path);
        return Ok(());
    }

    let oldest = rotated_path(path, retention);
    let _ = fs::remove_file(&oldest);

    for generation in (1..retention).rev() {
        let from = rotated_path(path, generation);
        if from.exists() {
            let to = rotated_path(path, generation + 1);
            fs::rename(&from, &to)?;
        }
    }

    if path.exists() {
        fs::rename(path, rotated_path(path, 1))?;
    }
    Ok(())
}
