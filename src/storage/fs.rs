//! Filesystem primitives shared by the record stores.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use super::error::{Result, StorageError};

/// Mode for every directory created by the store
pub const DIR_MODE: u32 = 0o700;

/// Mode for record and lock files
pub const FILE_MODE: u32 = 0o600;

/// Name collisions tolerated before a record write gives up
const MAX_NAME_ATTEMPTS: u32 = 64;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Create `path` with owner-only permissions.
///
/// Returns `true` if the directory was created by this call and `false` if
/// it already existed.
pub(crate) fn create_private_dir(path: &Path) -> Result<bool> {
    match DirBuilder::new().mode(DIR_MODE).create(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Created storage directory");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(false),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Remove a file, treating absence as success.
///
/// Returns whether a file was actually removed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Create an empty file, failing if it already exists (`O_CREAT|O_EXCL`).
pub(crate) fn create_exclusive(path: &Path) -> std::io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(FILE_MODE)
        .open(path)
        .map(drop)
}

/// Dot-prefixed names are in-progress writes and never records.
pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Write `contents` as a new record in `dir`.
///
/// The data is written to a hidden temporary file first and then
/// hard-linked under its final name, so a record is either absent or
/// complete. `name` is called with the attempt number and must produce a
/// different name on each retry.
pub(crate) fn write_record<F>(dir: &Path, contents: &[u8], mut name: F) -> Result<PathBuf>
where
    F: FnMut(u32) -> String,
{
    let tmp = dir.join(format!(
        ".tmp-{}-{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = write_new_file(&tmp, contents) {
        discard(&tmp);
        return Err(StorageError::io(&tmp, e));
    }

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let target = dir.join(name(attempt));
        match fs::hard_link(&tmp, &target) {
            Ok(()) => {
                discard(&tmp);
                return Ok(target);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                discard(&tmp);
                return Err(StorageError::io(target, e));
            }
        }
    }

    discard(&tmp);
    Err(StorageError::io(
        dir,
        std::io::Error::new(ErrorKind::AlreadyExists, "no free record name"),
    ))
}

fn write_new_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(FILE_MODE)
        .open(path)?;
    file.write_all(contents)?;
    file.flush()
}

/// Remove `.tmp-<pid>-<n>` files whose writer process no longer exists.
///
/// Files of the current process and of live processes are left alone.
pub(crate) fn sweep_stale_temps(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(pid) = file_name.to_str().and_then(temp_owner) else {
            continue;
        };
        if pid == std::process::id() || process_alive(pid) {
            continue;
        }
        let path = entry.path();
        match remove_if_exists(&path) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!("Failed to remove stale temporary file: {}", e),
        }
    }

    if removed > 0 {
        debug!(path = %dir.display(), removed, "Removed stale temporary files");
    }
    removed
}

/// Writer pid encoded in a temporary file name
fn temp_owner(name: &str) -> Option<u32> {
    let rest = name.strip_prefix(".tmp-")?;
    let (pid, counter) = rest.split_once('-')?;
    counter.parse::<u64>().ok()?;
    pid.parse().ok()
}

fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only checks that the process exists.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Best-effort removal of a partial file
fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!("Failed to remove temporary file: {}", e);
    }
}
