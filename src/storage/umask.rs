//! Process umask handling for directory creation.
//!
//! `umask(2)` is process wide, so every section that tightens it is
//! serialized through one lock and the previous mask is put back when the
//! guard drops, on both success and error paths.

use parking_lot::{Mutex, MutexGuard};

pub(super) static UMASK_LOCK: Mutex<()> = Mutex::new(());

/// Owner-only mask applied while storage directories are created
pub const STORAGE_UMASK: libc::mode_t = 0o077;

/// Holds a tightened umask until dropped
pub(crate) struct UmaskGuard {
    previous: libc::mode_t,
    _lock: MutexGuard<'static, ()>,
}

impl UmaskGuard {
    /// Not reentrant: never acquire a second guard on the same thread.
    pub(crate) fn tighten() -> Self {
        let lock = UMASK_LOCK.lock();
        // SAFETY: umask only swaps the process file mode creation mask.
        let previous = unsafe { libc::umask(STORAGE_UMASK) };
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        // SAFETY: see `tighten`.
        unsafe {
            libc::umask(self.previous);
        }
    }
}
