//! Packet identifier locks.
//!
//! A lock is an empty file `pkgids/<packet_id>` created with `O_EXCL`, the
//! only cross-process mutual exclusion the store offers. Correctness
//! depends on the filesystem honoring exclusive create; network
//! filesystems without it are not supported.
//!
//! Identifiers above 65535 are allowed: they tag QoS 0 messages that need
//! a distinct storage key but no protocol packet id.

use std::fs;
use std::io::ErrorKind;

use tracing::{debug, error};

use super::conn::StorageConnection;
use super::error::{Result, StorageError};
use super::fs::{create_exclusive, is_hidden, remove_if_exists};
use super::root::{check_client_id, StorageRoot};
use super::{report, SessionStore, StorageArea};

impl SessionStore {
    /// Try to take `packet_id` for the connection's client.
    ///
    /// `false` covers both "already held" and filesystem failures.
    pub fn lock_packet_id<C>(&self, conn: &C, packet_id: u32) -> bool
    where
        C: StorageConnection + ?Sized,
    {
        if packet_id == 0 {
            return false;
        }
        match self.prepare(conn, StorageArea::PACKET_IDS) {
            Ok(root) => try_lock(&root, conn.client_id(), packet_id),
            Err(e) => {
                report::<()>("lock_packet_id", conn.client_id(), Err(e));
                false
            }
        }
    }

    /// Release a held packet id; releasing a free id is a no-op.
    pub fn release_packet_id<C>(&self, conn: &C, packet_id: u32)
    where
        C: StorageConnection + ?Sized,
    {
        if packet_id == 0 {
            return;
        }
        let result = self
            .lookup_root(conn)
            .and_then(|root| release(&root, conn.client_id(), packet_id));
        report("release_packet_id", conn.client_id(), result);
    }

    /// [`lock_packet_id`](Self::lock_packet_id) for a bare client identifier
    pub fn lock_packet_id_offline(&self, client_id: &str, packet_id: u32) -> bool {
        if packet_id == 0 {
            return false;
        }
        match self.try_ensure_area_offline(client_id, StorageArea::PACKET_IDS) {
            Ok(()) => try_lock(&self.root(), client_id, packet_id),
            Err(e) => {
                report::<()>("lock_packet_id", client_id, Err(e));
                false
            }
        }
    }

    /// [`release_packet_id`](Self::release_packet_id) for a bare client identifier
    pub fn release_packet_id_offline(&self, client_id: &str, packet_id: u32) {
        if packet_id == 0 {
            return;
        }
        let result = check_client_id(client_id)
            .and_then(|()| release(&self.root(), client_id, packet_id));
        report("release_packet_id", client_id, result);
    }

    /// Packet ids currently locked for a client, ascending
    pub fn locked_packet_ids(&self, client_id: &str) -> Result<Vec<u32>> {
        check_client_id(client_id)?;
        let dir = self.root().area_dir(client_id, StorageArea::PACKET_IDS);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(dir, e)),
        };

        let mut ids: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                if is_hidden(name) {
                    return None;
                }
                name.parse().ok().filter(|id| *id >= 1)
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

fn try_lock(root: &StorageRoot, client_id: &str, packet_id: u32) -> bool {
    let path = root.packet_id_path(client_id, packet_id);
    debug!(client_id, packet_id, path = %path.display(), "Attempting to lock packet id");
    match create_exclusive(&path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!(client_id, packet_id, "Packet id already locked");
            false
        }
        Err(e) => {
            error!(client_id, packet_id, path = %path.display(), "Unable to lock packet id: {}", e);
            false
        }
    }
}

fn release(root: &StorageRoot, client_id: &str, packet_id: u32) -> Result<()> {
    let path = root.packet_id_path(client_id, packet_id);
    if remove_if_exists(&path)? {
        debug!(client_id, packet_id, "Packet id released");
    }
    Ok(())
}
