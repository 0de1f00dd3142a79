//! Subscription records.
//!
//! A record lives in `subs/<bucket>/` under a name carrying the filter
//! length and requested QoS; the file body is the raw topic filter. Lookups
//! first match on length from the name, then compare content.

use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::Path;

use tracing::{debug, warn};

use super::bucket::bucket_of;
use super::conn::{StorageConnection, SubscriptionSink};
use super::error::{Result, StorageError};
use super::fs::{create_private_dir, is_hidden, remove_if_exists, write_record};
use super::record::SubscriptionHeader;
use super::umask::UmaskGuard;
use super::{report, SessionStore, StorageArea};
use crate::protocol::QoS;

/// Chunk size used when comparing a stored filter against a candidate
const COMPARE_CHUNK: usize = 4096;

impl SessionStore {
    /// Persist a subscription for a durable client.
    ///
    /// Subscribing twice to the same filter is a no-op; the QoS of the
    /// first record is kept.
    pub fn subscribe<C>(&self, conn: &C, topic_filter: &str, qos: QoS) -> bool
    where
        C: StorageConnection + ?Sized,
    {
        report(
            "subscribe",
            conn.client_id(),
            self.try_subscribe(conn, topic_filter, qos),
        )
        .is_some()
    }

    pub fn try_subscribe<C>(&self, conn: &C, topic_filter: &str, qos: QoS) -> Result<()>
    where
        C: StorageConnection + ?Sized,
    {
        check_filter(topic_filter)?;
        let root = self.prepare(conn, StorageArea::SESSION)?;
        let client_id = conn.client_id();

        let bucket = bucket_of(topic_filter, root.bucket_count());
        let dir = root.bucket_dir(client_id, bucket);

        let created = {
            let _umask = UmaskGuard::tighten();
            create_private_dir(&dir)?
        };
        if !created && find_in_bucket(&dir, topic_filter, false)? {
            debug!(client_id, topic_filter, "Subscription already stored");
            return Ok(());
        }

        let mut header = SubscriptionHeader::new(topic_filter.len(), qos, bucket);
        let path = write_record(&dir, topic_filter.as_bytes(), |attempt| {
            if attempt > 0 {
                header.stamp = header.stamp.bump();
            }
            header.encode()
        })?;

        debug!(client_id, topic_filter, %qos, path = %path.display(), "Subscription stored");
        Ok(())
    }

    /// Whether the client has a stored subscription for `topic_filter`
    pub fn subscription_exists<C>(&self, conn: &C, topic_filter: &str) -> bool
    where
        C: StorageConnection + ?Sized,
    {
        report(
            "subscription_exists",
            conn.client_id(),
            self.try_find_subscription(conn, topic_filter, false),
        )
        .unwrap_or(false)
    }

    /// Remove the stored subscription for `topic_filter`.
    ///
    /// Returns whether a record was found and removed.
    pub fn unsubscribe<C>(&self, conn: &C, topic_filter: &str) -> bool
    where
        C: StorageConnection + ?Sized,
    {
        report(
            "unsubscribe",
            conn.client_id(),
            self.try_find_subscription(conn, topic_filter, true),
        )
        .unwrap_or(false)
    }

    /// Look up `topic_filter` in its bucket, optionally removing the record.
    pub fn try_find_subscription<C>(
        &self,
        conn: &C,
        topic_filter: &str,
        remove_if_found: bool,
    ) -> Result<bool>
    where
        C: StorageConnection + ?Sized,
    {
        check_filter(topic_filter)?;
        let root = self.lookup_root(conn)?;
        let bucket = bucket_of(topic_filter, root.bucket_count());
        find_in_bucket(
            &root.bucket_dir(conn.client_id(), bucket),
            topic_filter,
            remove_if_found,
        )
    }

    /// Number of stored subscriptions; 0 for clean sessions or an
    /// unreadable subscription area.
    pub fn subscription_count<C>(&self, conn: &C) -> usize
    where
        C: StorageConnection + ?Sized,
    {
        let root = match self.lookup_root(conn) {
            Ok(root) => root,
            Err(_) => return 0,
        };
        let subs = root.area_dir(conn.client_id(), StorageArea::SUBSCRIPTIONS);
        walk_records(&subs, |_, _| {})
    }

    /// Re-register every stored subscription with `sink`.
    ///
    /// Records that cannot be decoded or read, and records the sink
    /// rejects, are logged and skipped. Returns how many were registered.
    pub fn recover<C, S>(&self, conn: &C, sink: &S) -> usize
    where
        C: StorageConnection + ?Sized,
        S: SubscriptionSink<C> + ?Sized,
    {
        let root = match self.lookup_root(conn) {
            Ok(root) => root,
            Err(e) => {
                warn!(client_id = conn.client_id(), "Session recovery skipped: {}", e);
                return 0;
            }
        };
        let client_id = conn.client_id();
        let subs = root.area_dir(client_id, StorageArea::SUBSCRIPTIONS);

        let mut registered = 0;
        walk_records(&subs, |path, name| {
            let (filter, qos) = match read_record(path, name) {
                Ok(record) => record,
                Err(e) => {
                    warn!(client_id, "Skipping subscription record: {}", e);
                    return;
                }
            };
            debug!(client_id, topic_filter = %filter, %qos, "Recovering subscription");
            match sink.register_recovered_subscription(conn, &filter, qos) {
                Ok(()) => registered += 1,
                Err(e) => warn!(client_id, topic_filter = %filter, "Failed to register recovered subscription: {}", e),
            }
        });

        debug!(client_id, registered, "Session recovered");
        registered
    }

    /// Stored `(topic filter, qos)` pairs, in directory order
    pub fn subscriptions<C>(&self, conn: &C) -> Vec<(String, QoS)>
    where
        C: StorageConnection + ?Sized,
    {
        let mut found = Vec::new();
        let Ok(root) = self.lookup_root(conn) else {
            return found;
        };
        let subs = root.area_dir(conn.client_id(), StorageArea::SUBSCRIPTIONS);
        walk_records(&subs, |path, name| match read_record(path, name) {
            Ok(record) => found.push(record),
            Err(e) => warn!(client_id = conn.client_id(), "Skipping subscription record: {}", e),
        });
        found
    }
}

fn check_filter(topic_filter: &str) -> Result<()> {
    if topic_filter.is_empty() {
        return Err(StorageError::invalid("topic filter is empty"));
    }
    Ok(())
}

/// Scan one bucket for a record holding exactly `topic_filter`.
fn find_in_bucket(dir: &Path, topic_filter: &str, remove_if_found: bool) -> Result<bool> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StorageError::io(dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(dir, e))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if is_hidden(name) {
            continue;
        }
        match SubscriptionHeader::parse(name) {
            Some(header) if header.filter_len == topic_filter.len() => {}
            _ => continue,
        }
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        match content_matches(&path, topic_filter.as_bytes()) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!(path = %path.display(), "Unable to read subscription record: {}", e);
                continue;
            }
        }

        if remove_if_found && remove_if_exists(&path)? {
            debug!(topic_filter, path = %path.display(), "Subscription removed");
        }
        return Ok(true);
    }

    Ok(false)
}

/// Stream the file and compare it chunk by chunk against `expected`.
fn content_matches(path: &Path, expected: &[u8]) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; COMPARE_CHUNK];
    let mut offset = 0;

    loop {
        let read = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let end = offset + read;
        if end > expected.len() || buf[..read] != expected[offset..end] {
            return Ok(false);
        }
        offset = end;
    }

    Ok(offset == expected.len())
}

/// Decode a record name and load its filter.
fn read_record(path: &Path, name: &str) -> Result<(String, QoS)> {
    let header = SubscriptionHeader::parse(name)
        .ok_or_else(|| StorageError::Malformed(format!("bad record name '{}'", name)))?;
    let bytes = fs::read(path).map_err(|e| StorageError::io(path, e))?;
    if bytes.len() != header.filter_len {
        return Err(StorageError::Malformed(format!(
            "{}: expected {} bytes, found {}",
            path.display(),
            header.filter_len,
            bytes.len()
        )));
    }
    let filter = String::from_utf8(bytes)
        .map_err(|_| StorageError::Malformed(format!("{}: filter is not UTF-8", path.display())))?;
    Ok((filter, header.qos))
}

/// Visit every regular record file under `subs/<bucket>/`.
///
/// Unreadable directories are skipped. Returns the number of files visited.
fn walk_records<F>(subs: &Path, mut visit: F) -> usize
where
    F: FnMut(&Path, &str),
{
    let buckets = match fs::read_dir(subs) {
        Ok(buckets) => buckets,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %subs.display(), "Unable to read subscription area: {}", e);
            }
            return 0;
        }
    };

    let mut count = 0;
    for bucket in buckets.flatten() {
        if !bucket.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let bucket_path = bucket.path();
        let files = match fs::read_dir(&bucket_path) {
            Ok(files) => files,
            Err(e) => {
                warn!(path = %bucket_path.display(), "Unable to read bucket: {}", e);
                continue;
            }
        };

        for file in files.flatten() {
            let file_name = file.file_name();
            let name = file_name.to_string_lossy();
            if is_hidden(&name) || !file.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            count += 1;
            visit(&file.path(), &name);
        }
    }

    count
}
