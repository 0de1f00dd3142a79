//! Queued message records.
//!
//! Messages are stored one file per message in `msgs/`; the file body is
//! the raw payload. Callers get back a [`MessageHandle`] and must hand it
//! back unchanged to release the message.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use super::conn::StorageConnection;
use super::error::{Result, StorageError};
use super::fs::{is_hidden, remove_if_exists, write_record};
use super::record::MessageHeader;
use super::root::{check_client_id, StorageRoot};
use super::{check_conn, report, SessionStore, StorageArea};
use crate::protocol::QoS;

/// Opaque reference to a stored message (its full path)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle(PathBuf);

impl MessageHandle {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path(self) -> PathBuf {
        self.0
    }

    /// Header decoded from the record name
    pub fn header(&self) -> Option<MessageHeader> {
        self.0
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(MessageHeader::parse)
    }
}

impl From<PathBuf> for MessageHandle {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A message found in a client's queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub header: MessageHeader,
    pub handle: MessageHandle,
}

impl SessionStore {
    /// Store a message for the connection's client.
    pub fn store_message<C>(
        &self,
        conn: &C,
        packet_id: u32,
        qos: QoS,
        payload: &[u8],
    ) -> Option<MessageHandle>
    where
        C: StorageConnection + ?Sized,
    {
        report(
            "store_message",
            conn.client_id(),
            self.try_store_message(conn, packet_id, qos, payload),
        )
    }

    pub fn try_store_message<C>(
        &self,
        conn: &C,
        packet_id: u32,
        qos: QoS,
        payload: &[u8],
    ) -> Result<MessageHandle>
    where
        C: StorageConnection + ?Sized,
    {
        check_conn(conn)?;
        self.try_store_message_offline(conn.client_id(), packet_id, qos, payload)
    }

    /// Store a message for a client that may not be connected.
    ///
    /// Returns `None` on an empty identifier or payload, or when the write
    /// fails. A failed write leaves no record behind.
    pub fn store_message_offline(
        &self,
        client_id: &str,
        packet_id: u32,
        qos: QoS,
        payload: &[u8],
    ) -> Option<MessageHandle> {
        report(
            "store_message",
            client_id,
            self.try_store_message_offline(client_id, packet_id, qos, payload),
        )
    }

    pub fn try_store_message_offline(
        &self,
        client_id: &str,
        packet_id: u32,
        qos: QoS,
        payload: &[u8],
    ) -> Result<MessageHandle> {
        check_client_id(client_id)?;
        if payload.is_empty() {
            return Err(StorageError::invalid("message payload is empty"));
        }
        self.try_ensure_area_offline(client_id, StorageArea::MESSAGES)?;

        let dir = self.root().area_dir(client_id, StorageArea::MESSAGES);
        let mut header = MessageHeader::new(packet_id, payload.len(), qos);
        let path = write_record(&dir, payload, |attempt| {
            if attempt > 0 {
                header.stamp = header.stamp.bump();
            }
            header.encode()
        })?;

        debug!(client_id, packet_id, %qos, size = payload.len(), "Message stored");
        Ok(MessageHandle(path))
    }

    /// Delete a stored message. `None` is accepted as a no-op.
    ///
    /// Releasing a handle whose file is already gone succeeds.
    pub fn release_message<C>(&self, conn: &C, handle: Option<MessageHandle>) -> bool
    where
        C: StorageConnection + ?Sized,
    {
        let result = self
            .prepare(conn, StorageArea::MESSAGES)
            .and_then(|root| release(&root, conn.client_id(), handle));
        report("release_message", conn.client_id(), result).is_some()
    }

    /// [`release_message`](Self::release_message) for a bare client identifier
    pub fn release_message_offline(&self, client_id: &str, handle: Option<MessageHandle>) -> bool {
        let result = self
            .try_ensure_area_offline(client_id, StorageArea::MESSAGES)
            .and_then(|()| release(&self.root(), client_id, handle));
        report("release_message", client_id, result).is_some()
    }

    /// Messages queued for a client, oldest first.
    ///
    /// Files whose names do not decode are skipped.
    pub fn pending_messages(&self, client_id: &str) -> Result<Vec<StoredMessage>> {
        check_client_id(client_id)?;
        let dir = self.root().area_dir(client_id, StorageArea::MESSAGES);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(dir, e)),
        };

        let mut messages: Vec<StoredMessage> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                if is_hidden(name) {
                    return None;
                }
                let header = MessageHeader::parse(name)?;
                Some(StoredMessage {
                    header,
                    handle: MessageHandle(entry.path()),
                })
            })
            .collect();
        messages.sort_by_key(|m| (m.header.stamp, m.header.packet_id));
        Ok(messages)
    }

    /// Load the payload behind a handle.
    ///
    /// The handle must point into a `msgs/` area below the current root.
    pub fn read_message(&self, handle: &MessageHandle) -> Result<Bytes> {
        let root = self.root();
        let in_msgs_area = handle
            .as_path()
            .parent()
            .filter(|dir| {
                dir.file_name().and_then(|name| name.to_str())
                    == StorageArea::MESSAGES.dir_name()
            })
            .and_then(Path::parent)
            .and_then(Path::parent)
            .is_some_and(|dir| dir == root.path());
        let header = handle.header().filter(|_| in_msgs_area).ok_or_else(|| {
            StorageError::invalid(format!("'{}' is not a message handle", handle))
        })?;
        let payload = fs::read(handle.as_path()).map_err(|e| StorageError::io(handle.as_path(), e))?;
        if payload.len() != header.size {
            return Err(StorageError::Malformed(format!(
                "{}: expected {} bytes, found {}",
                handle,
                header.size,
                payload.len()
            )));
        }
        Ok(Bytes::from(payload))
    }
}

fn release(root: &StorageRoot, client_id: &str, handle: Option<MessageHandle>) -> Result<()> {
    let Some(handle) = handle else {
        return Ok(());
    };
    // Only ever unlink message records of this client
    let msgs = root.area_dir(client_id, StorageArea::MESSAGES);
    if handle.header().is_none() || handle.as_path().parent() != Some(msgs.as_path()) {
        return Err(StorageError::invalid(format!(
            "'{}' is not a message handle of client '{}'",
            handle, client_id
        )));
    }
    if remove_if_exists(handle.as_path())? {
        debug!(handle = %handle, "Message released");
    }
    Ok(())
}
