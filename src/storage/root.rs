//! Storage root resolution and on-disk layout.
//!
//! ```text
//! <root>/<client_id>/msgs/<packet_id>-<size>-<qos>-<sec>-<usec>
//! <root>/<client_id>/subs/<bucket>/<topiclen>-<qos>-<bucket>-<sec>-<usec>
//! <root>/<client_id>/pkgids/<packet_id>
//! ```

use std::path::{Path, PathBuf};

use super::area::StorageArea;
use super::error::{Result, StorageError};

/// Default number of subscription buckets per client
pub const DEFAULT_BUCKET_COUNT: u32 = 4096;

/// Directory name used under `$HOME` (or the working directory)
pub const STORAGE_DIR_NAME: &str = ".vibemq-storage";

/// Storage root directory and bucket space of a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoot {
    path: PathBuf,
    bucket_count: u32,
}

impl StorageRoot {
    /// Create a root at an explicit location. A bucket count of 0 selects
    /// the default.
    pub fn new(path: impl Into<PathBuf>, bucket_count: u32) -> Self {
        let bucket_count = if bucket_count == 0 {
            DEFAULT_BUCKET_COUNT
        } else {
            bucket_count
        };
        Self {
            path: path.into(),
            bucket_count,
        }
    }

    /// `$HOME/.vibemq-storage`, or `./.vibemq-storage` when `HOME` is unset
    pub fn from_env() -> Self {
        Self::new(default_root_path(), DEFAULT_BUCKET_COUNT)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    /// `<root>/<client_id>`
    pub fn client_dir(&self, client_id: &str) -> PathBuf {
        self.path.join(client_id)
    }

    /// `<root>/<client_id>/<area>` for a single area flag
    pub fn area_dir(&self, client_id: &str, area: StorageArea) -> PathBuf {
        let mut path = self.client_dir(client_id);
        if let Some(name) = area.dir_name() {
            path.push(name);
        }
        path
    }

    /// `<root>/<client_id>/subs/<bucket>`
    pub fn bucket_dir(&self, client_id: &str, bucket: u32) -> PathBuf {
        self.area_dir(client_id, StorageArea::SUBSCRIPTIONS)
            .join(bucket.to_string())
    }

    /// `<root>/<client_id>/pkgids/<packet_id>`
    pub fn packet_id_path(&self, client_id: &str, packet_id: u32) -> PathBuf {
        self.area_dir(client_id, StorageArea::PACKET_IDS)
            .join(packet_id.to_string())
    }
}

pub(crate) fn default_root_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(STORAGE_DIR_NAME),
        _ => PathBuf::from(STORAGE_DIR_NAME),
    }
}

/// Validate a client identifier before it is used as a path component.
pub(crate) fn check_client_id(client_id: &str) -> Result<()> {
    if client_id.is_empty() {
        return Err(StorageError::invalid("client identifier is empty"));
    }
    if client_id == "."
        || client_id == ".."
        || client_id.contains('/')
        || client_id.contains('\0')
    {
        return Err(StorageError::invalid(format!(
            "client identifier '{}' cannot be used as a directory name",
            client_id
        )));
    }
    Ok(())
}
