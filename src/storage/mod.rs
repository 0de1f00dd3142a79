//! Session storage for durable MQTT sessions.
//!
//! Keeps the state of `clean_session = false` clients on the local
//! filesystem so it survives broker restarts:
//! - Subscriptions (topic filter + requested QoS), hash-bucketed per client
//! - Queued messages addressed to the client
//! - Packet identifiers in use, locked with exclusive file creation
//!
//! Every operation is synchronous and may block on disk I/O. Async callers
//! go through [`AsyncSessionStore`].

mod area;
mod async_store;
mod bucket;
mod conn;
mod error;
mod fs;
mod messages;
mod pkgids;
mod record;
mod root;
mod subscriptions;
mod umask;


pub use area::{AreaInit, StorageArea};
pub use async_store::AsyncSessionStore;
pub use bucket::bucket_of;
pub use conn::{SessionConn, StorageConnection, SubscriptionSink};
pub use error::{Result, StorageError};
pub use messages::{MessageHandle, StoredMessage};
pub use record::{MessageHeader, Stamp, SubscriptionHeader};
pub use root::{StorageRoot, DEFAULT_BUCKET_COUNT, STORAGE_DIR_NAME};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::StorageConfig;
use fs::{create_private_dir, sweep_stale_temps};
use root::check_client_id;
use umask::UmaskGuard;

/// Root generations, unique across every store in the process
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct RootState {
    /// Resolved from the environment on first use when not configured
    root: Option<Arc<StorageRoot>>,
    /// Bumped on every reconfiguration
    generation: u64,
    /// Root directory exists on disk
    created: bool,
}

/// Filesystem-backed store for durable session state.
///
/// One store per broker context. The root path and bucket count can only
/// be changed through [`SessionStore::set_path`].
#[derive(Debug)]
pub struct SessionStore {
    state: RwLock<RootState>,
    init_lock: Mutex<()>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Store rooted at `$HOME/.vibemq-storage` (resolved on first use)
    pub fn new() -> Self {
        Self::with_state(None)
    }

    /// Store rooted at an explicit location
    pub fn with_root(root: StorageRoot) -> Self {
        Self::with_state(Some(Arc::new(root)))
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::with_root(config.resolve_root())
    }

    fn with_state(root: Option<Arc<StorageRoot>>) -> Self {
        Self {
            state: RwLock::new(RootState {
                root,
                generation: next_generation(),
                created: false,
            }),
            init_lock: Mutex::new(()),
        }
    }

    /// Replace the storage root and bucket count.
    ///
    /// The previous configuration is discarded, not merged. Areas already
    /// initialized on live connections are created again under the new
    /// root on their next use.
    pub fn set_path(&self, path: impl Into<PathBuf>, bucket_count: u32) -> Result<()> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(StorageError::invalid("storage path is empty"));
        }
        if bucket_count == 0 {
            return Err(StorageError::invalid("bucket count must be at least 1"));
        }

        let _guard = self.init_lock.lock();
        let mut state = self.state.write();
        info!(path = %path.display(), bucket_count, "Storage root configured");
        state.root = Some(Arc::new(StorageRoot::new(path, bucket_count)));
        state.generation = next_generation();
        state.created = false;
        Ok(())
    }

    /// Current root, resolving the default location if none is configured.
    ///
    /// Does not touch the filesystem.
    pub fn root(&self) -> Arc<StorageRoot> {
        if let Some(root) = &self.state.read().root {
            return root.clone();
        }
        let _guard = self.init_lock.lock();
        let mut state = self.state.write();
        state
            .root
            .get_or_insert_with(|| Arc::new(StorageRoot::from_env()))
            .clone()
    }

    /// Root directory, created on first call.
    ///
    /// Double-checked: the fast path only takes the read lock; creation is
    /// funneled through `init_lock` and re-checked there.
    fn ready_root(&self) -> Result<(Arc<StorageRoot>, u64)> {
        {
            let state = self.state.read();
            if let (true, Some(root)) = (state.created, &state.root) {
                return Ok((root.clone(), state.generation));
            }
        }

        let _guard = self.init_lock.lock();
        let (root, generation, created) = {
            let mut state = self.state.write();
            let root = state
                .root
                .get_or_insert_with(|| Arc::new(StorageRoot::from_env()))
                .clone();
            (root, state.generation, state.created)
        };

        if !created {
            {
                let _umask = UmaskGuard::tighten();
                create_private_dir(root.path())?;
            }
            self.state.write().created = true;
            debug!(path = %root.path().display(), "Storage root ready");
        }

        Ok((root, generation))
    }

    /// Make sure `areas` exist for the connection's client.
    ///
    /// Fails for clean sessions and empty client identifiers. Returns
    /// `false` on any failure after logging it.
    pub fn ensure_area<C>(&self, conn: &C, areas: StorageArea) -> bool
    where
        C: StorageConnection + ?Sized,
    {
        report("ensure_area", conn.client_id(), self.try_ensure_area(conn, areas)).is_some()
    }

    pub fn try_ensure_area<C>(&self, conn: &C, areas: StorageArea) -> Result<()>
    where
        C: StorageConnection + ?Sized,
    {
        self.prepare(conn, areas).map(drop)
    }

    /// Create `areas` for a client identifier without a connection object.
    ///
    /// No per-connection cache is consulted; directories are checked on
    /// every call.
    pub fn ensure_area_offline(&self, client_id: &str, areas: StorageArea) -> bool {
        report(
            "ensure_area",
            client_id,
            self.try_ensure_area_offline(client_id, areas),
        )
        .is_some()
    }

    pub fn try_ensure_area_offline(&self, client_id: &str, areas: StorageArea) -> Result<()> {
        check_client_id(client_id)?;
        let (root, _) = self.ready_root()?;
        create_areas(&root, client_id, areas)
    }

    /// Validate the connection and initialize `areas` once per connection.
    fn prepare<C>(&self, conn: &C, areas: StorageArea) -> Result<Arc<StorageRoot>>
    where
        C: StorageConnection + ?Sized,
    {
        check_conn(conn)?;
        let (root, generation) = self.ready_root()?;

        let init = conn.storage_init();
        if init.is_ready(areas, generation) {
            return Ok(root);
        }

        let _guard = init.lock();
        if init.is_ready(areas, generation) {
            return Ok(root);
        }
        create_areas(&root, conn.client_id(), areas)?;
        sweep_areas(&root, conn.client_id(), areas);
        init.mark(areas, generation);
        Ok(root)
    }

    /// Validate the connection and return the root without creating anything.
    fn lookup_root<C>(&self, conn: &C) -> Result<Arc<StorageRoot>>
    where
        C: StorageConnection + ?Sized,
    {
        check_conn(conn)?;
        Ok(self.root())
    }
}

/// Rejects clean sessions and unusable client identifiers.
fn check_conn<C>(conn: &C) -> Result<()>
where
    C: StorageConnection + ?Sized,
{
    check_client_id(conn.client_id())?;
    if conn.clean_session() {
        return Err(StorageError::CleanSession(conn.client_id().to_string()));
    }
    Ok(())
}

fn create_areas(root: &StorageRoot, client_id: &str, areas: StorageArea) -> Result<()> {
    let _umask = UmaskGuard::tighten();

    // The root may have been removed since it was first created
    if create_private_dir(root.path())? {
        warn!(path = %root.path().display(), "Storage root was missing, recreated");
    }
    let client_dir = root.client_dir(client_id);
    create_private_dir(&client_dir)?;
    for name in areas.dir_names() {
        create_private_dir(&client_dir.join(name))?;
    }

    debug!(client_id, areas = ?areas, "Storage areas ready");
    Ok(())
}

/// Remove temporary files left behind by crashed writers.
fn sweep_areas(root: &StorageRoot, client_id: &str, areas: StorageArea) {
    if areas.contains(StorageArea::MESSAGES) {
        sweep_stale_temps(&root.area_dir(client_id, StorageArea::MESSAGES));
    }
    if areas.contains(StorageArea::SUBSCRIPTIONS) {
        let subs = root.area_dir(client_id, StorageArea::SUBSCRIPTIONS);
        if let Ok(buckets) = std::fs::read_dir(&subs) {
            for bucket in buckets.flatten() {
                if bucket.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    sweep_stale_temps(&bucket.path());
                }
            }
        }
    }
}

/// Log a failed operation and collapse it to `None`.
fn report<T>(op: &'static str, client_id: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_invalid_argument() => {
            warn!(client_id, "{} rejected: {}", op, e);
            None
        }
        Err(e) => {
            error!(client_id, "{} failed: {}", op, e);
            None
        }
    }
}
