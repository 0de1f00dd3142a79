//! Integration Tests for VibeMQ Session Storage
//!
//! These tests drive the public store API the way the broker does: a
//! connection type of its own, a subscription table receiving recovered
//! filters, and broker restarts simulated by opening a fresh store over
//! the same root.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;

use vibemq_storage::config::Config;
use vibemq_storage::protocol::QoS;
use vibemq_storage::storage::{
    AreaInit, AsyncSessionStore, Result, SessionStore, StorageArea, StorageConnection,
    StorageError, StorageRoot, SubscriptionSink,
};

/// Broker-side connection state
struct Connection {
    client_id: String,
    clean_session: bool,
    storage: AreaInit,
}

impl Connection {
    fn new(client_id: &str, clean_session: bool) -> Self {
        Self {
            client_id: client_id.to_string(),
            clean_session,
            storage: AreaInit::new(),
        }
    }
}

impl StorageConnection for Connection {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn clean_session(&self) -> bool {
        self.clean_session
    }

    fn storage_init(&self) -> &AreaInit {
        &self.storage
    }
}

/// Broker subscription table keyed by client
#[derive(Default)]
struct SubscriptionTable {
    entries: Mutex<HashMap<String, Vec<(String, QoS)>>>,
}

impl SubscriptionTable {
    fn for_client(&self, client_id: &str) -> Vec<(String, QoS)> {
        let mut subs = self
            .entries
            .lock()
            .get(client_id)
            .cloned()
            .unwrap_or_default();
        subs.sort();
        subs
    }
}

impl SubscriptionSink<Connection> for SubscriptionTable {
    fn register_recovered_subscription(
        &self,
        conn: &Connection,
        topic_filter: &str,
        qos: QoS,
    ) -> Result<()> {
        if topic_filter.contains('\0') {
            return Err(StorageError::Malformed("topic filter contains NUL".to_string()));
        }
        self.entries
            .lock()
            .entry(conn.client_id.clone())
            .or_default()
            .push((topic_filter.to_string(), qos));
        Ok(())
    }
}

fn open_store(dir: &TempDir, bucket_count: u32) -> SessionStore {
    SessionStore::with_root(StorageRoot::new(dir.path().join("sessions"), bucket_count))
}

#[test]
fn test_subscription_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 16);
    let conn = Connection::new("dev-1", false);

    assert!(store.subscribe(&conn, "a/b", QoS::AtMostOnce));
    assert!(store.subscription_exists(&conn, "a/b"));
    assert_eq!(store.subscription_count(&conn), 1);

    assert!(store.unsubscribe(&conn, "a/b"));
    assert!(!store.subscription_exists(&conn, "a/b"));
    assert_eq!(store.subscription_count(&conn), 0);
}

#[test]
fn test_packet_id_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 16);
    let conn = Connection::new("dev-1", false);

    assert!(store.lock_packet_id(&conn, 42));
    assert!(!store.lock_packet_id(&conn, 42));
    store.release_packet_id(&conn, 42);
    assert!(store.lock_packet_id(&conn, 42));
}

#[test]
fn test_message_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 16);
    let conn = Connection::new("dev-1", false);

    let handle = store
        .store_message_offline("dev-1", 7, QoS::AtMostOnce, b"hello")
        .expect("message stored");
    assert!(handle.as_path().exists());
    assert_eq!(std::fs::read(handle.as_path()).unwrap(), b"hello");

    let pending = store.pending_messages("dev-1").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].header.packet_id, 7);
    assert_eq!(pending[0].handle, handle);

    assert!(store.release_message(&conn, Some(handle.clone())));
    assert!(!handle.as_path().exists());
    assert!(store.pending_messages("dev-1").unwrap().is_empty());
}

#[test]
fn test_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let stored = vec![
        ("a/b".to_string(), QoS::AtMostOnce),
        ("home/+/temperature".to_string(), QoS::AtLeastOnce),
        ("logs/#".to_string(), QoS::ExactlyOnce),
        ("$SYS/broker/uptime".to_string(), QoS::AtMostOnce),
    ];

    {
        let store = open_store(&dir, 16);
        let conn = Connection::new("dev-1", false);
        for (filter, qos) in &stored {
            assert!(store.subscribe(&conn, filter, *qos));
        }
        assert!(store.lock_packet_id(&conn, 11));
        assert!(store
            .store_message(&conn, 11, QoS::AtLeastOnce, b"queued")
            .is_some());
    }

    let store = open_store(&dir, 16);
    let conn = Connection::new("dev-1", false);
    let table = SubscriptionTable::default();

    assert_eq!(store.recover(&conn, &table), stored.len());

    let mut expected = stored.clone();
    expected.sort();
    assert_eq!(table.for_client("dev-1"), expected);
    assert_eq!(store.subscription_count(&conn), stored.len());

    // Packet id still held across the restart
    assert!(!store.lock_packet_id(&conn, 11));
    assert_eq!(store.locked_packet_ids("dev-1").unwrap(), vec![11]);

    let pending = store.pending_messages("dev-1").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        store.read_message(&pending[0].handle).unwrap(),
        Bytes::from_static(b"queued")
    );
}

#[test]
fn test_clients_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 16);
    let alice = Connection::new("alice", false);
    let bob = Connection::new("bob", false);

    assert!(store.subscribe(&alice, "shared/topic", QoS::AtLeastOnce));
    assert!(!store.subscription_exists(&bob, "shared/topic"));
    assert!(store.lock_packet_id(&alice, 1));
    assert!(store.lock_packet_id(&bob, 1));

    assert!(store.unsubscribe(&alice, "shared/topic"));
    assert_eq!(store.subscription_count(&alice), 0);
}

#[test]
fn test_clean_session_never_touches_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, 16);
    let conn = Connection::new("ephemeral", true);

    assert!(!store.ensure_area(&conn, StorageArea::ALL));
    assert!(!store.subscribe(&conn, "a/b", QoS::AtMostOnce));
    assert!(!store.lock_packet_id(&conn, 1));
    assert!(store
        .store_message(&conn, 1, QoS::AtLeastOnce, b"x")
        .is_none());
    assert_eq!(store.recover(&conn, &SubscriptionTable::default()), 0);

    assert!(!dir.path().join("sessions").exists());
}

#[test]
fn test_store_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("configured");
    let config = Config::parse(&format!(
        "[storage]\npath = \"{}\"\nbucket_count = 8\n",
        root.display()
    ))
    .unwrap();

    let store = SessionStore::from_config(&config.storage);
    assert_eq!(store.root().bucket_count(), 8);

    let conn = Connection::new("dev-1", false);
    assert!(store.subscribe(&conn, "x", QoS::AtMostOnce));
    assert!(root.join("dev-1").join("subs").is_dir());
}

#[tokio::test]
async fn test_async_store_with_broker_connection() {
    let dir = tempfile::tempdir().unwrap();
    let store = AsyncSessionStore::new(Arc::new(open_store(&dir, 16)));
    let conn = Arc::new(Connection::new("dev-1", false));

    store
        .ensure_area(conn.clone(), StorageArea::ALL)
        .await
        .unwrap();
    store
        .subscribe(conn.clone(), "a/b".to_string(), QoS::AtLeastOnce)
        .await
        .unwrap();
    assert!(store.lock_packet_id(conn.clone(), 42).await.unwrap());

    let handle = store
        .store_message(
            conn.clone(),
            42,
            QoS::AtLeastOnce,
            Bytes::from_static(b"payload"),
        )
        .await
        .unwrap();

    let table = Arc::new(SubscriptionTable::default());
    assert_eq!(store.recover(conn.clone(), table.clone()).await.unwrap(), 1);
    assert_eq!(
        table.for_client("dev-1"),
        vec![("a/b".to_string(), QoS::AtLeastOnce)]
    );

    assert!(store
        .release_message(conn.clone(), Some(handle))
        .await
        .unwrap());
    store.release_packet_id(conn.clone(), 42).await.unwrap();
    assert!(store.blocking().locked_packet_ids("dev-1").unwrap().is_empty());
}

#[tokio::test]
async fn test_async_concurrent_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let store = AsyncSessionStore::new(Arc::new(open_store(&dir, 4)));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let conn = Arc::new(Connection::new(&format!("client-{}", i % 4), false));
            store
                .subscribe(conn, format!("topic/{}", i), QoS::AtMostOnce)
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    for c in 0..4 {
        let conn = Arc::new(Connection::new(&format!("client-{}", c), false));
        assert_eq!(store.subscription_count(conn).await.unwrap(), 4);
    }
}
