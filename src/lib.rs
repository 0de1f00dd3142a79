//! VibeMQ session storage
//!
//! Filesystem persistence for durable (`clean_session = false`) MQTT
//! sessions: subscriptions, queued messages and packet identifier locks
//! survive broker restarts without an external database.

pub mod config;
pub mod protocol;
pub mod storage;

pub use config::{Config, StorageConfig};
pub use protocol::QoS;
pub use storage::{
    AsyncSessionStore, MessageHandle, SessionConn, SessionStore, StorageArea, StorageConnection,
    StorageError, StorageRoot, SubscriptionSink,
};
