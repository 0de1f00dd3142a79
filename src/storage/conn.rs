//! Connection-side interfaces consumed by the session store.

use std::sync::Arc;

use super::area::AreaInit;
use super::error::Result;
use crate::protocol::QoS;

/// What the store needs to know about a live connection.
pub trait StorageConnection: Send + Sync {
    /// MQTT client identifier
    fn client_id(&self) -> &str;

    /// Whether the client asked for a clean (non-durable) session
    fn clean_session(&self) -> bool;

    /// Per-connection record of initialized storage areas
    fn storage_init(&self) -> &AreaInit;
}

impl<C: StorageConnection + ?Sized> StorageConnection for Arc<C> {
    fn client_id(&self) -> &str {
        (**self).client_id()
    }

    fn clean_session(&self) -> bool {
        (**self).clean_session()
    }

    fn storage_init(&self) -> &AreaInit {
        (**self).storage_init()
    }
}

/// Receives subscriptions rebuilt from disk during session recovery.
///
/// `topic_filter` is borrowed for the duration of the call; copy it if it
/// needs to outlive the call. An error only skips that one record.
pub trait SubscriptionSink<C: ?Sized> {
    fn register_recovered_subscription(&self, conn: &C, topic_filter: &str, qos: QoS) -> Result<()>;
}

impl<C: ?Sized, F> SubscriptionSink<C> for F
where
    F: Fn(&C, &str, QoS) -> Result<()>,
{
    fn register_recovered_subscription(&self, conn: &C, topic_filter: &str, qos: QoS) -> Result<()> {
        self(conn, topic_filter, qos)
    }
}

/// Minimal connection handle for callers without a broker connection
/// object (tools, tests, offline processing).
#[derive(Debug)]
pub struct SessionConn {
    client_id: Arc<str>,
    clean_session: bool,
    init: AreaInit,
}

impl SessionConn {
    pub fn new(client_id: impl Into<Arc<str>>, clean_session: bool) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session,
            init: AreaInit::new(),
        }
    }

    /// Connection for a durable (`clean_session = false`) session
    pub fn durable(client_id: impl Into<Arc<str>>) -> Self {
        Self::new(client_id, false)
    }
}

impl StorageConnection for SessionConn {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn clean_session(&self) -> bool {
        self.clean_session
    }

    fn storage_init(&self) -> &AreaInit {
        &self.init
    }
}
