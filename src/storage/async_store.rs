//! Async adapter over [`SessionStore`].
//!
//! Each call runs on tokio's blocking pool so connection tasks never block
//! the reactor on disk I/O.

use std::sync::Arc;

use bytes::Bytes;
use tokio::task;

use super::conn::{StorageConnection, SubscriptionSink};
use super::error::Result;
use super::messages::MessageHandle;
use super::{SessionStore, StorageArea};
use crate::protocol::QoS;

#[derive(Debug, Clone)]
pub struct AsyncSessionStore {
    inner: Arc<SessionStore>,
}

impl AsyncSessionStore {
    pub fn new(inner: Arc<SessionStore>) -> Self {
        Self { inner }
    }

    /// The wrapped blocking store
    pub fn blocking(&self) -> &Arc<SessionStore> {
        &self.inner
    }

    pub async fn ensure_area<C>(&self, conn: Arc<C>, areas: StorageArea) -> Result<()>
    where
        C: StorageConnection + 'static,
    {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.try_ensure_area(&*conn, areas)).await?
    }

    pub async fn subscribe<C>(&self, conn: Arc<C>, topic_filter: String, qos: QoS) -> Result<()>
    where
        C: StorageConnection + 'static,
    {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.try_subscribe(&*conn, &topic_filter, qos)).await?
    }

    pub async fn subscription_exists<C>(&self, conn: Arc<C>, topic_filter: String) -> Result<bool>
    where
        C: StorageConnection + 'static,
    {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.try_find_subscription(&*conn, &topic_filter, false))
            .await?
    }

    pub async fn unsubscribe<C>(&self, conn: Arc<C>, topic_filter: String) -> Result<bool>
    where
        C: StorageConnection + 'static,
    {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.try_find_subscription(&*conn, &topic_filter, true))
            .await?
    }

    pub async fn subscription_count<C>(&self, conn: Arc<C>) -> Result<usize>
    where
        C: StorageConnection + 'static,
    {
        let inner = self.inner.clone();
        Ok(task::spawn_blocking(move || inner.subscription_count(&*conn)).await?)
    }

    pub async fn recover<C, S>(&self, conn: Arc<C>, sink: Arc<S>) -> Result<usize>
    where
        C: StorageConnection + 'static,
        S: SubscriptionSink<C> + Send + Sync + 'static,
    {
        let inner = self.inner.clone();
        Ok(task::spawn_blocking(move || inner.recover(&*conn, &*sink)).await?)
    }

    pub async fn lock_packet_id<C>(&self, conn: Arc<C>, packet_id: u32) -> Result<bool>
    where
        C: StorageConnection + 'static,
    {
        let inner = self.inner.clone();
        Ok(task::spawn_blocking(move || inner.lock_packet_id(&*conn, packet_id)).await?)
    }

    pub async fn release_packet_id<C>(&self, conn: Arc<C>, packet_id: u32) -> Result<()>
    where
        C: StorageConnection + 'static,
    {
        let inner = self.inner.clone();
        Ok(task::spawn_blocking(move || inner.release_packet_id(&*conn, packet_id)).await?)
    }

    pub async fn store_message<C>(
        &self,
        conn: Arc<C>,
        packet_id: u32,
        qos: QoS,
        payload: Bytes,
    ) -> Result<MessageHandle>
    where
        C: StorageConnection + 'static,
    {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.try_store_message(&*conn, packet_id, qos, &payload))
            .await?
    }

    pub async fn release_message<C>(&self, conn: Arc<C>, handle: Option<MessageHandle>) -> Result<bool>
    where
        C: StorageConnection + 'static,
    {
        let inner = self.inner.clone();
        Ok(task::spawn_blocking(move || inner.release_message(&*conn, handle)).await?)
    }

    pub async fn read_message(&self, handle: MessageHandle) -> Result<Bytes> {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.read_message(&handle)).await?
    }
}
