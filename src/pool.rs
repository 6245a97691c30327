// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Pool
//!
//! The entry point the publish and read tasks go through. [`ConnectionPool::acquire`]
//! combines the cache lookup, the connectivity guard and channel
//! provisioning, and arms the reaper that evicts idle sessions.

use crate::{
    broker::{BrokerChannel, BrokerClient, BrokerConnection},
    cache::SessionCache,
    channel::LapinBrokerClient,
    config::PoolConfig,
    descriptor::{ConnectionDescriptor, SessionKey},
    errors::AmqpError,
    guard,
    reaper::{ReaperHandle, ReaperSettings},
    session::{Session, WorkerId},
};
use futures_util::future::join_all;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// A connection paired with the channel owned by the calling worker.
pub type Handles = (Arc<dyn BrokerConnection>, Arc<dyn BrokerChannel>);

/// Lookups retried when a session goes stale mid-acquire.
const MAX_ACQUIRE_ATTEMPTS: usize = 2;

pub(crate) struct PoolInner {
    client: Arc<dyn BrokerClient>,
    config: PoolConfig,
    pub(crate) cache: SessionCache,
    reaper: Mutex<Option<ReaperHandle>>,
    closed: AtomicBool,
}

impl PoolInner {
    async fn ensure_reaper(self: &Arc<Self>) {
        let mut slot = self.reaper.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        *slot = Some(ReaperHandle::spawn(
            Arc::downgrade(self),
            ReaperSettings::from(&self.config),
        ));
    }

    /// Clears the reaper slot if the cache is still empty. Checked under the
    /// slot lock so an acquire that just cached a session sees an empty slot
    /// and spawns a new reaper.
    pub(crate) async fn release_reaper_if_empty(&self) -> bool {
        let mut slot = self.reaper.lock().await;
        if !self.cache.is_empty() {
            return false;
        }
        *slot = None;
        true
    }

    #[cfg(test)]
    pub(crate) async fn reaper_running(&self) -> bool {
        self.reaper
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Process-wide pool of broker sessions, cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool over the given broker client. Nothing is spawned until
    /// the first acquire.
    pub fn new(client: Arc<dyn BrokerClient>, config: PoolConfig) -> ConnectionPool {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                client,
                config,
                cache: SessionCache::new(),
                reaper: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a pool backed by `lapin`.
    pub fn lapin(config: PoolConfig) -> ConnectionPool {
        let client = LapinBrokerClient::new(&config.connection_name, config.connect_timeout);
        ConnectionPool::new(Arc::new(client), config)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn session_count(&self) -> usize {
        self.inner.cache.len()
    }

    /// Returns an open connection for `descriptor` and the channel owned by
    /// `worker` on it.
    ///
    /// Fails with `MissingHostConfiguration`/`InvalidUri` before any network
    /// activity, or with a connect error naming the host. Connect failures
    /// are not retried.
    pub async fn acquire(
        &self,
        descriptor: &ConnectionDescriptor,
        worker: &WorkerId,
    ) -> Result<Handles, AmqpError> {
        descriptor.resolve()?;
        let key = descriptor.session_key(self.inner.config.key_policy);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_acquire(&key, descriptor, worker).await {
                Ok(Some(handles)) => return Ok(handles),
                Ok(None) if attempt < MAX_ACQUIRE_ATTEMPTS => {
                    debug!(session = %key, "handles closed while acquiring, retrying");
                }
                Err(err) if err.is_lifecycle() && attempt < MAX_ACQUIRE_ATTEMPTS => {
                    debug!(session = %key, "session evicted while acquiring, retrying");
                }
                Ok(None) => {
                    return Err(AmqpError::ConnectionError {
                        host: descriptor.display_host(),
                        reason: "connection closed while acquiring".to_owned(),
                    })
                }
                Err(err) if err.is_lifecycle() => {
                    return Err(AmqpError::ConnectionError {
                        host: descriptor.display_host(),
                        reason: "session evicted while acquiring".to_owned(),
                    })
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        host = descriptor.display_host(),
                        "failure to acquire session"
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn try_acquire(
        &self,
        key: &SessionKey,
        descriptor: &ConnectionDescriptor,
        worker: &WorkerId,
    ) -> Result<Option<Handles>, AmqpError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(AmqpError::PoolClosed);
        }

        let session = self.inner.cache.get_or_create(key, || {
            debug!(session = %key, "creating session");
            Session::new(key.clone(), descriptor.clone(), self.inner.client.clone())
        });
        self.inner.ensure_reaper().await;

        guard::ensure_open(&session, descriptor).await?;

        let connection = session.get_connection().await?;
        let channel = match session.get_channel(worker).await {
            Ok(channel) => channel,
            Err(err) if !connection.is_open() => {
                debug!(
                    error = err.to_string(),
                    session = %key,
                    "connection closed while opening channel"
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if !connection.is_open() || !channel.is_open() {
            return Ok(None);
        }

        Ok(Some((connection, channel)))
    }

    /// Removes and disposes the session for `descriptor`, if cached.
    pub async fn invalidate(&self, descriptor: &ConnectionDescriptor) -> bool {
        let key = descriptor.session_key(self.inner.config.key_policy);
        match self.inner.cache.remove(&key) {
            Some(session) => {
                session.dispose().await;
                true
            }
            None => false,
        }
    }

    /// Stops the reaper and disposes every session. Later acquires fail with
    /// `PoolClosed`.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);

        let handle = self.inner.reaper.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }

        let sessions = self.inner.cache.drain();
        debug!(sessions = sessions.len(), "shutting down connection pool");
        join_all(sessions.iter().map(|(_, session)| session.dispose())).await;
    }
}
