// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Pooled Sessions
//!
//! A [`Session`] is the unit of connection reuse: one broker connection,
//! created on first use, plus one channel per worker. Every accessor call
//! refreshes the session's last-access time, which is the only signal the
//! reaper uses to decide that a session is idle.

use crate::{
    broker::{BrokerChannel, BrokerClient, BrokerConnection},
    descriptor::{ConnectionDescriptor, SessionKey},
    errors::AmqpError,
};
use futures_util::future::join_all;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of a caller that owns a channel within a session.
///
/// Channels are never shared between workers, so every concurrent caller
/// must use its own id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    /// A fresh, unique worker id.
    pub fn random() -> WorkerId {
        WorkerId(Uuid::new_v4().to_string())
    }

    /// An id tied to the current OS thread.
    pub fn current_thread() -> WorkerId {
        WorkerId(format!("{:?}", std::thread::current().id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        WorkerId(value.to_owned())
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        WorkerId(value)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct ConnectionSlot {
    descriptor: ConnectionDescriptor,
    connection: Option<Arc<dyn BrokerConnection>>,
}

/// One broker connection and its per-worker channels.
pub struct Session {
    key: SessionKey,
    client: Arc<dyn BrokerClient>,
    slot: Mutex<ConnectionSlot>,
    channels: Mutex<HashMap<WorkerId, Arc<dyn BrokerChannel>>>,
    origin: Instant,
    /// Milliseconds since `origin`, only ever raised.
    last_access_ms: AtomicU64,
    disposed: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("idle_for", &self.idle_for())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session. No connection is opened until the first accessor
    /// call.
    pub fn new(
        key: SessionKey,
        descriptor: ConnectionDescriptor,
        client: Arc<dyn BrokerClient>,
    ) -> Session {
        Session {
            key,
            client,
            slot: Mutex::new(ConnectionSlot {
                descriptor,
                connection: None,
            }),
            channels: Mutex::new(HashMap::new()),
            origin: Instant::now(),
            last_access_ms: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn last_access(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_access_ms.load(Ordering::Relaxed))
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_access())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_access_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn check_alive(&self) -> Result<(), AmqpError> {
        if self.is_disposed() {
            return Err(AmqpError::SessionDisposed);
        }
        Ok(())
    }

    /// Returns the session's connection, connecting on first use.
    ///
    /// Concurrent first calls wait on the session's own lock, so exactly one
    /// connect happens. A failed connect leaves the slot empty and the next
    /// call tries again.
    pub async fn get_connection(&self) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        self.touch();
        self.check_alive()?;

        let mut slot = self.slot.lock().await;
        self.check_alive()?;

        if let Some(conn) = &slot.connection {
            return Ok(conn.clone());
        }

        debug!(session = %self.key, "opening session connection");
        let conn = self.client.connect(&slot.descriptor).await?;
        slot.connection = Some(conn.clone());

        Ok(conn)
    }

    /// Returns the channel owned by `worker`, opening one if the worker has
    /// none or its previous channel was closed.
    pub async fn get_channel(&self, worker: &WorkerId) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        self.touch();
        let conn = self.get_connection().await?;

        let mut channels = self.channels.lock().await;
        self.check_alive()?;

        if let Some(channel) = channels.get(worker) {
            if channel.is_open() {
                return Ok(channel.clone());
            }
            debug!(session = %self.key, worker = %worker, "replacing closed channel");
        }

        let channel = conn.open_channel().await?;
        channels.insert(worker.clone(), channel.clone());

        Ok(channel)
    }

    /// The current connection, if one was created, without creating one.
    pub async fn current_connection(&self) -> Option<Arc<dyn BrokerConnection>> {
        self.slot.lock().await.connection.clone()
    }

    /// Descriptor used for the next connect.
    pub async fn descriptor(&self) -> ConnectionDescriptor {
        self.slot.lock().await.descriptor.clone()
    }

    /// Points the next connect at `descriptor`.
    pub async fn retarget(&self, descriptor: &ConnectionDescriptor) {
        let mut slot = self.slot.lock().await;
        if slot.descriptor != *descriptor {
            slot.descriptor = descriptor.clone();
        }
    }

    /// Tears down the channels and the connection so the next accessor call
    /// rebuilds them. Nothing happens if the slot no longer holds `expected`,
    /// i.e. another caller already rebuilt it.
    ///
    /// Returns whether a teardown took place.
    pub async fn reset(&self, expected: &Arc<dyn BrokerConnection>) -> bool {
        let mut slot = self.slot.lock().await;

        let matches = slot
            .connection
            .as_ref()
            .is_some_and(|current| same_handle(current, expected));
        if !matches {
            return false;
        }

        let conn = slot.connection.take();
        let channels: Vec<_> = self.channels.lock().await.drain().collect();

        close_channels(&self.key, channels).await;
        if let Some(conn) = conn {
            close_connection(&self.key, conn).await;
        }

        true
    }

    /// Closes every channel, then the connection. Close failures are logged
    /// and swallowed. Calling it again does nothing.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(session = %self.key, "disposing session");

        let channels: Vec<_> = self.channels.lock().await.drain().collect();
        close_channels(&self.key, channels).await;

        let conn = self.slot.lock().await.connection.take();
        if let Some(conn) = conn {
            close_connection(&self.key, conn).await;
        }
    }
}

fn same_handle<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

async fn close_channels(key: &SessionKey, channels: Vec<(WorkerId, Arc<dyn BrokerChannel>)>) {
    join_all(channels.into_iter().map(|(worker, channel)| async move {
        if let Err(err) = channel.close().await {
            warn!(
                error = err.to_string(),
                session = %key,
                worker = %worker,
                "failure to close channel"
            );
        }
    }))
    .await;
}

async fn close_connection(key: &SessionKey, conn: Arc<dyn BrokerConnection>) {
    if let Err(err) = conn.close().await {
        warn!(error = err.to_string(), session = %key, "failure to close connection");
    }
}
