// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Session Cache
//!
//! Maps a [`SessionKey`] to its shared [`Session`]. Insertion is atomic per
//! key, so callers racing on a cold key all observe the same session.
//! Removal detaches the entry and hands it back so the caller disposes it
//! without holding any map lock.

use crate::{descriptor::SessionKey, session::Session};
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};

#[derive(Debug, Default)]
pub struct SessionCache {
    sessions: DashMap<SessionKey, Arc<Session>>,
}

impl SessionCache {
    pub fn new() -> SessionCache {
        SessionCache::default()
    }

    /// Returns the session for `key`, building it with `factory` if absent.
    ///
    /// The factory runs at most once per key while the entry exists. It must
    /// not perform I/O since it runs under the shard lock; sessions connect
    /// lazily on first access instead.
    pub fn get_or_create<F>(&self, key: &SessionKey, factory: F) -> Arc<Session>
    where
        F: FnOnce() -> Session,
    {
        if let Some(existing) = self.sessions.get(key) {
            return existing.value().clone();
        }

        self.sessions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(factory()))
            .value()
            .clone()
    }

    /// Detaches the session for `key`.
    pub fn remove(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.remove(key).map(|(_, session)| session)
    }

    /// Detaches one session idle for at least `idle`, if any.
    ///
    /// The idle check is repeated at removal time, so a session touched
    /// between the scan and the removal stays cached.
    pub fn evict_stale(&self, idle: Duration) -> Option<(SessionKey, Arc<Session>)> {
        let key = self
            .sessions
            .iter()
            .find(|entry| entry.value().idle_for() >= idle)
            .map(|entry| entry.key().clone())?;

        self.sessions
            .remove_if(&key, |_, session| session.idle_for() >= idle)
    }

    /// Detaches every session.
    pub fn drain(&self) -> Vec<(SessionKey, Arc<Session>)> {
        let keys: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.sessions.remove(&key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
