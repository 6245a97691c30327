// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Idle Session Reaper
//!
//! A background task that evicts sessions nobody used for a while. Once per
//! tick it removes at most one idle session from the cache and disposes it
//! outside the map. When the cache has stayed empty for the grace window the
//! task ends; the pool spawns a new one on the next acquire.

use crate::{config::PoolConfig, pool::PoolInner};
use std::{sync::Weak, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

/// Timing policy of the reaper loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReaperSettings {
    pub interval: Duration,
    pub idle_timeout: Duration,
    pub empty_grace: Duration,
}

impl From<&PoolConfig> for ReaperSettings {
    fn from(cfg: &PoolConfig) -> Self {
        ReaperSettings {
            interval: cfg.reaper_interval.max(Duration::from_millis(1)),
            idle_timeout: cfg.idle_timeout,
            empty_grace: cfg.empty_grace,
        }
    }
}

/// A running reaper and the means to stop it.
pub(crate) struct ReaperHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    pub(crate) fn spawn(pool: Weak<PoolInner>, settings: ReaperSettings) -> ReaperHandle {
        let (stop, stop_rx) = watch::channel(false);
        let join = tokio::spawn(run(pool, settings, stop_rx));
        debug!("reaper started");

        ReaperHandle { stop, join }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signals the loop to exit and waits for it.
    pub(crate) async fn stop(self) {
        // The loop may already be gone; nothing to signal then.
        let _ = self.stop.send(true);
        if let Err(err) = self.join.await {
            warn!(error = err.to_string(), "reaper task ended abnormally");
        }
    }
}

async fn run(pool: Weak<PoolInner>, settings: ReaperSettings, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut empty_since: Option<Instant> = None;

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    debug!("reaper stopped");
                    return;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let Some(pool) = pool.upgrade() else {
            debug!("pool dropped, reaper exiting");
            return;
        };

        if pool.cache.is_empty() {
            let since = *empty_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= settings.empty_grace && pool.release_reaper_if_empty().await {
                debug!("cache empty for the grace window, reaper exiting");
                return;
            }
            continue;
        }
        empty_since = None;

        if let Some((key, session)) = pool.cache.evict_stale(settings.idle_timeout) {
            debug!(session = %key, idle = ?session.idle_for(), "evicting idle session");
            session.dispose().await;
        }
    }
}
