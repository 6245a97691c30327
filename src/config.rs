// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Pool Configuration
//!
//! Policy values for session reuse and eviction. Every value has a default
//! and may be overridden from the environment with [`PoolConfig::from_env`].

use std::{env, str::FromStr, time::Duration};
use tracing::warn;

/// Env var for the idle threshold, in seconds
pub const ENV_IDLE_TIMEOUT_SECS: &str = "RABBITMQ_POOL_IDLE_TIMEOUT_SECS";
/// Env var for the reaper tick, in milliseconds
pub const ENV_REAPER_INTERVAL_MS: &str = "RABBITMQ_POOL_REAPER_INTERVAL_MS";
/// Env var for the empty-cache grace window, in seconds
pub const ENV_EMPTY_GRACE_SECS: &str = "RABBITMQ_POOL_EMPTY_GRACE_SECS";
/// Env var for the fallback connect timeout, in seconds
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "RABBITMQ_POOL_CONNECT_TIMEOUT_SECS";
/// Env var selecting the cache key policy (`host` or `descriptor`)
pub const ENV_KEY_POLICY: &str = "RABBITMQ_POOL_KEY_POLICY";
/// Env var for the connection name announced to the broker
pub const ENV_CONNECTION_NAME: &str = "RABBITMQ_POOL_CONNECTION_NAME";

/// How descriptors are turned into cache keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyPolicy {
    /// Key by every connection-relevant field of the descriptor.
    #[default]
    Descriptor,
    /// Key by the raw host field only. Descriptors sharing a host share a
    /// session even when their credentials differ.
    Host,
}

impl FromStr for KeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "descriptor" => Ok(KeyPolicy::Descriptor),
            "host" => Ok(KeyPolicy::Host),
            other => Err(format!("unknown key policy `{}`", other)),
        }
    }
}

/// Pool-wide policy values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// A session unused for this long is eligible for eviction.
    pub idle_timeout: Duration,
    /// Period of the reaper's scan.
    pub reaper_interval: Duration,
    /// How long the cache may stay empty before the reaper stops.
    pub empty_grace: Duration,
    /// Connect timeout used when the descriptor does not set one.
    pub connect_timeout: Duration,
    pub key_policy: KeyPolicy,
    /// Name announced to the broker for every connection.
    pub connection_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            idle_timeout: Duration::from_secs(10),
            reaper_interval: Duration::from_secs(1),
            empty_grace: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(30),
            key_policy: KeyPolicy::default(),
            connection_name: "rabbitmq-tasks".to_owned(),
        }
    }
}

impl PoolConfig {
    /// Builds a configuration from the defaults and any `RABBITMQ_POOL_*`
    /// environment overrides. Unparsable values are logged and ignored.
    pub fn from_env() -> PoolConfig {
        let mut cfg = PoolConfig::default();

        if let Some(secs) = read_env::<u64>(ENV_IDLE_TIMEOUT_SECS) {
            cfg.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = read_env::<u64>(ENV_REAPER_INTERVAL_MS) {
            cfg.reaper_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = read_env::<u64>(ENV_EMPTY_GRACE_SECS) {
            cfg.empty_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env::<u64>(ENV_CONNECT_TIMEOUT_SECS) {
            cfg.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = read_env::<KeyPolicy>(ENV_KEY_POLICY) {
            cfg.key_policy = policy;
        }
        if let Ok(name) = env::var(ENV_CONNECTION_NAME) {
            if !name.trim().is_empty() {
                cfg.connection_name = name;
            }
        }

        cfg
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn with_empty_grace(mut self, grace: Duration) -> Self {
        self.empty_grace = grace;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policy = policy;
        self
    }

    pub fn with_connection_name(mut self, name: &str) -> Self {
        self.connection_name = name.to_owned();
        self
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(err) => {
            warn!(
                error = err.to_string(),
                key = key,
                value = raw,
                "ignoring invalid pool setting"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reaper_policy() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.idle_timeout, Duration::from_secs(10));
        assert_eq!(cfg.reaper_interval, Duration::from_secs(1));
        assert_eq!(cfg.empty_grace, Duration::from_secs(20));
        assert_eq!(cfg.key_policy, KeyPolicy::Descriptor);
    }

    #[test]
    fn key_policy_parses_case_insensitively() {
        assert_eq!("HOST".parse::<KeyPolicy>(), Ok(KeyPolicy::Host));
        assert_eq!(" descriptor ".parse::<KeyPolicy>(), Ok(KeyPolicy::Descriptor));
        assert!("uri".parse::<KeyPolicy>().is_err());
    }

    #[test]
    fn from_env_applies_overrides_and_skips_garbage() {
        env::set_var(ENV_IDLE_TIMEOUT_SECS, "42");
        env::set_var(ENV_REAPER_INTERVAL_MS, "not-a-number");
        env::set_var(ENV_KEY_POLICY, "host");

        let cfg = PoolConfig::from_env();

        env::remove_var(ENV_IDLE_TIMEOUT_SECS);
        env::remove_var(ENV_REAPER_INTERVAL_MS);
        env::remove_var(ENV_KEY_POLICY);

        assert_eq!(cfg.idle_timeout, Duration::from_secs(42));
        assert_eq!(cfg.reaper_interval, Duration::from_secs(1));
        assert_eq!(cfg.key_policy, KeyPolicy::Host);
    }

    #[test]
    fn builders_override_fields() {
        let cfg = PoolConfig::default()
            .with_idle_timeout(Duration::from_secs(3))
            .with_connection_name("billing");
        assert_eq!(cfg.idle_timeout, Duration::from_secs(3));
        assert_eq!(cfg.connection_name, "billing");
    }
}
