// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connectivity Guard
//!
//! Runs before every publish or read. A session's connection is rebuilt when
//! the broker closed it, or when the caller now targets a different host
//! than the one the connection is bound to. Neither case is reported to the
//! caller; the next accessor call simply connects again.

use crate::{descriptor::ConnectionDescriptor, errors::AmqpError, session::Session};
use tracing::{debug, info};

/// Why a connection has to be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Staleness {
    HostChanged { bound: String, target: String },
    RemotelyClosed,
}

/// Makes sure the session's next accessor call yields a connection that is
/// open and bound to the descriptor's host.
///
/// Only descriptor problems are returned as errors. The check is not atomic
/// with respect to other callers of the same session: a concurrent caller
/// may briefly see a closed handle and has to come back through here.
pub async fn ensure_open(
    session: &Session,
    descriptor: &ConnectionDescriptor,
) -> Result<(), AmqpError> {
    let target = descriptor.target_host()?;

    let Some(conn) = session.current_connection().await else {
        session.retarget(descriptor).await;
        return Ok(());
    };

    let staleness = if !conn.is_open() {
        Some(Staleness::RemotelyClosed)
    } else {
        let bound = conn.bound_host();
        if bound != target {
            Some(Staleness::HostChanged { bound, target })
        } else {
            None
        }
    };

    match staleness {
        None => {
            session.retarget(descriptor).await;
        }
        Some(Staleness::RemotelyClosed) => {
            debug!(session = %session.key(), "connection reported closed, rebuilding");
            session.reset(&conn).await;
            session.retarget(descriptor).await;
        }
        Some(Staleness::HostChanged { bound, target }) => {
            info!(
                session = %session.key(),
                bound = bound,
                target = target,
                "connection host changed, rebuilding"
            );
            session.reset(&conn).await;
            session.retarget(descriptor).await;
        }
    }

    Ok(())
}
