// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Declaration
//!
//! This module provides the queue definition used when a publish declares
//! its destination queue before sending.

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use std::collections::BTreeMap;

/// Constant for the argument selecting the queue type
pub const AMQP_HEADERS_QUEUE_TYPE: &str = "x-queue-type";
/// Queue type value for replicated quorum queues
pub const QUORUM_QUEUE_TYPE: &str = "quorum";

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure queue
/// definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) quorum: bool,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is non-durable and classic.
    /// An empty name lets the server generate one.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: false,
            delete: false,
            quorum: false,
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when its last consumer unsubscribes.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Declares the queue as a quorum queue. Quorum queues only support
    /// durable settings.
    pub fn quorum(mut self) -> Self {
        self.quorum = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }

    pub fn is_quorum(&self) -> bool {
        self.quorum
    }

    /// Declaration arguments for this queue.
    pub fn arguments(&self) -> FieldTable {
        let mut args = BTreeMap::new();

        if self.quorum {
            args.insert(
                ShortString::from(AMQP_HEADERS_QUEUE_TYPE),
                AMQPValue::LongString(LongString::from(QUORUM_QUEUE_TYPE)),
            );
        }

        FieldTable::from(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_queue_has_no_arguments() {
        let def = QueueDefinition::new("orders").durable();
        assert!(def.arguments().inner().is_empty());
        assert!(def.is_durable());
        assert!(!def.is_auto_delete());
        assert!(!def.is_quorum());
    }

    #[test]
    fn quorum_queue_sets_queue_type() {
        let def = QueueDefinition::new("orders").durable().quorum();
        let args = def.arguments();

        assert!(def.is_quorum());

        assert_eq!(
            args.inner().get(&ShortString::from(AMQP_HEADERS_QUEUE_TYPE)),
            Some(&AMQPValue::LongString(LongString::from(QUORUM_QUEUE_TYPE)))
        );
    }
}
