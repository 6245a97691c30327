// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! The publish task: sends one message to an exchange or queue through the
//! connection pool, optionally declaring and binding the destination queue
//! first. Trace context is propagated in the message headers.

use crate::{
    broker::BrokerChannel,
    descriptor::ConnectionDescriptor,
    errors::AmqpError,
    headers::{apply_headers, Header},
    otel,
    pool::ConnectionPool,
    queue::QueueDefinition,
    session::WorkerId,
};
use lapin::BasicProperties;
use opentelemetry::Context;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

/// Delivery mode of messages that survive a broker restart
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;
/// Delivery mode of messages kept in memory only
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;

/// Message body to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Text sent as its UTF-8 bytes.
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }

    fn format(&self) -> &'static str {
        match self {
            Payload::Text(_) => "String",
            Payload::Bytes(_) => "ByteArray",
        }
    }
}

/// What to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishInput {
    pub payload: Payload,
    #[serde(default)]
    pub headers: Vec<Header>,
}

impl PublishInput {
    pub fn text(text: &str) -> PublishInput {
        PublishInput {
            payload: Payload::Text(text.to_owned()),
            headers: vec![],
        }
    }

    pub fn bytes(bytes: &[u8]) -> PublishInput {
        PublishInput {
            payload: Payload::Bytes(bytes.to_vec()),
            headers: vec![],
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }
}

/// Where to publish, and whether to declare the queue first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PublishTarget {
    /// Queue to declare; an empty name lets the server pick one.
    pub queue_name: String,
    pub exchange_name: String,
    /// Defaults to the queue name when publishing to the default exchange.
    pub routing_key: String,
    /// Declare the queue (and bind it to the exchange) before publishing.
    pub create: bool,
    pub auto_delete: bool,
    /// Durable queue and persistent messages.
    pub durable: bool,
    pub quorum: bool,
}

impl Default for PublishTarget {
    fn default() -> Self {
        PublishTarget {
            queue_name: String::new(),
            exchange_name: String::new(),
            routing_key: String::new(),
            create: false,
            auto_delete: false,
            durable: true,
            quorum: true,
        }
    }
}

impl PublishTarget {
    /// Publishes straight to `queue` through the default exchange.
    pub fn queue(queue: &str) -> PublishTarget {
        PublishTarget {
            queue_name: queue.to_owned(),
            ..Default::default()
        }
    }

    pub fn exchange(mut self, exchange: &str, routing_key: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self.routing_key = routing_key.to_owned();
        self
    }

    /// Declares the queue before publishing.
    pub fn create(mut self, durable: bool, auto_delete: bool, quorum: bool) -> Self {
        self.create = true;
        self.durable = durable;
        self.auto_delete = auto_delete;
        self.quorum = quorum;
        self
    }

    fn routing_key(&self) -> &str {
        if self.routing_key.is_empty() && self.exchange_name.is_empty() {
            return &self.queue_name;
        }
        &self.routing_key
    }

    fn definition(&self) -> QueueDefinition {
        let mut def = QueueDefinition::new(&self.queue_name);
        if self.durable {
            def = def.durable();
        }
        if self.auto_delete {
            def = def.delete();
        }
        if self.quorum {
            def = def.quorum();
        }
        def
    }
}

/// Outcome of a publish, echoing what was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    /// `String` or `ByteArray`, after the input payload.
    pub data_format: String,
    pub data_string: String,
    pub data_byte_array: Vec<u8>,
    /// Custom headers sent with the message.
    pub headers: BTreeMap<String, String>,
}

/// Publishes messages through a [`ConnectionPool`].
pub struct RabbitMQPublisher {
    pool: ConnectionPool,
}

impl RabbitMQPublisher {
    /// Creates a new RabbitMQ publisher.
    ///
    /// # Parameters
    /// * `pool` - The pool connections and channels are taken from
    ///
    /// # Returns
    /// An Arc-wrapped RabbitMQPublisher instance for thread-safe sharing
    pub fn new(pool: ConnectionPool) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher { pool })
    }

    /// Publishes `input` to `target` on the broker described by `descriptor`,
    /// using the channel owned by `worker`.
    ///
    /// # Returns
    /// The echoed payload and custom headers on success, `EmptyPayload`
    /// before any network activity when there is nothing to send, or the
    /// pool/broker error otherwise.
    pub async fn publish(
        &self,
        worker: &WorkerId,
        descriptor: &ConnectionDescriptor,
        target: &PublishTarget,
        input: &PublishInput,
    ) -> Result<PublishResult, AmqpError> {
        let data = input.payload.as_bytes();
        if data.is_empty() {
            return Err(AmqpError::EmptyPayload);
        }

        let (_, channel) = self.pool.acquire(descriptor, worker).await?;

        if target.create {
            self.declare(channel.as_ref(), target).await?;
        }

        let mut btree = BTreeMap::new();
        otel::inject_context(&Context::current(), &mut btree);

        let delivery_mode = if target.durable {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        };
        let properties = BasicProperties::default().with_delivery_mode(delivery_mode);
        let (properties, headers) = apply_headers(properties, &input.headers, &mut btree);

        if let Err(err) = channel
            .basic_publish(&target.exchange_name, target.routing_key(), data, properties)
            .await
        {
            error!(
                error = err.to_string(),
                exchange = target.exchange_name,
                "error publishing message"
            );
            return Err(err);
        }
        debug!(
            exchange = target.exchange_name,
            routing_key = target.routing_key(),
            "message published"
        );

        Ok(PublishResult {
            data_format: input.payload.format().to_owned(),
            data_string: String::from_utf8_lossy(data).into_owned(),
            data_byte_array: data.to_vec(),
            headers,
        })
    }

    async fn declare(
        &self,
        channel: &dyn BrokerChannel,
        target: &PublishTarget,
    ) -> Result<(), AmqpError> {
        channel.queue_declare(&target.definition()).await?;

        if !target.exchange_name.is_empty() {
            channel
                .queue_bind(&target.queue_name, &target.exchange_name, &target.routing_key)
                .await?;
        }

        Ok(())
    }
}
