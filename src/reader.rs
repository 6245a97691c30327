// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Reader
//!
//! The read task: pulls up to a fixed number of messages from a queue with
//! `basic.get`, returning each body both base64 encoded and as UTF-8 text.
//! Depending on the ack mode messages are acknowledged by the server, settled
//! right after the read, or left for a later [`RabbitMQReader::acknowledge`]
//! on the same worker's channel.

use crate::{
    broker::{BrokerChannel, ReceivedMessage},
    descriptor::ConnectionDescriptor,
    errors::AmqpError,
    headers::flatten_properties,
    pool::ConnectionPool,
    session::WorkerId,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

/// How messages returned by a read get settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadAckMode {
    /// Left unsettled for a later [`RabbitMQReader::acknowledge`].
    #[default]
    ManualAck,
    /// Acknowledged by the server on delivery.
    AutoAck,
    AutoNack,
    AutoNackAndRequeue,
    AutoReject,
    AutoRejectAndRequeue,
}

impl ReadAckMode {
    fn settlement(self) -> Option<ManualAckType> {
        match self {
            ReadAckMode::ManualAck | ReadAckMode::AutoAck => None,
            ReadAckMode::AutoNack => Some(ManualAckType::Nack),
            ReadAckMode::AutoNackAndRequeue => Some(ManualAckType::NackAndRequeue),
            ReadAckMode::AutoReject => Some(ManualAckType::Reject),
            ReadAckMode::AutoRejectAndRequeue => Some(ManualAckType::RejectAndRequeue),
        }
    }
}

/// Settlement applied to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualAckType {
    Ack,
    Nack,
    NackAndRequeue,
    Reject,
    RejectAndRequeue,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    pub queue_name: String,
    /// Upper bound of messages fetched by one read.
    pub read_message_count: u32,
    pub ack_mode: ReadAckMode,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            queue_name: String::new(),
            read_message_count: 1,
            ack_mode: ReadAckMode::ManualAck,
        }
    }
}

impl ReadOptions {
    pub fn new(queue_name: &str, read_message_count: u32, ack_mode: ReadAckMode) -> ReadOptions {
        ReadOptions {
            queue_name: queue_name.to_owned(),
            read_message_count,
            ack_mode,
        }
    }
}

/// A message as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub data: String,
    pub headers: BTreeMap<String, String>,
    /// Messages left in the queue when this one was fetched.
    pub messages_count: u32,
    pub delivery_tag: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadResult {
    pub success: bool,
    pub messages_base64: Vec<Message>,
    pub messages_utf8: Vec<Message>,
}

/// Reads messages through a [`ConnectionPool`].
pub struct RabbitMQReader {
    pool: ConnectionPool,
}

impl RabbitMQReader {
    pub fn new(pool: ConnectionPool) -> Arc<RabbitMQReader> {
        Arc::new(RabbitMQReader { pool })
    }

    /// Fetches up to `options.read_message_count` messages, stopping at the
    /// first empty get.
    pub async fn read(
        &self,
        worker: &WorkerId,
        descriptor: &ConnectionDescriptor,
        options: &ReadOptions,
    ) -> Result<ReadResult, AmqpError> {
        let (_, channel) = self.pool.acquire(descriptor, worker).await?;
        let auto_ack = options.ack_mode == ReadAckMode::AutoAck;

        let mut received = Vec::new();
        for _ in 0..options.read_message_count {
            match channel.basic_get(&options.queue_name, auto_ack).await {
                Ok(Some(msg)) => received.push(msg),
                Ok(None) => break,
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        queue = options.queue_name,
                        "error reading message"
                    );
                    return Err(err);
                }
            }
        }
        debug!(
            queue = options.queue_name,
            count = received.len(),
            "messages read"
        );

        if let Some(ack) = options.ack_mode.settlement() {
            for msg in &received {
                settle(channel.as_ref(), ack, msg.delivery_tag).await?;
            }
        }

        Ok(ReadResult {
            success: true,
            messages_base64: received.iter().map(base64_message).collect(),
            messages_utf8: received.iter().map(utf8_message).collect(),
        })
    }

    /// Settles a message previously read in `ManualAck` mode by `worker`.
    ///
    /// Delivery tags are scoped to a channel, so the same worker and
    /// descriptor that performed the read must be used.
    pub async fn acknowledge(
        &self,
        worker: &WorkerId,
        descriptor: &ConnectionDescriptor,
        ack: ManualAckType,
        delivery_tag: u64,
    ) -> Result<(), AmqpError> {
        let (_, channel) = self.pool.acquire(descriptor, worker).await?;
        settle(channel.as_ref(), ack, delivery_tag).await
    }
}

async fn settle(
    channel: &dyn BrokerChannel,
    ack: ManualAckType,
    delivery_tag: u64,
) -> Result<(), AmqpError> {
    match ack {
        ManualAckType::Ack => channel.basic_ack(delivery_tag).await,
        ManualAckType::Nack => channel.basic_nack(delivery_tag, false).await,
        ManualAckType::NackAndRequeue => channel.basic_nack(delivery_tag, true).await,
        ManualAckType::Reject => channel.basic_reject(delivery_tag, false).await,
        ManualAckType::RejectAndRequeue => channel.basic_reject(delivery_tag, true).await,
    }
}

fn base64_message(msg: &ReceivedMessage) -> Message {
    Message {
        data: STANDARD.encode(&msg.payload),
        headers: flatten_properties(&msg.properties),
        messages_count: msg.message_count,
        delivery_tag: msg.delivery_tag,
    }
}

fn utf8_message(msg: &ReceivedMessage) -> Message {
    Message {
        data: String::from_utf8_lossy(&msg.payload).into_owned(),
        headers: flatten_properties(&msg.properties),
        messages_count: msg.message_count,
        delivery_tag: msg.delivery_tag,
    }
}
