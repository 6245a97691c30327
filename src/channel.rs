// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! This module backs the broker traits with `lapin`. It establishes
//! connections from a [`ConnectionDescriptor`] and wraps `lapin` channels so
//! the pool can open, use and close them.

use crate::{
    broker::{BrokerChannel, BrokerClient, BrokerConnection, ReceivedMessage},
    descriptor::ConnectionDescriptor,
    errors::AmqpError,
    queue::QueueDefinition,
};
use async_trait::async_trait;
use lapin::{
    options::{
        BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
        BasicRejectOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, error};

/// Reply code sent with a normal close
const REPLY_SUCCESS: u16 = 200;

/// [`BrokerClient`] backed by `lapin`.
#[derive(Debug, Clone)]
pub struct LapinBrokerClient {
    connection_name: String,
    default_timeout: Duration,
}

impl LapinBrokerClient {
    /// Creates a client announcing `connection_name` to the broker and
    /// giving up on connects after `default_timeout` unless the descriptor
    /// sets its own timeout.
    pub fn new(connection_name: &str, default_timeout: Duration) -> LapinBrokerClient {
        LapinBrokerClient {
            connection_name: connection_name.to_owned(),
            default_timeout,
        }
    }
}

#[async_trait]
impl BrokerClient for LapinBrokerClient {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        let uri = descriptor.resolve()?;
        let host = uri.authority.host.clone();
        let timeout = descriptor.timeout().unwrap_or(self.default_timeout);

        debug!(host = host, "creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.clone()));

        let conn = connect_within(&host, timeout, Connection::connect_uri(uri, options)).await?;
        debug!(host = host, "amqp connected");

        Ok(Arc::new(LapinConnection { conn, host }))
    }
}

/// Awaits a connect attempt for at most `timeout`, mapping failures to
/// errors naming `host`.
async fn connect_within<F, T>(host: &str, timeout: Duration, attempt: F) -> Result<T, AmqpError>
where
    F: Future<Output = Result<T, lapin::Error>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(c)) => Ok(c),
        Ok(Err(err)) => {
            error!(error = err.to_string(), host = host, "failure to connect");
            Err(AmqpError::ConnectionError {
                host: host.to_owned(),
                reason: err.to_string(),
            })
        }
        Err(_) => {
            error!(host = host, "connection attempt timed out");
            Err(AmqpError::ConnectionTimeout {
                host: host.to_owned(),
                seconds: timeout.as_secs(),
            })
        }
    }
}

/// A `lapin` connection and the host it was opened against.
pub struct LapinConnection {
    conn: Connection,
    host: String,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    fn is_open(&self) -> bool {
        self.conn.status().connected()
    }

    fn bound_host(&self) -> String {
        self.host.clone()
    }

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel { channel: c }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError {
                    host: self.host.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.is_open() {
            return Ok(());
        }

        self.conn
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}

/// A `lapin` channel.
pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.is_open() {
            return Ok(());
        }

        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name());

        match self
            .channel
            .queue_declare(
                def.name(),
                QueueDeclareOptions {
                    passive: false,
                    durable: def.is_durable(),
                    exclusive: false,
                    auto_delete: def.is_auto_delete(),
                    nowait: false,
                },
                def.arguments(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name().to_owned()))
            }
            _ => {
                debug!("queue: {} was created", def.name());
                Ok(())
            }
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        match self
            .channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn basic_get(
        &self,
        queue: &str,
        auto_ack: bool,
    ) -> Result<Option<ReceivedMessage>, AmqpError> {
        match self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: auto_ack })
            .await
        {
            Ok(Some(msg)) => Ok(Some(ReceivedMessage {
                delivery_tag: msg.delivery.delivery_tag,
                message_count: msg.message_count,
                payload: msg.delivery.data.clone(),
                properties: msg.delivery.properties.clone(),
            })),
            Ok(None) => Ok(None),
            Err(err) => {
                error!(error = err.to_string(), queue = queue, "error getting message");
                Err(AmqpError::GetMessageError(err.to_string()))
            }
        }
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError(delivery_tag)
            })
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError(delivery_tag)
            })
    }

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling reject msg");
                AmqpError::RejectMessageError(delivery_tag)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_fails_fast_on_missing_host() {
        let client = LapinBrokerClient::new("tests", Duration::from_secs(1));
        let err = client
            .connect(&ConnectionDescriptor::host(""))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AmqpError::MissingHostConfiguration(_)));
    }

    #[tokio::test]
    async fn connect_rejects_invalid_uri_before_dialing() {
        let client = LapinBrokerClient::new("tests", Duration::from_secs(1));
        let err = client
            .connect(&ConnectionDescriptor::uri("ftp://nowhere"))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AmqpError::InvalidUri(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_after_timeout() {
        let attempt = std::future::pending::<Result<(), lapin::Error>>();

        let err = connect_within("rabbit-a", Duration::from_secs(5), attempt)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AmqpError::ConnectionTimeout {
                host: "rabbit-a".to_owned(),
                seconds: 5,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_within_timeout_succeeds() {
        let attempt = async {
            tokio::time::sleep(Duration::from_secs(4)).await;
            Ok::<_, lapin::Error>(7)
        };

        assert_eq!(
            connect_within("rabbit-a", Duration::from_secs(5), attempt).await,
            Ok(7)
        );
    }

    #[tokio::test]
    async fn refused_connect_names_the_host() {
        let attempt = async { Err::<(), _>(lapin::Error::ChannelsLimitReached) };

        let err = connect_within("rabbit-a", Duration::from_secs(5), attempt)
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::ConnectionError { ref host, .. } if host == "rabbit-a"));
    }
}
