// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Tasks
//!
//! This module provides the error type shared by the connection pool and the
//! publish/read tasks. Only connect failures and descriptor problems are meant
//! to reach callers of the pool; close failures are produced by broker handles
//! but are logged and swallowed by the session that owns them.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Every variant carries plain strings so the error stays comparable in
/// tests and cheap to clone into logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// The descriptor lacks a field required by its authentication method
    #[error("missing host configuration: {0}")]
    MissingHostConfiguration(String),

    /// The descriptor carries a URI that cannot be parsed
    #[error("invalid amqp uri: {0}")]
    InvalidUri(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect to `{host}`: {reason}")]
    ConnectionError { host: String, reason: String },

    /// The connection handshake did not finish within the allowed time
    #[error("connection to `{host}` timed out after {seconds}s")]
    ConnectionTimeout { host: String, seconds: u64 },

    /// Error creating a channel from an established connection
    #[error("failure to create a channel on `{host}`: {reason}")]
    ChannelError { host: String, reason: String },

    /// Error closing a channel or a connection
    #[error("failure to close: {0}")]
    CloseError(String),

    /// The session was evicted or disposed while in use
    #[error("session disposed")]
    SessionDisposed,

    /// The pool was shut down
    #[error("connection pool closed")]
    PoolClosed,

    /// The message to publish has no content
    #[error("message data is missing")]
    EmptyPayload,

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error fetching a message from a queue
    #[error("failure to get message: {0}")]
    GetMessageError(String),

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(u64),

    /// Error negative-acknowledging a message
    #[error("failure to nack message `{0}`")]
    NackMessageError(u64),

    /// Error rejecting a message
    #[error("failure to reject message `{0}`")]
    RejectMessageError(u64),
}

impl AmqpError {
    /// Whether the failure came from a handle going away underneath the
    /// caller, in which case a fresh lookup may succeed.
    pub(crate) fn is_lifecycle(&self) -> bool {
        matches!(self, AmqpError::SessionDisposed)
    }
}
