// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Client Capability
//!
//! The pool never talks to `lapin` directly. It goes through these traits,
//! which expose just the operations the publish and read tasks need: connect,
//! open a channel, declare, publish, get and settle. The `lapin`-backed
//! implementation lives in [`crate::channel`].

use crate::{descriptor::ConnectionDescriptor, errors::AmqpError, queue::QueueDefinition};
use async_trait::async_trait;
use lapin::BasicProperties;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// A message fetched with `basic.get`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceivedMessage {
    pub delivery_tag: u64,
    /// Messages left in the queue after this one.
    pub message_count: u32,
    pub payload: Vec<u8>,
    pub properties: BasicProperties,
}

/// Opens connections to a broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Resolves the descriptor and opens a connection, honoring its timeout.
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn BrokerConnection>, AmqpError>;
}

/// An open (or formerly open) broker connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn is_open(&self) -> bool;

    /// Host the connection was established against.
    fn bound_host(&self) -> String;

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;

    /// Closes the connection. Calling it on a closed connection is a no-op.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// A channel multiplexed over a [`BrokerConnection`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Closes the channel. Calling it on a closed channel is a no-op.
    async fn close(&self) -> Result<(), AmqpError>;

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    async fn basic_get(
        &self,
        queue: &str,
        auto_ack: bool,
    ) -> Result<Option<ReceivedMessage>, AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock broker wired to a shared [`Probe`] that records what the code
    //! under test did and lets tests simulate broker-side failures.

    use super::*;
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Mutex,
        },
    };

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Published {
        pub exchange: String,
        pub routing_key: String,
        pub payload: Vec<u8>,
        pub properties: BasicProperties,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Settlement {
        Ack(u64),
        Nack(u64, bool),
        Reject(u64, bool),
    }

    #[derive(Default)]
    pub(crate) struct Probe {
        pub connects: AtomicUsize,
        pub channels_opened: AtomicUsize,
        pub channels_closed: AtomicUsize,
        pub connections_closed: AtomicUsize,
        pub fail_connect: AtomicBool,
        pub fail_close: AtomicBool,
        /// Channel opens that find their connection dropped just before.
        pub drop_before_channel: AtomicUsize,
        /// Open flag of every connection handed out, in creation order.
        pub connections: Mutex<Vec<Arc<AtomicBool>>>,
        pub declared: Mutex<Vec<QueueDefinition>>,
        pub bound: Mutex<Vec<(String, String, String)>>,
        pub published: Mutex<Vec<Published>>,
        pub queue: Mutex<VecDeque<ReceivedMessage>>,
        pub gets: Mutex<Vec<(String, bool)>>,
        pub settled: Mutex<Vec<Settlement>>,
    }

    impl Probe {
        pub fn new() -> Arc<Probe> {
            Arc::new(Probe::default())
        }

        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        /// Simulates the broker dropping the `idx`-th connection.
        pub fn drop_connection(&self, idx: usize) {
            self.connections.lock().unwrap()[idx].store(false, Ordering::SeqCst);
        }

        pub fn enqueue(&self, msg: ReceivedMessage) {
            self.queue.lock().unwrap().push_back(msg);
        }
    }

    /// Compares handle identity.
    pub(crate) fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
        Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
    }

    pub(crate) fn mock_client(probe: Arc<Probe>) -> MockBrokerClient {
        let mut client = MockBrokerClient::new();
        client
            .expect_connect()
            .returning(move |desc: &ConnectionDescriptor| {
                probe.connects.fetch_add(1, Ordering::SeqCst);
                let host = desc.target_host()?;
                if probe.fail_connect.load(Ordering::SeqCst) {
                    return Err(AmqpError::ConnectionError {
                        host,
                        reason: "connection refused".to_owned(),
                    });
                }
                Ok(Arc::new(mock_connection(host, probe.clone())) as Arc<dyn BrokerConnection>)
            });
        client
    }

    fn mock_connection(host: String, probe: Arc<Probe>) -> MockBrokerConnection {
        let open = Arc::new(AtomicBool::new(true));
        probe.connections.lock().unwrap().push(open.clone());

        let mut conn = MockBrokerConnection::new();

        let flag = open.clone();
        conn.expect_is_open()
            .returning(move || flag.load(Ordering::SeqCst));
        let bound = host.clone();
        conn.expect_bound_host().returning(move || bound.clone());

        let (p, flag) = (probe.clone(), open.clone());
        conn.expect_open_channel().returning(move || {
            let dropped = p
                .drop_before_channel
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if dropped {
                flag.store(false, Ordering::SeqCst);
            }
            if !flag.load(Ordering::SeqCst) {
                return Err(AmqpError::ChannelError {
                    host: host.clone(),
                    reason: "invalid connection state".to_owned(),
                });
            }
            p.channels_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(mock_channel(flag.clone(), p.clone())) as Arc<dyn BrokerChannel>)
        });

        let (p, flag) = (probe, open);
        conn.expect_close().returning(move || {
            flag.store(false, Ordering::SeqCst);
            p.connections_closed.fetch_add(1, Ordering::SeqCst);
            if p.fail_close.load(Ordering::SeqCst) {
                return Err(AmqpError::CloseError("broker went away".to_owned()));
            }
            Ok(())
        });

        conn
    }

    fn mock_channel(conn_open: Arc<AtomicBool>, probe: Arc<Probe>) -> MockBrokerChannel {
        let open = Arc::new(AtomicBool::new(true));
        let mut channel = MockBrokerChannel::new();

        let (flag, conn_flag) = (open.clone(), conn_open);
        channel
            .expect_is_open()
            .returning(move || flag.load(Ordering::SeqCst) && conn_flag.load(Ordering::SeqCst));

        let (p, flag) = (probe.clone(), open);
        channel.expect_close().returning(move || {
            flag.store(false, Ordering::SeqCst);
            p.channels_closed.fetch_add(1, Ordering::SeqCst);
            if p.fail_close.load(Ordering::SeqCst) {
                return Err(AmqpError::CloseError("channel already gone".to_owned()));
            }
            Ok(())
        });

        let p = probe.clone();
        channel
            .expect_queue_declare()
            .returning(move |def: &QueueDefinition| {
                p.declared.lock().unwrap().push(def.clone());
                Ok(())
            });

        let p = probe.clone();
        channel
            .expect_queue_bind()
            .returning(move |queue: &str, exchange: &str, key: &str| {
                p.bound
                    .lock()
                    .unwrap()
                    .push((queue.to_owned(), exchange.to_owned(), key.to_owned()));
                Ok(())
            });

        let p = probe.clone();
        channel.expect_basic_publish().returning(
            move |exchange: &str, routing_key: &str, payload: &[u8], properties: BasicProperties| {
                p.published.lock().unwrap().push(Published {
                    exchange: exchange.to_owned(),
                    routing_key: routing_key.to_owned(),
                    payload: payload.to_vec(),
                    properties,
                });
                Ok(())
            },
        );

        let p = probe.clone();
        channel
            .expect_basic_get()
            .returning(move |queue: &str, auto_ack: bool| {
                p.gets.lock().unwrap().push((queue.to_owned(), auto_ack));
                Ok(p.queue.lock().unwrap().pop_front())
            });

        let p = probe.clone();
        channel.expect_basic_ack().returning(move |tag| {
            p.settled.lock().unwrap().push(Settlement::Ack(tag));
            Ok(())
        });

        let p = probe.clone();
        channel.expect_basic_nack().returning(move |tag, requeue| {
            p.settled.lock().unwrap().push(Settlement::Nack(tag, requeue));
            Ok(())
        });

        let p = probe;
        channel.expect_basic_reject().returning(move |tag, requeue| {
            p.settled.lock().unwrap().push(Settlement::Reject(tag, requeue));
            Ok(())
        });

        channel
    }
}
