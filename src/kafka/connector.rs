// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Kafka Connections
//!
//! A connection is a producer client. librdkafka reconnects to individual
//! brokers on its own, so the only failure reported to the `Dialer` is the
//! whole cluster becoming unreachable.

use super::client::{producer_config, KafkaContext};
use crate::{
    config::KafkaConfigs,
    errors::BrokerError,
    transport::{Connector, FailureSignal},
};
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, Producer};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Producer client used as the Kafka connection and shared by every
/// send-handle opened on it.
pub type KafkaProducer = FutureProducer<KafkaContext>;

/// Connector creating producer clients from `KafkaConfigs`.
pub struct KafkaConnector {
    configs: KafkaConfigs,
}

impl KafkaConnector {
    /// Creates a new connector.
    ///
    /// # Parameters
    /// * `configs` - Kafka client settings (brokers, client id, timeouts)
    ///
    /// # Returns
    /// A connector that has not dialed yet
    pub fn new(configs: KafkaConfigs) -> Self {
        KafkaConnector { configs }
    }

    /// Returns the client settings the connector dials with.
    pub fn configs(&self) -> &KafkaConfigs {
        &self.configs
    }
}

#[async_trait]
impl Connector for KafkaConnector {
    type Connection = KafkaProducer;
    type Session = KafkaProducer;

    /// Creates a producer and fetches the cluster metadata once.
    ///
    /// The client connects lazily, so the metadata request is what tells an
    /// unreachable cluster apart from a healthy one.
    ///
    /// # Returns
    /// The producer and its failure signal, or `BrokerError::ConnectionError`
    async fn connect(&self) -> Result<(KafkaProducer, FailureSignal), BrokerError> {
        debug!(brokers = self.configs.bootstrap_servers(), "creating kafka producer...");

        let (tx, failures) = mpsc::unbounded_channel();
        let producer: KafkaProducer = producer_config(&self.configs)
            .create_with_context(KafkaContext::new(tx))
            .map_err(|err| {
                error!(error = %err, "failure to create kafka producer");
                BrokerError::ConnectionError(err.to_string())
            })?;

        let client = producer.clone();
        let timeout = self.configs.message_timeout();
        let fetched = tokio::task::spawn_blocking(move || {
            client.client().fetch_metadata(None, timeout).map(|_| ())
        })
        .await
        .map_err(|err| BrokerError::ConnectionError(err.to_string()))?;

        fetched.map_err(|err| {
            error!(error = %err, "failure to reach the kafka cluster");
            BrokerError::ConnectionError(err.to_string())
        })?;

        debug!("kafka connected");
        Ok((producer, failures))
    }

    /// Sessions share the producer of the connection.
    async fn open_session(&self, conn: &KafkaProducer) -> Result<KafkaProducer, BrokerError> {
        Ok(conn.clone())
    }

    /// Flushes messages still queued in the producer.
    async fn close(&self, conn: &KafkaProducer) -> Result<(), BrokerError> {
        let producer = conn.clone();
        let timeout = self.configs.message_timeout();

        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|err| BrokerError::ConnectionError(err.to_string()))?;

        flushed.map_err(|err| {
            error!(error = %err, "failure to flush pending messages");
            BrokerError::PublishingError(err.to_string())
        })
    }
}
