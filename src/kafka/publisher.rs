// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Kafka Publishing
//!
//! Each destination is a topic. All send-handles share the producer of the
//! current connection; a handle is closed once the `Dialer` replaced it.

use super::{
    connector::{KafkaConnector, KafkaProducer},
    headers::record_headers,
};
use crate::{
    dialer::Dialer,
    errors::BrokerError,
    message::Envelope,
    transport::{PublishTransport, Sink},
};
use async_trait::async_trait;
use rdkafka::producer::FutureRecord;
use std::time::Duration;
use tracing::{debug, error};

/// Opens topic send-handles on the producer held by a `Dialer`.
pub struct KafkaPublishTransport {
    dialer: Dialer<KafkaConnector>,
}

impl KafkaPublishTransport {
    /// Creates a new publish transport.
    ///
    /// # Parameters
    /// * `dialer` - Connection manager holding the producer client
    ///
    /// # Returns
    /// A transport whose send-handles follow the dialer's reconnects
    pub fn new(dialer: Dialer<KafkaConnector>) -> Self {
        KafkaPublishTransport { dialer }
    }
}

#[async_trait]
impl PublishTransport for KafkaPublishTransport {
    type Sink = KafkaSink;

    /// Binds a send-handle to the `destination` topic.
    ///
    /// # Returns
    /// The handle, or `BrokerError::NotConnected` while no producer is held
    async fn open_sink(&self, destination: &str) -> Result<KafkaSink, BrokerError> {
        let generation = self.dialer.generation();
        let producer = self.dialer.session().await?;

        Ok(KafkaSink {
            producer,
            topic: destination.to_owned(),
            timeout: self.dialer.connector().configs().message_timeout(),
            dialer: self.dialer.clone(),
            generation,
        })
    }
}

/// Send-handle for one topic.
pub struct KafkaSink {
    producer: KafkaProducer,
    topic: String,
    timeout: Duration,
    dialer: Dialer<KafkaConnector>,
    generation: u64,
}

#[async_trait]
impl Sink for KafkaSink {
    /// Produces one record and waits for its delivery report.
    ///
    /// # Parameters
    /// * `envelope` - Encoded message; its key becomes the record key
    ///
    /// # Returns
    /// Ok(()) once the record was written or `BrokerError::PublishingError`
    async fn send(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        if envelope.ttl.is_some() {
            debug!(topic = self.topic, "kafka has no per message ttl, ignoring it");
        }

        let mut record: FutureRecord<'_, str, [u8]> =
            FutureRecord::to(&self.topic).headers(record_headers(envelope));

        if let Some(key) = &envelope.key {
            record = record.key(key.as_str());
        }

        if let Some(body) = &envelope.body {
            record = record.payload(body.as_slice());
        }

        match self.producer.send(record, self.timeout).await {
            Ok((partition, offset)) => {
                debug!(topic = self.topic, partition, offset, "message delivered");
                Ok(())
            }
            Err((err, _)) => {
                error!(error = %err, topic = self.topic, "error publishing message");
                Err(BrokerError::PublishingError(err.to_string()))
            }
        }
    }

    /// True once the dialer replaced the producer the handle was opened on.
    fn is_closed(&self) -> bool {
        self.dialer.generation() != self.generation
    }

    /// The producer belongs to the connection, nothing to release here.
    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}
