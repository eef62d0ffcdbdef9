// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Kafka Consuming
//!
//! One consume session is one group consumer subscribed to the topic.
//! Offsets are committed by hand once a delivery is decided, so a failed
//! delivery is simply handled again in place and anything left undecided is
//! read again by the next session.

use super::{
    client::{consumer_config, KafkaContext},
    headers::{read_headers, KIND_HEADER},
};
use crate::{
    config::KafkaConfigs,
    errors::BrokerError,
    message::Delivery,
    transport::{FailureSignal, Redelivery, Source, SubscribeTransport},
};
use async_trait::async_trait;
use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    Message, Offset, TopicPartitionList,
};
use tokio::sync::mpsc;
use tracing::{debug, error};

pub struct KafkaSubscribeTransport {
    configs: KafkaConfigs,
    topic: String,
}

impl KafkaSubscribeTransport {
    pub fn new(configs: KafkaConfigs, topic: &str) -> Self {
        KafkaSubscribeTransport {
            configs,
            topic: topic.to_owned(),
        }
    }
}

#[async_trait]
impl SubscribeTransport for KafkaSubscribeTransport {
    type Source = KafkaSource;

    fn destination(&self) -> &str {
        &self.topic
    }

    async fn open_source(&self, prefetch: u16) -> Result<KafkaSource, BrokerError> {
        let (tx, failures) = mpsc::unbounded_channel();

        let consumer: StreamConsumer<KafkaContext> = consumer_config(&self.configs, prefetch)
            .create_with_context(KafkaContext::new(tx))
            .map_err(|err| {
                error!(error = %err, "failure to create kafka consumer");
                BrokerError::ConsumerError(err.to_string())
            })?;

        consumer.subscribe(&[self.topic.as_str()]).map_err(|err| {
            error!(error = %err, topic = self.topic, "failure to subscribe");
            BrokerError::ConsumerError(err.to_string())
        })?;

        debug!(topic = self.topic, group = self.configs.group_id, "kafka consumer subscribed");

        Ok(KafkaSource {
            consumer,
            failures,
            topic: self.topic.clone(),
        })
    }
}

/// Position of a delivery in its partition.
pub struct KafkaHandle {
    partition: i32,
    offset: i64,
}

pub struct KafkaSource {
    consumer: StreamConsumer<KafkaContext>,
    failures: FailureSignal,
    topic: String,
}

/// Position right after `handle`, where the group resumes reading.
fn next_position(topic: &str, handle: &KafkaHandle) -> Result<TopicPartitionList, BrokerError> {
    let mut positions = TopicPartitionList::new();
    positions
        .add_partition_offset(topic, handle.partition, Offset::Offset(handle.offset + 1))
        .map_err(|err| BrokerError::ConsumerError(err.to_string()))?;

    Ok(positions)
}

impl KafkaSource {
    /// Commits the position after `handle`, the delivery is not read again.
    fn commit(&self, handle: &KafkaHandle, mode: CommitMode) -> Result<(), BrokerError> {
        let positions = next_position(&self.topic, handle)?;

        self.consumer.commit(&positions, mode).map_err(|err| {
            error!(
                error = %err,
                partition = handle.partition,
                offset = handle.offset,
                "failure to commit offset"
            );
            BrokerError::AckMessageError
        })
    }
}

#[async_trait]
impl Source for KafkaSource {
    type Handle = KafkaHandle;

    fn redelivery(&self) -> Redelivery {
        Redelivery::InPlace
    }

    async fn next_delivery(&mut self) -> Result<Option<(Delivery, KafkaHandle)>, BrokerError> {
        let received = tokio::select! {
            Some(err) = self.failures.recv() => return Err(err),
            received = self.consumer.recv() => received,
        };

        let message = received
            .map_err(|err| BrokerError::ConsumerError(err.to_string()))?
            .detach();

        let headers = read_headers(message.headers());
        let delivery = Delivery {
            destination: message.topic().to_owned(),
            key: message
                .key()
                .and_then(|key| std::str::from_utf8(key).ok())
                .map(str::to_owned),
            kind: headers.get(KIND_HEADER).cloned(),
            body: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
            redelivered: false,
        };

        Ok(Some((
            delivery,
            KafkaHandle {
                partition: message.partition(),
                offset: message.offset(),
            },
        )))
    }

    async fn ack(&mut self, handle: KafkaHandle) -> Result<(), BrokerError> {
        self.commit(&handle, CommitMode::Async)
    }

    async fn reject(&mut self, handle: KafkaHandle) -> Result<(), BrokerError> {
        debug!(
            partition = handle.partition,
            offset = handle.offset,
            "skipping rejected message"
        );
        // a dropped delivery must not come back after a session restart
        self.commit(&handle, CommitMode::Sync)
    }

    /// Leaves the offset uncommitted; the next session reads it again.
    async fn requeue(&mut self, _handle: KafkaHandle) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}
