// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Kafka Binding
//!
//! Log broker implementation of the transport capabilities on top of
//! `rdkafka`. Publishers go through a `Dialer` holding one producer client;
//! every consume session creates its own group consumer.

mod client;
mod connector;
mod headers;
mod publisher;
mod subscriber;

pub use client::KafkaContext;
pub use connector::{KafkaConnector, KafkaProducer};
pub use headers::{KIND_HEADER, MESSAGE_ID_HEADER};
pub use publisher::{KafkaPublishTransport, KafkaSink};
pub use subscriber::{KafkaHandle, KafkaSource, KafkaSubscribeTransport};

use crate::{
    config::{KafkaConfigs, RetryConfigs},
    dialer::Dialer,
    publisher::Publisher,
    subscriber::{Subscriber, SubscriberOptions},
};

pub type KafkaDialer = Dialer<KafkaConnector>;
pub type KafkaPublisher = Publisher<KafkaPublishTransport>;
pub type KafkaSubscriber = Subscriber<KafkaSubscribeTransport>;

/// Creates a disconnected dialer; call `connect` before use.
pub fn dialer(cfg: &KafkaConfigs, retry: &RetryConfigs) -> KafkaDialer {
    Dialer::new(KafkaConnector::new(cfg.clone()), retry.policy())
}

pub fn publisher(dialer: &KafkaDialer) -> KafkaPublisher {
    Publisher::new(KafkaPublishTransport::new(dialer.clone()))
}

pub fn subscriber(cfg: &KafkaConfigs, topic: &str, options: SubscriberOptions) -> KafkaSubscriber {
    Subscriber::new(KafkaSubscribeTransport::new(cfg.clone(), topic), options)
}
