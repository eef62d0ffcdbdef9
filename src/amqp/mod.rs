// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Binding
//!
//! AMQP 0.9.1 implementation of the transport capabilities on top of `lapin`.
//!
//! ```no_run
//! use brokers::{amqp, config::{AmqpConfigs, RetryConfigs}};
//!
//! # async fn run() -> Result<(), brokers::errors::BrokerError> {
//! let dialer = amqp::dialer(&AmqpConfigs::from_env()?, &RetryConfigs::from_env()?);
//! dialer.connect().await?;
//!
//! let publisher = amqp::publisher(&dialer);
//! # Ok(())
//! # }
//! ```

mod connector;
mod headers;
mod publisher;
mod subscriber;
mod topology;

pub use connector::AmqpConnector;
pub use publisher::{AmqpPublishTransport, AmqpSink};
pub use subscriber::{AmqpHandle, AmqpSource, AmqpSubscribeTransport};
pub use topology::{QueueDeclaration, AMQP_HEADERS_MESSAGE_TTL};

use crate::{
    config::{AmqpConfigs, RetryConfigs},
    dialer::Dialer,
    publisher::Publisher,
    subscriber::{Subscriber, SubscriberOptions},
};

pub type AmqpDialer = Dialer<AmqpConnector>;
pub type AmqpPublisher = Publisher<AmqpPublishTransport>;
pub type AmqpSubscriber = Subscriber<AmqpSubscribeTransport>;

/// Creates a disconnected dialer; call `connect` before use.
pub fn dialer(cfg: &AmqpConfigs, retry: &RetryConfigs) -> AmqpDialer {
    Dialer::new(AmqpConnector::new(cfg), retry.policy())
}

pub fn publisher(dialer: &AmqpDialer) -> AmqpPublisher {
    Publisher::new(AmqpPublishTransport::new(dialer.clone()))
}

pub fn subscriber(dialer: &AmqpDialer, queue: &str, options: SubscriberOptions) -> AmqpSubscriber {
    Subscriber::new(AmqpSubscribeTransport::new(dialer.clone(), queue), options)
}
