// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Declaration
//!
//! Subscribers may own the queue they consume from. A `QueueDeclaration` is
//! applied every time a consume session opens; declaring an existing queue
//! with the same arguments is a no-op on the broker.

use crate::errors::BrokerError;
use lapin::{
    options::{QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongInt, ShortString},
    Channel,
};
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, error};

/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub(crate) durable: bool,
    pub(crate) ttl: Option<Duration>,
    pub(crate) bindings: Vec<(String, String)>,
}

impl QueueDeclaration {
    pub fn new() -> Self {
        QueueDeclaration::default()
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Messages older than `ttl` are discarded by the broker.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Binds the queue to `exchange` with `routing_key`.
    pub fn bind(mut self, exchange: &str, routing_key: &str) -> Self {
        self.bindings
            .push((exchange.to_owned(), routing_key.to_owned()));
        self
    }

    pub(crate) fn arguments(&self) -> FieldTable {
        let mut args = BTreeMap::new();

        if let Some(ttl) = self.ttl {
            let millis = i32::try_from(ttl.as_millis()).unwrap_or(i32::MAX);
            args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(millis)),
            );
        }

        FieldTable::from(args)
    }

    pub(crate) async fn declare(&self, channel: &Channel, queue: &str) -> Result<(), BrokerError> {
        debug!("creating queue: {}", queue);

        if let Err(err) = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: self.durable,
                    ..Default::default()
                },
                self.arguments(),
            )
            .await
        {
            error!(error = err.to_string(), queue, "failure to declare queue");
            return Err(BrokerError::DeclareQueueError(queue.to_owned()));
        }

        for (exchange, routing_key) in &self.bindings {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                queue, exchange, routing_key
            );

            if let Err(err) = channel
                .queue_bind(
                    queue,
                    exchange,
                    routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                error!(error = err.to_string(), "error to bind queue to exchange");
                return Err(BrokerError::DeclareQueueError(queue.to_owned()));
            }
        }

        Ok(())
    }
}
