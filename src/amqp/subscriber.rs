// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Consuming
//!
//! One consume session is one channel with a basic consumer on the queue.
//! Failed deliveries are retried by publishing a copy straight to the queue
//! with an updated `x-retry-count` header and acknowledging the original once
//! the broker confirmed the copy. A copy that is not confirmed hands the
//! original back to the queue instead.

use super::{
    connector::AmqpConnector,
    headers::{from_field_table, to_field_table},
    topology::QueueDeclaration,
};
use crate::{
    dialer::Dialer,
    errors::BrokerError,
    message::Delivery,
    transport::{Redelivery, Source, SubscribeTransport},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Consumer,
};
use tracing::{debug, error};
use uuid::Uuid;

const DEFAULT_EXCHANGE: &str = "";
const REPLY_SUCCESS: u16 = 200;

pub struct AmqpSubscribeTransport {
    dialer: Dialer<AmqpConnector>,
    queue: String,
    consumer_tag: String,
    declaration: Option<QueueDeclaration>,
}

impl AmqpSubscribeTransport {
    pub fn new(dialer: Dialer<AmqpConnector>, queue: &str) -> Self {
        AmqpSubscribeTransport {
            dialer,
            queue: queue.to_owned(),
            consumer_tag: queue.to_owned(),
            declaration: None,
        }
    }

    /// Declares (and binds) the queue every time a session starts.
    pub fn with_declaration(mut self, declaration: QueueDeclaration) -> Self {
        self.declaration = Some(declaration);
        self
    }

    pub fn with_consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = tag.to_owned();
        self
    }
}

#[async_trait]
impl SubscribeTransport for AmqpSubscribeTransport {
    type Source = AmqpSource;

    fn destination(&self) -> &str {
        &self.queue
    }

    async fn open_source(&self, prefetch: u16) -> Result<AmqpSource, BrokerError> {
        let channel = self.dialer.session().await?;

        if let Err(err) = channel
            .basic_qos(prefetch, BasicQosOptions { global: false })
            .await
        {
            error!(error = err.to_string(), "failure to configure qos");
            return Err(BrokerError::QoSDeclarationError(err.to_string()));
        }

        // retry copies must be stored before the original is acked
        if let Err(err) = channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
        {
            error!(error = err.to_string(), "failure to enable publisher confirms");
            return Err(BrokerError::ChannelError(err.to_string()));
        }

        if let Some(declaration) = &self.declaration {
            declaration.declare(&channel, &self.queue).await?;
        }

        let consumer = match channel
            .basic_consume(
                &self.queue,
                &format!("{}-{}", self.consumer_tag, Uuid::new_v4()),
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "failure to create the consumer");
                Err(BrokerError::ConsumerError(err.to_string()))
            }
            Ok(c) => Ok(c),
        }?;

        Ok(AmqpSource {
            channel,
            consumer,
            queue: self.queue.clone(),
        })
    }
}

pub struct AmqpHandle {
    acker: Acker,
    properties: BasicProperties,
}

pub struct AmqpSource {
    channel: Channel,
    consumer: Consumer,
    queue: String,
}

impl AmqpSource {
    /// Publishes a copy straight to the queue and waits for the broker confirm.
    async fn publish_copy(
        &self,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), BrokerError> {
        let confirm = self
            .channel
            .basic_publish(
                DEFAULT_EXCHANGE,
                &self.queue,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling republishing msg");
                BrokerError::PublishingError(err.to_string())
            })?;

        match confirm.await {
            Ok(confirmation) if confirmation.is_nack() => {
                error!(queue = self.queue, "republished msg was nacked by the broker");
                Err(BrokerError::PublishingError("message nacked".to_owned()))
            }
            Ok(_) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error waiting republish confirm");
                Err(BrokerError::PublishingError(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl Source for AmqpSource {
    type Handle = AmqpHandle;

    fn redelivery(&self) -> Redelivery {
        Redelivery::Republish
    }

    async fn next_delivery(&mut self) -> Result<Option<(Delivery, AmqpHandle)>, BrokerError> {
        let Some(next) = self.consumer.next().await else {
            return Ok(None);
        };

        let delivery = next.map_err(|err| BrokerError::ConsumerError(err.to_string()))?;

        let message = Delivery {
            destination: self.queue.clone(),
            key: Some(delivery.routing_key.as_str().to_owned()),
            kind: delivery
                .properties
                .kind()
                .as_ref()
                .map(|k| k.as_str().to_owned()),
            headers: from_field_table(delivery.properties.headers().as_ref()),
            body: delivery.data,
            redelivered: delivery.redelivered,
        };

        Ok(Some((
            message,
            AmqpHandle {
                acker: delivery.acker,
                properties: delivery.properties,
            },
        )))
    }

    async fn ack(&mut self, handle: AmqpHandle) -> Result<(), BrokerError> {
        handle
            .acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                BrokerError::AckMessageError
            })
    }

    async fn reject(&mut self, handle: AmqpHandle) -> Result<(), BrokerError> {
        handle
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                BrokerError::NackMessageError
            })
    }

    async fn requeue(&mut self, handle: AmqpHandle) -> Result<(), BrokerError> {
        handle
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue: true,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling requeuing");
                BrokerError::RequeuingMessageError
            })
    }

    async fn republish(
        &mut self,
        handle: AmqpHandle,
        delivery: &Delivery,
    ) -> Result<(), BrokerError> {
        let properties = handle
            .properties
            .clone()
            .with_headers(to_field_table(&delivery.headers));

        if let Err(err) = self.publish_copy(&delivery.body, properties).await {
            self.requeue(handle).await?;
            return Err(err);
        }

        debug!(queue = self.queue, "message republished for retry");
        self.ack(handle).await
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if !self.channel.status().connected() {
            return Ok(());
        }

        self.channel
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|err| BrokerError::ChannelError(err.to_string()))
    }
}
