// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Publishing
//!
//! Each destination is an exchange. Send-handles run in publisher confirm
//! mode, so a publish only succeeds once the broker has taken the message.

use super::{connector::AmqpConnector, headers::to_field_table};
use crate::{
    dialer::Dialer,
    errors::BrokerError,
    message::Envelope,
    transport::{PublishTransport, Sink},
};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    types::ShortString,
    BasicProperties, Channel,
};
use tracing::{debug, error};

const PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Opens exchange send-handles on the connection held by a `Dialer`.
pub struct AmqpPublishTransport {
    dialer: Dialer<AmqpConnector>,
}

impl AmqpPublishTransport {
    /// Creates a new publish transport.
    ///
    /// # Parameters
    /// * `dialer` - Connection manager channels are opened from
    ///
    /// # Returns
    /// A transport whose send-handles follow the dialer's reconnects
    pub fn new(dialer: Dialer<AmqpConnector>) -> Self {
        AmqpPublishTransport { dialer }
    }
}

#[async_trait]
impl PublishTransport for AmqpPublishTransport {
    type Sink = AmqpSink;

    /// Opens a channel in confirm mode bound to the `destination` exchange.
    ///
    /// # Returns
    /// The handle, `BrokerError::NotConnected` while no connection is held or
    /// `BrokerError::ChannelError`
    async fn open_sink(&self, destination: &str) -> Result<AmqpSink, BrokerError> {
        let generation = self.dialer.generation();
        let channel = self.dialer.session().await?;

        if let Err(err) = channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
        {
            error!(error = err.to_string(), "failure to enable publisher confirms");
            return Err(BrokerError::ChannelError(err.to_string()));
        }

        debug!(exchange = destination, "publishing channel opened");

        Ok(AmqpSink {
            channel,
            exchange: destination.to_owned(),
            dialer: self.dialer.clone(),
            generation,
        })
    }
}

/// Send-handle for one exchange, backed by its own channel.
pub struct AmqpSink {
    channel: Channel,
    exchange: String,
    dialer: Dialer<AmqpConnector>,
    generation: u64,
}

/// Maps envelope metadata onto AMQP basic properties.
pub(crate) fn properties(envelope: &Envelope) -> BasicProperties {
    let mut props = BasicProperties::default()
        .with_content_type(ShortString::from(envelope.content_type))
        .with_message_id(ShortString::from(envelope.id.clone()))
        .with_delivery_mode(PERSISTENT)
        .with_headers(to_field_table(&envelope.headers));

    if let Some(kind) = &envelope.kind {
        props = props.with_type(ShortString::from(kind.clone()));
    }

    if let Some(ttl) = envelope.ttl {
        props = props.with_expiration(ShortString::from(ttl.as_millis().to_string()));
    }

    props
}

#[async_trait]
impl Sink for AmqpSink {
    /// Publishes one message and waits for the broker confirm.
    ///
    /// # Parameters
    /// * `envelope` - Encoded message; its key becomes the routing key
    ///
    /// # Returns
    /// Ok(()) once confirmed or `BrokerError::PublishingError`
    async fn send(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        let payload = envelope.body.as_deref().unwrap_or_default();

        let confirm = match self
            .channel
            .basic_publish(
                &self.exchange,
                envelope.key.as_deref().unwrap_or_default(),
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties(envelope),
            )
            .await
        {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(BrokerError::PublishingError(err.to_string()))
            }
        }?;

        match confirm.await {
            Ok(confirmation) if confirmation.is_nack() => {
                error!(exchange = self.exchange, "message was nacked by the broker");
                Err(BrokerError::PublishingError("message nacked".to_owned()))
            }
            Ok(_) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error waiting publisher confirm");
                Err(BrokerError::PublishingError(err.to_string()))
            }
        }
    }

    /// True once the channel dropped or the dialer replaced the connection.
    fn is_closed(&self) -> bool {
        !self.channel.status().connected() || self.dialer.generation() != self.generation
    }

    /// Closes the channel of the handle.
    async fn close(&self) -> Result<(), BrokerError> {
        if !self.channel.status().connected() {
            return Ok(());
        }

        self.channel
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|err| BrokerError::ChannelError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, time::Duration};

    fn envelope() -> Envelope {
        Envelope {
            id: "id-1".to_owned(),
            destination: "orders".to_owned(),
            key: Some("created".to_owned()),
            kind: Some("order.created".to_owned()),
            headers: HashMap::from([("tenant".to_owned(), "acme".to_owned())]),
            body: Some(b"{}".to_vec()),
            content_type: "application/json",
            ttl: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn envelope_fields_become_properties() {
        let props = properties(&envelope());

        assert_eq!(props.content_type().as_ref().map(|v| v.as_str()), Some("application/json"));
        assert_eq!(props.message_id().as_ref().map(|v| v.as_str()), Some("id-1"));
        assert_eq!(props.kind().as_ref().map(|v| v.as_str()), Some("order.created"));
        assert_eq!(props.expiration().as_ref().map(|v| v.as_str()), Some("5000"));
        assert_eq!(*props.delivery_mode(), Some(PERSISTENT));
        assert!(props
            .headers()
            .as_ref()
            .is_some_and(|h| h.inner().contains_key(&ShortString::from("tenant"))));
    }

    #[test]
    fn missing_ttl_and_kind_are_left_unset() {
        let props = properties(&Envelope {
            kind: None,
            ttl: None,
            ..envelope()
        });

        assert!(props.expiration().is_none());
        assert!(props.kind().is_none());
    }
}
