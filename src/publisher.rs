// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Turns application messages into envelopes (encoded body, caller headers
//! plus trace context, effective TTL) and sends them synchronously through a
//! per-destination send-handle. Send-handles are opened lazily and reopened
//! once the transport reports them closed, so a publisher keeps working across
//! reconnects without caller intervention.

use crate::{
    encoding::{Encoder, JsonEncoder},
    errors::BrokerError,
    message::{Envelope, Message},
    otel::Telemetry,
    transport::{PublishTransport, Sink},
};
use opentelemetry::Context;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Publisher bound to one transport.
pub struct Publisher<T: PublishTransport> {
    transport: T,
    encoder: Arc<dyn Encoder>,
    telemetry: Telemetry,
    default_ttl: Option<Duration>,
    sinks: Mutex<HashMap<String, Arc<T::Sink>>>,
    closed: AtomicBool,
}

impl<T: PublishTransport> Publisher<T> {
    /// Creates a publisher encoding bodies as JSON.
    pub fn new(transport: T) -> Self {
        Publisher {
            transport,
            encoder: Arc::new(JsonEncoder),
            telemetry: Telemetry::default(),
            default_ttl: None,
            sinks: Mutex::new(HashMap::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// TTL applied to messages that do not carry their own.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Publishes `messages` one after the other.
    ///
    /// Returns the first failure. Messages before the failing one have
    /// already been handed to the broker and are not rolled back; messages
    /// after it are not sent.
    pub async fn publish(&self, ctx: &Context, messages: &[Message]) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }

        for msg in messages {
            let envelope = self.envelope(ctx, msg)?;
            let sink = self.sink(&msg.destination).await?;

            if let Err(err) = sink.send(&envelope).await {
                error!(
                    destination = msg.destination,
                    error = %err,
                    "failure to publish message"
                );
                return Err(err);
            }

            debug!(
                destination = msg.destination,
                id = envelope.id,
                "message published"
            );
        }

        Ok(())
    }

    /// Closes every cached send-handle. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sinks: Vec<_> = self.sinks.lock().await.drain().collect();
        for (destination, sink) in sinks {
            if let Err(err) = sink.close().await {
                warn!(destination, error = %err, "failure to close send-handle");
            }
        }

        Ok(())
    }

    pub(crate) fn envelope(&self, ctx: &Context, msg: &Message) -> Result<Envelope, BrokerError> {
        let body = match &msg.body {
            Some(body) => Some(self.encoder.encode(body)?),
            None => None,
        };

        let mut headers = msg.headers.clone().unwrap_or_default();
        self.telemetry.inject(ctx, &mut headers);

        let ttl = msg
            .ttl
            .filter(|ttl| !ttl.is_zero())
            .or(self.default_ttl.filter(|ttl| !ttl.is_zero()));

        Ok(Envelope {
            id: Uuid::new_v4().to_string(),
            destination: msg.destination.clone(),
            key: msg.key.clone(),
            kind: msg.kind.clone(),
            headers,
            body,
            content_type: self.encoder.content_type(),
            ttl,
        })
    }

    async fn sink(&self, destination: &str) -> Result<Arc<T::Sink>, BrokerError> {
        let mut sinks = self.sinks.lock().await;

        if let Some(sink) = sinks.get(destination) {
            if !sink.is_closed() {
                return Ok(sink.clone());
            }
            debug!(destination, "send-handle closed, reopening");
        }

        let sink = Arc::new(self.transport.open_sink(destination).await?);
        sinks.insert(destination.to_owned(), sink.clone());

        Ok(sink)
    }
}
