// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport Capabilities
//!
//! The small set of primitives each broker binding implements. Reconnection,
//! publishing and the consume/retry loop are written once on top of these
//! traits, in `dialer`, `publisher` and `subscriber`.

use crate::{
    errors::BrokerError,
    message::{Delivery, Envelope},
};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// Failure notifications of one connection.
///
/// Receiving an error means the connection broke. The channel closing without
/// an error means the connection was shut down on purpose.
pub type FailureSignal = UnboundedReceiver<BrokerError>;

/// Dials a broker and opens sessions on the resulting connection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;
    type Session: Send + 'static;

    async fn connect(&self) -> Result<(Self::Connection, FailureSignal), BrokerError>;

    async fn open_session(&self, conn: &Self::Connection) -> Result<Self::Session, BrokerError>;

    async fn close(&self, conn: &Self::Connection) -> Result<(), BrokerError>;
}

/// Per-destination send-handle.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    async fn send(&self, envelope: &Envelope) -> Result<(), BrokerError>;

    /// True once the handle can no longer be used, typically because the
    /// connection it was opened on went away.
    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Opens send-handles for destinations.
#[async_trait]
pub trait PublishTransport: Send + Sync + 'static {
    type Sink: Sink;

    async fn open_sink(&self, destination: &str) -> Result<Self::Sink, BrokerError>;
}

/// How a transport gives a failed delivery another try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redelivery {
    /// The read position is not advanced; the same delivery is handled again
    /// within the session and the attempt count lives in memory.
    InPlace,
    /// The delivery is published again with its attempt count in a header,
    /// and the original is acknowledged.
    Republish,
}

/// Read-handle of one consume session.
#[async_trait]
pub trait Source: Send + 'static {
    type Handle: Send + 'static;

    fn redelivery(&self) -> Redelivery;

    /// Waits for the next delivery. `Ok(None)` means the transport ended the
    /// stream and the session has to be restarted.
    async fn next_delivery(&mut self) -> Result<Option<(Delivery, Self::Handle)>, BrokerError>;

    /// The delivery was handled.
    async fn ack(&mut self, handle: Self::Handle) -> Result<(), BrokerError>;

    /// The delivery is dropped for good.
    async fn reject(&mut self, handle: Self::Handle) -> Result<(), BrokerError>;

    /// The delivery was not settled and goes back to the broker as is.
    async fn requeue(&mut self, handle: Self::Handle) -> Result<(), BrokerError>;

    /// Publishes `delivery` again, then acknowledges the original.
    ///
    /// When the copy cannot be published the original is handed back with
    /// `requeue` before the error is returned, so it is never left unsettled.
    async fn republish(
        &mut self,
        handle: Self::Handle,
        _delivery: &Delivery,
    ) -> Result<(), BrokerError> {
        self.requeue(handle).await?;
        Err(BrokerError::Unsupported("republish"))
    }

    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Opens consume sessions.
#[async_trait]
pub trait SubscribeTransport: Send + Sync + 'static {
    type Source: Source;

    fn destination(&self) -> &str;

    async fn open_source(&self, prefetch: u16) -> Result<Self::Source, BrokerError>;
}
