// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! `BrokerError` covers every failure the connection manager, publishers and
//! subscribers can report, regardless of the transport underneath.
//! `HandlerError` is what application handlers return to drive the outcome of
//! a single delivery.

use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error produced by application code.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Represents errors that can occur while talking to a broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Error establishing a connection to the broker
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// A session or send-handle was requested while no connection is held
    #[error("not connected")]
    NotConnected,

    /// An established connection reported a failure
    #[error("connection lost `{0}`")]
    ConnectionLost(String),

    /// Error creating a channel or session from an established connection
    #[error("failure to create a channel `{0}`")]
    ChannelError(String),

    /// Error publishing a message
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error reading from a consumer
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error requeuing a message
    #[error("failure to requeuing message")]
    RequeuingMessageError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error encoding a message body
    #[error("failure to encode payload `{0}`")]
    EncodingError(String),

    /// Error decoding a delivery body
    #[error("failure to decode payload `{0}`")]
    DecodingError(String),

    /// Error loading configuration
    #[error("invalid configuration `{0}`")]
    ConfigError(String),

    /// The component was already closed
    #[error("closed")]
    Closed,

    /// The transport does not support the requested operation
    #[error("unsupported operation `{0}`")]
    Unsupported(&'static str),
}

impl From<config::ConfigError> for BrokerError {
    fn from(err: config::ConfigError) -> Self {
        BrokerError::ConfigError(err.to_string())
    }
}

/// Failure returned by a message handler.
///
/// The classification decides what happens to the delivery: retryable
/// failures go through the subscriber's retry policy, terminal ones are
/// dropped right away.
#[derive(Error, Debug)]
#[error("handler failure: {source}")]
pub struct HandlerError {
    retryable: bool,
    #[source]
    source: BoxError,
}

impl HandlerError {
    /// The delivery should be retried according to the subscriber policy.
    pub fn retryable<E: Into<BoxError>>(err: E) -> Self {
        HandlerError {
            retryable: true,
            source: err.into(),
        }
    }

    /// The delivery should be dropped without any redelivery.
    pub fn terminal<E: Into<BoxError>>(err: E) -> Self {
        HandlerError {
            retryable: false,
            source: err.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn handler_error_keeps_classification() {
        let err = HandlerError::retryable("timeout");
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "handler failure: timeout");

        let err = HandlerError::terminal(BrokerError::DecodingError("bad".into()));
        assert!(!err.is_retryable());
        assert!(err.source().is_some());
    }
}
