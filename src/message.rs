// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages, Deliveries and Envelopes
//!
//! `Message` is what applications hand to a publisher, `Delivery` is what a
//! subscriber hands to a handler, and `Envelope` is the transport-ready form
//! of a message after encoding and trace injection.

use crate::errors::BrokerError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{collections::HashMap, time::Duration};

/// Header carrying the number of handler attempts already made for a
/// delivery. Only written by transports that redeliver by republishing.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Header carrying the body content type on transports without a dedicated
/// property for it.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Outbound application message.
///
/// The body is kept in its pre-encoding form; the publisher's encoder turns
/// it into bytes. A message without a body is sent with an empty payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub destination: String,
    pub key: Option<String>,
    pub kind: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub body: Option<Value>,
    pub ttl: Option<Duration>,
}

impl Message {
    pub fn new(destination: &str) -> Message {
        Message {
            destination: destination.to_owned(),
            ..Default::default()
        }
    }

    /// Routing key on AMQP, record key on Kafka.
    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_owned());
        self
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_owned());
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers
            .get_or_insert_with(HashMap::default)
            .insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_body(Value::String(text.to_owned()))
    }

    pub fn with_json<T: Serialize>(self, body: &T) -> Result<Self, BrokerError> {
        let value =
            serde_json::to_value(body).map_err(|e| BrokerError::EncodingError(e.to_string()))?;
        Ok(self.with_body(value))
    }

    /// Per-message time-to-live, overrides the publisher default when non-zero.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Inbound delivery handed to a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub destination: String,
    pub key: Option<String>,
    pub kind: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

impl Delivery {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Attempts already recorded on the delivery itself. Zero when the
    /// header is absent or malformed.
    pub fn recorded_attempts(&self) -> u32 {
        self.header(RETRY_COUNT_HEADER)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BrokerError> {
        serde_json::from_slice(&self.body).map_err(|e| BrokerError::DecodingError(e.to_string()))
    }

    pub fn text(&self) -> Result<&str, BrokerError> {
        std::str::from_utf8(&self.body).map_err(|e| BrokerError::DecodingError(e.to_string()))
    }
}

/// Transport-ready form of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: String,
    pub destination: String,
    pub key: Option<String>,
    pub kind: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub content_type: &'static str,
    pub ttl: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: u32,
        sku: String,
    }

    #[test]
    fn builder_collects_headers() {
        let msg = Message::new("orders")
            .with_key("eu")
            .with_header("tenant", "acme")
            .with_header("region", "eu-west-1")
            .with_text("hello");

        assert_eq!(msg.destination, "orders");
        assert_eq!(msg.key.as_deref(), Some("eu"));
        assert_eq!(msg.headers.as_ref().map(HashMap::len), Some(2));
        assert_eq!(msg.body, Some(Value::String("hello".into())));
    }

    #[test]
    fn delivery_decodes_json() {
        let delivery = Delivery {
            body: br#"{"id":7,"sku":"A-1"}"#.to_vec(),
            ..Default::default()
        };

        let order: Order = delivery.json().unwrap();
        assert_eq!(
            order,
            Order {
                id: 7,
                sku: "A-1".into()
            }
        );
        assert!(delivery.json::<Vec<u8>>().is_err());
    }

    #[test]
    fn recorded_attempts_defaults_to_zero() {
        let mut delivery = Delivery::default();
        assert_eq!(delivery.recorded_attempts(), 0);

        delivery
            .headers
            .insert(RETRY_COUNT_HEADER.to_owned(), "garbage".to_owned());
        assert_eq!(delivery.recorded_attempts(), 0);

        delivery
            .headers
            .insert(RETRY_COUNT_HEADER.to_owned(), "3".to_owned());
        assert_eq!(delivery.recorded_attempts(), 3);
    }
}
