// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Body encoders used by publishers.

use crate::errors::BrokerError;
use serde_json::Value;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type for plain text messages
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// Turns a message body into bytes.
///
/// Publishers never call an encoder for a message without a body.
#[cfg_attr(test, mockall::automock)]
pub trait Encoder: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn encode(&self, body: &Value) -> Result<Vec<u8>, BrokerError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode(&self, body: &Value) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(body).map_err(|e| BrokerError::EncodingError(e.to_string()))
    }
}

/// Writes strings verbatim; any other value is written in its JSON text form.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextEncoder;

impl Encoder for TextEncoder {
    fn content_type(&self) -> &'static str {
        TEXT_CONTENT_TYPE
    }

    fn encode(&self, body: &Value) -> Result<Vec<u8>, BrokerError> {
        match body {
            Value::String(text) => Ok(text.as_bytes().to_vec()),
            other => Ok(other.to_string().into_bytes()),
        }
    }
}
