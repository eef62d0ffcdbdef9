// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use crate::message::{Envelope, CONTENT_TYPE_HEADER};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use std::collections::HashMap;

/// Record header carrying the message kind.
pub const KIND_HEADER: &str = "kind";

/// Record header carrying the message id.
pub const MESSAGE_ID_HEADER: &str = "message-id";

pub(crate) fn record_headers(envelope: &Envelope) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new_with_capacity(envelope.headers.len() + 3)
        .insert(Header {
            key: CONTENT_TYPE_HEADER,
            value: Some(envelope.content_type),
        })
        .insert(Header {
            key: MESSAGE_ID_HEADER,
            value: Some(envelope.id.as_str()),
        });

    if let Some(kind) = &envelope.kind {
        headers = headers.insert(Header {
            key: KIND_HEADER,
            value: Some(kind.as_str()),
        });
    }

    for (key, value) in &envelope.headers {
        headers = headers.insert(Header {
            key: key.as_str(),
            value: Some(value.as_str()),
        });
    }

    headers
}

/// Headers without a value or with a non UTF-8 value are skipped.
pub(crate) fn read_headers<H: Headers>(headers: Option<&H>) -> HashMap<String, String> {
    let Some(headers) = headers else {
        return HashMap::default();
    };

    headers
        .iter()
        .filter_map(|header| {
            let value = std::str::from_utf8(header.value?).ok()?;
            Some((header.key.to_owned(), value.to_owned()))
        })
        .collect()
}
