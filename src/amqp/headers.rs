// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Conversion between string header maps and AMQP field tables.

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Every header is written as a long string.
pub(crate) fn to_field_table(headers: &HashMap<String, String>) -> FieldTable {
    let btree: BTreeMap<ShortString, AMQPValue> = headers
        .iter()
        .map(|(key, value)| {
            (
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            )
        })
        .collect();

    FieldTable::from(btree)
}

/// Scalar headers are kept in their text form; nested tables and arrays
/// (such as `x-death`) are skipped.
pub(crate) fn from_field_table(table: Option<&FieldTable>) -> HashMap<String, String> {
    let Some(table) = table else {
        return HashMap::default();
    };

    table
        .inner()
        .iter()
        .filter_map(|(key, value)| match scalar(value) {
            Some(text) => Some((key.as_str().to_owned(), text)),
            None => {
                debug!(header = key.as_str(), "skipping non scalar header");
                None
            }
        })
        .collect()
}

fn scalar(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(v) => std::str::from_utf8(v.as_bytes()).ok().map(str::to_owned),
        AMQPValue::ShortString(v) => Some(v.as_str().to_owned()),
        AMQPValue::Boolean(v) => Some(v.to_string()),
        AMQPValue::ShortShortInt(v) => Some(v.to_string()),
        AMQPValue::ShortShortUInt(v) => Some(v.to_string()),
        AMQPValue::ShortInt(v) => Some(v.to_string()),
        AMQPValue::ShortUInt(v) => Some(v.to_string()),
        AMQPValue::LongInt(v) => Some(v.to_string()),
        AMQPValue::LongUInt(v) => Some(v.to_string()),
        AMQPValue::LongLongInt(v) => Some(v.to_string()),
        AMQPValue::Timestamp(v) => Some(v.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::{FieldArray, LongLongInt};

    #[test]
    fn string_headers_survive_a_round_trip() {
        let headers = HashMap::from([
            ("traceparent".to_owned(), "00-abc-def-01".to_owned()),
            ("x-retry-count".to_owned(), "2".to_owned()),
        ]);

        assert_eq!(from_field_table(Some(&to_field_table(&headers))), headers);
    }

    #[test]
    fn numeric_headers_are_read_as_text() {
        let mut table = FieldTable::default();
        table.insert("x-retry-count".into(), AMQPValue::LongLongInt(LongLongInt::from(4)));
        table.insert("x-death".into(), AMQPValue::FieldArray(FieldArray::default()));

        let headers = from_field_table(Some(&table));

        assert_eq!(headers.get("x-retry-count").map(String::as_str), Some("4"));
        assert!(!headers.contains_key("x-death"));
        assert!(from_field_table(None).is_empty());
    }
}
