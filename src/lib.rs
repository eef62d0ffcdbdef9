// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod amqp;
pub mod config;
pub mod dialer;
pub mod encoding;
pub mod errors;
pub mod handler;
pub mod kafka;
pub mod message;
pub mod publisher;
pub mod retry;
pub mod subscriber;
pub mod transport;

#[cfg(test)]
mod testing;

pub use otel::Telemetry;
