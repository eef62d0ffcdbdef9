// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Application handlers invoked by subscribers.

use crate::{errors::HandlerError, message::Delivery};
use async_trait::async_trait;
use opentelemetry::Context;
use std::future::Future;

/// Processes one delivery.
///
/// `Ok(())` acknowledges the delivery. An error drops it or retries it,
/// depending on `HandlerError::is_retryable`. `ctx` carries the consumer span
/// started for the delivery; cancelling it does not interrupt the handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &Context, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Adapter turning a closure into a `Handler`.
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps `f` so it can be passed where a `Handler` is expected. The closure
/// receives owned copies of the context and the delivery.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Context, Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Context, Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, ctx: &Context, delivery: &Delivery) -> Result<(), HandlerError> {
        (self.f)(ctx.clone(), delivery.clone()).await
    }
}
