// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Subscriber
//!
//! Runs consume sessions against one destination and settles every delivery
//! according to the handler outcome:
//!
//! - success acknowledges the delivery;
//! - a terminal failure rejects it, it is never redelivered;
//! - a retryable failure waits the backoff and tries again until the maximum
//!   number of attempts is reached, then rejects it.
//!
//! How "try again" happens depends on the transport (see `Redelivery`):
//! in-place transports hand the same delivery to the handler again within the
//! session, republishing transports publish a copy carrying the attempt count
//! and acknowledge the original.
//!
//! A session ends when the transport closes the stream, fails, stays silent
//! longer than the staleness timeout while waiting for the next delivery, or
//! cannot publish a retry copy; a new one is started after the restart
//! interval. Deliveries in flight when a session ends may be delivered again
//! by the next session. Within a session deliveries are handled one at a
//! time, in the order the transport delivers them.

use crate::{
    errors::{BrokerError, HandlerError},
    handler::Handler,
    message::{Delivery, RETRY_COUNT_HEADER},
    otel::Telemetry,
    retry::{ConstantRetry, RetryPolicy},
    transport::{Redelivery, Source, SubscribeTransport},
};
use opentelemetry::{
    trace::{Status, TraceContextExt},
    Context,
};
use std::{borrow::Cow, sync::Arc, time::Duration};
use tokio::{
    sync::{watch, Mutex},
    time::Instant,
};
use tracing::{debug, error, info, warn};

/// Upper bound on handler invocations per delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAttempts {
    Limited(u32),
    Unlimited,
}

impl MaxAttempts {
    /// Configuration value meaning "retry forever".
    pub const UNLIMITED: i64 = -1;

    /// Reads a configured attempt count, `-1` meaning unlimited.
    pub fn from_config(raw: i64) -> Result<Self, BrokerError> {
        match raw {
            Self::UNLIMITED => Ok(MaxAttempts::Unlimited),
            n if n > 0 => u32::try_from(n)
                .map(MaxAttempts::Limited)
                .map_err(|_| BrokerError::ConfigError(format!("max attempts `{n}` too large"))),
            n => Err(BrokerError::ConfigError(format!(
                "max attempts must be positive or {}, got `{n}`",
                Self::UNLIMITED
            ))),
        }
    }

    fn exhausted(&self, made: u32) -> bool {
        match self {
            MaxAttempts::Limited(max) => made >= *max,
            MaxAttempts::Unlimited => false,
        }
    }
}

/// Consume loop settings.
#[derive(Clone)]
pub struct SubscriberOptions {
    /// Deliveries the broker may push ahead of acknowledgement.
    pub prefetch: u16,
    /// Total handler invocations per delivery, first one included.
    pub max_attempts: MaxAttempts,
    /// Wait before each retry, indexed by the retry number starting at 0.
    pub backoff: Arc<dyn RetryPolicy>,
    /// Idle time after which a session is considered dead.
    pub stale_timeout: Duration,
    /// Pause between the end of a session and the start of the next one.
    pub restart_interval: Duration,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        SubscriberOptions {
            prefetch: 10,
            max_attempts: MaxAttempts::Limited(3),
            backoff: Arc::new(ConstantRetry::new(Duration::from_secs(1))),
            stale_timeout: Duration::from_secs(300),
            restart_interval: Duration::from_secs(5),
        }
    }
}

enum SessionEnd {
    Shutdown,
    Restart,
}

enum Flow {
    Continue,
    /// The session can no longer settle deliveries reliably.
    Restart,
    Shutdown,
}

/// Subscriber bound to one transport destination.
pub struct Subscriber<T: SubscribeTransport> {
    transport: T,
    options: SubscriberOptions,
    telemetry: Telemetry,
    shutdown: watch::Sender<bool>,
    running: Mutex<()>,
}

impl<T: SubscribeTransport> Subscriber<T> {
    pub fn new(transport: T, options: SubscriberOptions) -> Self {
        let (shutdown, _) = watch::channel(false);

        Subscriber {
            transport,
            options,
            telemetry: Telemetry::default(),
            shutdown,
            running: Mutex::new(()),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Consumes until `close` is called, restarting sessions as needed.
    ///
    /// Failures are only reported through logs. Returns right away when the
    /// subscriber is already closed.
    pub async fn listen(&self, handler: Arc<dyn Handler>) {
        let _running = self.running.lock().await;
        let mut shutdown = self.shutdown.subscribe();
        let destination = self.transport.destination();

        while !self.is_closed() {
            match self.session(handler.as_ref(), &mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Restart => {
                    warn!(
                        destination,
                        restart_ms = self.options.restart_interval.as_millis() as u64,
                        "consume session ended, restarting"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(self.options.restart_interval) => {}
                        _ = stopped(&mut shutdown) => break,
                    }
                }
            }
        }

        info!(destination, "subscriber stopped");
    }

    /// Signals shutdown and waits for the running session to release its
    /// read-handle. Safe to call before `listen` and more than once.
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.shutdown.send_replace(true);
        let _running = self.running.lock().await;
        Ok(())
    }

    async fn session(
        &self,
        handler: &dyn Handler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let destination = self.transport.destination();

        let mut source = match self.transport.open_source(self.options.prefetch).await {
            Ok(source) => source,
            Err(err) => {
                error!(destination, error = %err, "failure to open consume session");
                return SessionEnd::Restart;
            }
        };
        debug!(destination, prefetch = self.options.prefetch, "consume session started");

        let end = self.consume(&mut source, handler, shutdown).await;

        if let Err(err) = source.close().await {
            warn!(destination, error = %err, "failure to close consume session");
        }

        end
    }

    async fn consume<S: Source>(
        &self,
        source: &mut S,
        handler: &dyn Handler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let destination = self.transport.destination();
        let mut idle_since = Instant::now();

        loop {
            let next = tokio::select! {
                biased;
                _ = stopped(shutdown) => return SessionEnd::Shutdown,
                _ = tokio::time::sleep_until(idle_since + self.options.stale_timeout) => {
                    warn!(
                        destination,
                        idle_ms = idle_since.elapsed().as_millis() as u64,
                        "no message within the staleness timeout"
                    );
                    return SessionEnd::Restart;
                }
                next = source.next_delivery() => next,
            };

            let (delivery, handle) = match next {
                Ok(Some(next)) => next,
                Ok(None) => {
                    warn!(destination, "consume stream closed by the broker");
                    return SessionEnd::Restart;
                }
                Err(err) => {
                    error!(destination, error = %err, "failure to read next message");
                    return SessionEnd::Restart;
                }
            };

            let ctx = self.telemetry.consumer_span(&delivery.headers, destination);
            let flow = self
                .dispatch(&ctx, source, handler, shutdown, delivery, handle)
                .await;
            ctx.span().end();

            match flow {
                Flow::Continue => {}
                Flow::Restart => return SessionEnd::Restart,
                Flow::Shutdown => return SessionEnd::Shutdown,
            }

            // only time spent waiting on the transport counts as idle
            idle_since = Instant::now();
        }
    }

    async fn dispatch<S: Source>(
        &self,
        ctx: &Context,
        source: &mut S,
        handler: &dyn Handler,
        shutdown: &mut watch::Receiver<bool>,
        mut delivery: Delivery,
        handle: S::Handle,
    ) -> Flow {
        let destination = self.transport.destination();
        let redelivery = source.redelivery();
        let mut made = match redelivery {
            Redelivery::Republish => delivery.recorded_attempts(),
            Redelivery::InPlace => 0,
        };

        loop {
            let result = handler.handle(ctx, &delivery).await;
            made = made.saturating_add(1);

            let err = match result {
                Ok(()) => {
                    debug!(destination, attempt = made, "message successfully processed");
                    ctx.span().set_status(Status::Ok);
                    if let Err(err) = source.ack(handle).await {
                        error!(destination, error = %err, "failure to ack message");
                    }
                    return Flow::Continue;
                }
                Err(err) => err,
            };

            record_failure(ctx, &err);

            if !err.is_retryable() {
                warn!(
                    destination,
                    error = %err,
                    "dropping message, handler failure is not retryable"
                );
                self.reject(source, handle).await;
                return Flow::Continue;
            }

            if self.options.max_attempts.exhausted(made) {
                error!(
                    destination,
                    attempts = made,
                    error = %err,
                    "dropping message, too many attempts"
                );
                self.reject(source, handle).await;
                return Flow::Continue;
            }

            let (wait, stop) = self.options.backoff.try_num(made - 1);
            if stop {
                error!(
                    destination,
                    attempts = made,
                    error = %err,
                    "dropping message, backoff exhausted"
                );
                self.reject(source, handle).await;
                return Flow::Continue;
            }

            warn!(
                destination,
                attempt = made,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "failure handling message, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stopped(shutdown) => {
                    debug!(destination, "shutdown during retry wait, handing message back");
                    if let Err(err) = source.requeue(handle).await {
                        error!(destination, error = %err, "failure to requeue message");
                    }
                    return Flow::Shutdown;
                }
            }

            if redelivery == Redelivery::Republish {
                delivery
                    .headers
                    .insert(RETRY_COUNT_HEADER.to_owned(), made.to_string());

                if let Err(err) = source.republish(handle, &delivery).await {
                    error!(
                        destination,
                        error = %err,
                        "failure to republish message for retry, restarting session"
                    );
                    return Flow::Restart;
                }
                return Flow::Continue;
            }
        }
    }

    async fn reject<S: Source>(&self, source: &mut S, handle: S::Handle) {
        if let Err(err) = source.reject(handle).await {
            error!(
                destination = self.transport.destination(),
                error = %err,
                "failure to reject message"
            );
        }
    }
}

fn record_failure(ctx: &Context, err: &HandlerError) {
    let span = ctx.span();
    span.record_error(err);
    span.set_status(Status::Error {
        description: Cow::from(err.to_string()),
    });
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}
