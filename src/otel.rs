// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context travels in message headers. `HeaderInjector` and
//! `HeaderExtractor` adapt a plain header map to the OpenTelemetry carrier
//! traits, and `Telemetry` bundles the tracer and propagator a publisher or
//! subscriber was built with.

use opentelemetry::{
    global::{self, BoxedTracer},
    propagation::{Extractor, Injector, TextMapPropagator},
    trace::{SpanKind, TraceContextExt, Tracer},
    Context,
};
use std::{borrow::Cow, collections::HashMap, sync::Arc};

/// Writes trace context entries into a header map.
pub(crate) struct HeaderInjector<'a> {
    headers: &'a mut HashMap<String, String>,
}

impl<'a> HeaderInjector<'a> {
    pub(crate) fn new(headers: &'a mut HashMap<String, String>) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_lowercase(), value);
    }
}

/// Reads trace context entries from a header map.
pub(crate) struct HeaderExtractor<'a> {
    headers: &'a HashMap<String, String>,
}

impl<'a> HeaderExtractor<'a> {
    pub(crate) fn new(headers: &'a HashMap<String, String>) -> Self {
        Self { headers }
    }
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Tracer and propagator handed to publishers and subscribers.
///
/// Without an explicit propagator the process-wide one registered with
/// `opentelemetry::global` is used.
#[derive(Clone)]
pub struct Telemetry {
    tracer: Arc<BoxedTracer>,
    propagator: Option<Arc<dyn TextMapPropagator + Send + Sync>>,
}

impl Telemetry {
    pub fn new(tracer: BoxedTracer) -> Self {
        Telemetry {
            tracer: Arc::new(tracer),
            propagator: None,
        }
    }

    /// Uses the globally installed tracer provider.
    pub fn global(name: &'static str) -> Self {
        Self::new(global::tracer(name))
    }

    pub fn with_propagator<P>(mut self, propagator: P) -> Self
    where
        P: TextMapPropagator + Send + Sync + 'static,
    {
        self.propagator = Some(Arc::new(propagator));
        self
    }

    /// Adds the trace context of `ctx` to `headers`.
    pub fn inject(&self, ctx: &Context, headers: &mut HashMap<String, String>) {
        let mut injector = HeaderInjector::new(headers);
        match &self.propagator {
            Some(propagator) => propagator.inject_context(ctx, &mut injector),
            None => global::get_text_map_propagator(|propagator| {
                propagator.inject_context(ctx, &mut injector)
            }),
        }
    }

    pub fn extract(&self, headers: &HashMap<String, String>) -> Context {
        let extractor = HeaderExtractor::new(headers);
        match &self.propagator {
            Some(propagator) => propagator.extract(&extractor),
            None => global::get_text_map_propagator(|propagator| propagator.extract(&extractor)),
        }
    }

    /// Starts a consumer span parented on the context carried by `headers`.
    ///
    /// The returned context holds the active span; end it with
    /// `ctx.span().end()` once the delivery is settled.
    pub fn consumer_span(&self, headers: &HashMap<String, String>, name: &str) -> Context {
        let parent = self.extract(headers);

        let span = self
            .tracer
            .span_builder(Cow::from(name.to_owned()))
            .with_kind(SpanKind::Consumer)
            .start_with_context(self.tracer.as_ref(), &parent);

        parent.with_span(span)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Telemetry::global("brokers")
    }
}
