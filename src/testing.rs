// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-process transport used by the unit tests.

use crate::{
    dialer::Dialer,
    errors::{BrokerError, HandlerError},
    handler::Handler,
    message::{Delivery, Envelope},
    transport::{
        Connector, FailureSignal, PublishTransport, Redelivery, Sink, Source, SubscribeTransport,
    },
};
use async_trait::async_trait;
use opentelemetry::Context;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Notify,
};

/// Polls `check` until it holds, panics after two seconds.
pub(crate) async fn eventually<F: Fn() -> bool>(check: F) {
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;

    assert!(polled.is_ok(), "condition not reached in time");
}

#[derive(Default)]
pub(crate) struct MemoryConnector {
    refused: AtomicUsize,
    refuse_all: AtomicBool,
    attempts: AtomicUsize,
    connected: AtomicUsize,
    closes: AtomicUsize,
    live: Mutex<HashMap<usize, UnboundedSender<BrokerError>>>,
}

#[derive(Debug)]
pub(crate) struct MemoryConnection {
    id: usize,
}

impl MemoryConnector {
    pub(crate) fn refuse_next(&self, count: usize) {
        self.refused.store(count, Ordering::SeqCst);
    }

    pub(crate) fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Every dial, successful or not.
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Reports a failure on the most recent connection.
    pub(crate) fn break_connection(&self) {
        let mut live = self.live.lock().unwrap();
        let latest = live.keys().max().copied();
        if let Some(tx) = latest.and_then(|id| live.remove(&id)) {
            let _ = tx.send(BrokerError::ConnectionLost("connection reset".to_owned()));
        }
    }

    /// Ends the failure channel of the most recent connection without error.
    pub(crate) fn shutdown_connection(&self) {
        let mut live = self.live.lock().unwrap();
        let latest = live.keys().max().copied();
        if let Some(id) = latest {
            live.remove(&id);
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;
    type Session = usize;

    async fn connect(&self) -> Result<(MemoryConnection, FailureSignal), BrokerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refused
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused || self.refuse_all.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionError("connection refused".to_owned()));
        }

        let id = self.connected.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.live.lock().unwrap().insert(id, tx);

        Ok((MemoryConnection { id }, rx))
    }

    async fn open_session(&self, conn: &MemoryConnection) -> Result<usize, BrokerError> {
        Ok(conn.id)
    }

    async fn close(&self, conn: &MemoryConnection) -> Result<(), BrokerError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().remove(&conn.id);
        Ok(())
    }
}

struct Queue {
    tx: UnboundedSender<Envelope>,
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<Envelope>>>,
}

/// Destinations backed by unbounded channels.
#[derive(Default)]
pub(crate) struct MemoryBroker {
    queues: Mutex<HashMap<String, Queue>>,
    sent: Mutex<Vec<Envelope>>,
}

impl MemoryBroker {
    fn queue(
        &self,
        destination: &str,
    ) -> (
        UnboundedSender<Envelope>,
        Arc<tokio::sync::Mutex<UnboundedReceiver<Envelope>>>,
    ) {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(destination.to_owned()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            Queue {
                tx,
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            }
        });

        (queue.tx.clone(), queue.rx.clone())
    }

    pub(crate) fn deliver(&self, envelope: Envelope) {
        self.sent.lock().unwrap().push(envelope.clone());
        let (tx, _) = self.queue(&envelope.destination);
        let _ = tx.send(envelope);
    }

    pub(crate) fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }
}

pub(crate) fn envelope(destination: &str, body: &str) -> Envelope {
    Envelope {
        id: uuid::Uuid::new_v4().to_string(),
        destination: destination.to_owned(),
        key: None,
        kind: None,
        headers: HashMap::default(),
        body: Some(body.as_bytes().to_vec()),
        content_type: crate::encoding::TEXT_CONTENT_TYPE,
        ttl: None,
    }
}

/// Publishes through a dialer session into a `MemoryBroker`. Envelopes of
/// kind `poison` are refused.
pub(crate) struct MemoryPublishTransport {
    pub(crate) dialer: Dialer<MemoryConnector>,
    pub(crate) broker: Arc<MemoryBroker>,
    opened: AtomicUsize,
}

impl MemoryPublishTransport {
    pub(crate) fn new(dialer: Dialer<MemoryConnector>, broker: Arc<MemoryBroker>) -> Self {
        MemoryPublishTransport {
            dialer,
            broker,
            opened: AtomicUsize::new(0),
        }
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

pub(crate) struct MemorySink {
    dialer: Dialer<MemoryConnector>,
    broker: Arc<MemoryBroker>,
    generation: u64,
    closed: AtomicBool,
}

#[async_trait]
impl PublishTransport for MemoryPublishTransport {
    type Sink = MemorySink;

    async fn open_sink(&self, _destination: &str) -> Result<MemorySink, BrokerError> {
        self.dialer.session().await?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(MemorySink {
            dialer: self.dialer.clone(),
            broker: self.broker.clone(),
            generation: self.dialer.generation(),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn send(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        if envelope.kind.as_deref() == Some("poison") {
            return Err(BrokerError::PublishingError("poison message".to_owned()));
        }

        self.broker.deliver(envelope.clone());
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.dialer.generation() != self.generation
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Settlement counters shared by all sessions of a transport.
#[derive(Default)]
pub(crate) struct Outcomes {
    pub(crate) acked: AtomicUsize,
    pub(crate) rejected: AtomicUsize,
    pub(crate) requeued: AtomicUsize,
    pub(crate) republished: AtomicUsize,
    pub(crate) sessions: AtomicUsize,
    pub(crate) closed_sessions: AtomicUsize,
    pub(crate) failed_opens: AtomicUsize,
}

impl Outcomes {
    pub(crate) fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub(crate) struct MemorySubscribeTransport {
    broker: Arc<MemoryBroker>,
    destination: String,
    redelivery: Redelivery,
    silent: bool,
    refuse_republish: bool,
    dialer: Option<Dialer<MemoryConnector>>,
    kick: Arc<Notify>,
    pub(crate) outcomes: Arc<Outcomes>,
}

impl MemorySubscribeTransport {
    pub(crate) fn new(
        broker: Arc<MemoryBroker>,
        destination: &str,
        redelivery: Redelivery,
    ) -> Self {
        MemorySubscribeTransport {
            broker,
            destination: destination.to_owned(),
            redelivery,
            silent: false,
            refuse_republish: false,
            dialer: None,
            kick: Arc::new(Notify::new()),
            outcomes: Arc::new(Outcomes::default()),
        }
    }

    /// Sessions never receive anything.
    pub(crate) fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Copies for retries are never accepted.
    pub(crate) fn refuse_republish(mut self) -> Self {
        self.refuse_republish = true;
        self
    }

    /// Sessions need a connection from `dialer` and end once it is lost.
    pub(crate) fn through(mut self, dialer: Dialer<MemoryConnector>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Ends the stream of the running session.
    pub(crate) fn kick(&self) {
        self.kick.notify_one();
    }
}

pub(crate) struct MemorySource {
    tx: UnboundedSender<Envelope>,
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<Envelope>>>,
    redelivery: Redelivery,
    silent: bool,
    refuse_republish: bool,
    link: Option<(Dialer<MemoryConnector>, u64)>,
    kick: Arc<Notify>,
    outcomes: Arc<Outcomes>,
}

/// Resolves once the connection a session was opened on is gone.
async fn connection_lost(link: &Option<(Dialer<MemoryConnector>, u64)>) {
    let Some((dialer, generation)) = link else {
        return std::future::pending().await;
    };

    while dialer.is_connected().await && dialer.generation() == *generation {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[async_trait]
impl SubscribeTransport for MemorySubscribeTransport {
    type Source = MemorySource;

    fn destination(&self) -> &str {
        &self.destination
    }

    async fn open_source(&self, _prefetch: u16) -> Result<MemorySource, BrokerError> {
        let link = match &self.dialer {
            Some(dialer) => {
                let generation = dialer.generation();
                if let Err(err) = dialer.session().await {
                    self.outcomes.failed_opens.fetch_add(1, Ordering::SeqCst);
                    return Err(err);
                }
                Some((dialer.clone(), generation))
            }
            None => None,
        };

        self.outcomes.sessions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = self.broker.queue(&self.destination);

        Ok(MemorySource {
            tx,
            rx,
            redelivery: self.redelivery,
            silent: self.silent,
            refuse_republish: self.refuse_republish,
            link,
            kick: self.kick.clone(),
            outcomes: self.outcomes.clone(),
        })
    }
}

#[async_trait]
impl Source for MemorySource {
    type Handle = Envelope;

    fn redelivery(&self) -> Redelivery {
        self.redelivery
    }

    async fn next_delivery(&mut self) -> Result<Option<(Delivery, Envelope)>, BrokerError> {
        if self.silent {
            self.kick.notified().await;
            return Ok(None);
        }

        let mut rx = self.rx.lock().await;
        let envelope = tokio::select! {
            envelope = rx.recv() => envelope,
            _ = self.kick.notified() => return Ok(None),
            _ = connection_lost(&self.link) => return Ok(None),
        };

        Ok(envelope.map(|envelope| {
            let delivery = Delivery {
                destination: envelope.destination.clone(),
                key: envelope.key.clone(),
                kind: envelope.kind.clone(),
                headers: envelope.headers.clone(),
                body: envelope.body.clone().unwrap_or_default(),
                redelivered: false,
            };
            (delivery, envelope)
        }))
    }

    async fn ack(&mut self, _handle: Envelope) -> Result<(), BrokerError> {
        self.outcomes.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&mut self, _handle: Envelope) -> Result<(), BrokerError> {
        self.outcomes.rejected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn requeue(&mut self, handle: Envelope) -> Result<(), BrokerError> {
        self.outcomes.requeued.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(handle)
            .map_err(|_| BrokerError::RequeuingMessageError)
    }

    async fn republish(
        &mut self,
        handle: Envelope,
        delivery: &Delivery,
    ) -> Result<(), BrokerError> {
        if self.refuse_republish {
            self.requeue(handle).await?;
            return Err(BrokerError::PublishingError("copy refused".to_owned()));
        }

        let envelope = Envelope {
            headers: delivery.headers.clone(),
            ..handle
        };
        self.tx
            .send(envelope)
            .map_err(|e| BrokerError::PublishingError(e.to_string()))?;

        self.outcomes.republished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.outcomes.closed_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler failing its first `failures` invocations.
pub(crate) struct ScriptedHandler {
    failures: usize,
    retryable: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<Delivery>>,
}

impl ScriptedHandler {
    pub(crate) fn succeeding() -> Arc<Self> {
        Self::failing(0, true)
    }

    pub(crate) fn failing(failures: usize, retryable: bool) -> Arc<Self> {
        Arc::new(ScriptedHandler {
            failures,
            retryable,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(vec![]),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<Delivery> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    async fn handle(&self, _ctx: &Context, delivery: &Delivery) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(delivery.clone());

        if call >= self.failures {
            return Ok(());
        }

        if self.retryable {
            Err(HandlerError::retryable("temporary failure"))
        } else {
            Err(HandlerError::terminal("bad"))
        }
    }
}
