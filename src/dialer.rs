// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Manager
//!
//! A `Dialer` owns at most one live connection to a broker. The first dial is
//! reported to the caller as is; once a connection has been established, a
//! background watcher replaces it whenever the transport reports a failure,
//! pacing attempts with a `RetryPolicy`.
//!
//! Sessions are never handed out while no connection is held: callers get
//! `BrokerError::NotConnected` and are expected to retry later.

use crate::{
    errors::BrokerError,
    retry::RetryPolicy,
    transport::{Connector, FailureSignal},
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

struct DialerInner<C: Connector> {
    connector: C,
    policy: Arc<dyn RetryPolicy>,
    current: Mutex<Option<Arc<C::Connection>>>,
    generation: AtomicU64,
    shutdown: watch::Sender<bool>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Connection manager shared by publishers and subscribers of one broker.
pub struct Dialer<C: Connector> {
    inner: Arc<DialerInner<C>>,
}

impl<C: Connector> Clone for Dialer<C> {
    fn clone(&self) -> Self {
        Dialer {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> Dialer<C> {
    /// Creates a disconnected dialer. `policy` paces reconnection attempts.
    pub fn new(connector: C, policy: Arc<dyn RetryPolicy>) -> Self {
        let (shutdown, _) = watch::channel(false);

        Dialer {
            inner: Arc::new(DialerInner {
                connector,
                policy,
                current: Mutex::new(None),
                generation: AtomicU64::new(0),
                shutdown,
                watcher: Mutex::new(None),
            }),
        }
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Dials the broker and starts watching the new connection.
    ///
    /// A failed dial is returned as is, no retry happens here.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.inner.shutdown.send_replace(false);

        let failures = self.inner.dial().await?;

        let mut watcher = self.inner.watcher.lock().await;
        if let Some(previous) = watcher.take() {
            previous.abort();
        }
        *watcher = Some(tokio::spawn(supervise(self.inner.clone(), failures)));

        Ok(())
    }

    /// Drops the current connection, if any, and dials again.
    ///
    /// Used to bring a dialer back after its watcher gave up.
    pub async fn reconnect(&self) -> Result<(), BrokerError> {
        if let Some(conn) = self.inner.current.lock().await.take() {
            if let Err(err) = self.inner.connector.close(&conn).await {
                debug!(error = %err, "failure to close the previous connection");
            }
        }

        self.connect().await
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.current.lock().await.is_some()
    }

    /// Increases every time a new connection replaces the previous one.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Opens a new session on the current connection.
    pub async fn session(&self) -> Result<C::Session, BrokerError> {
        let conn = self
            .inner
            .current
            .lock()
            .await
            .clone()
            .ok_or(BrokerError::NotConnected)?;

        self.inner.connector.open_session(&conn).await
    }

    /// Stops the watcher and closes the connection. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.inner.shutdown.send_replace(true);

        if let Some(watcher) = self.inner.watcher.lock().await.take() {
            let _ = watcher.await;
        }

        let Some(conn) = self.inner.current.lock().await.take() else {
            return Ok(());
        };

        debug!("closing connection");
        self.inner.connector.close(&conn).await
    }
}

impl<C: Connector> DialerInner<C> {
    async fn dial(&self) -> Result<FailureSignal, BrokerError> {
        let (conn, failures) = self.connector.connect().await?;

        let previous = self.current.lock().await.replace(Arc::new(conn));
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(previous) = previous {
            if let Err(err) = self.connector.close(&previous).await {
                debug!(error = %err, "failure to close the replaced connection");
            }
        }

        Ok(failures)
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Watches one connection after another until shutdown or until the retry
/// policy gives up.
async fn supervise<C: Connector>(inner: Arc<DialerInner<C>>, mut failures: FailureSignal) {
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        let failure = tokio::select! {
            failure = failures.recv() => failure,
            _ = stopped(&mut shutdown) => return,
        };

        let Some(err) = failure else {
            debug!("connection closed, watcher stopped");
            return;
        };

        error!(error = %err, "connection lost, reconnecting");
        inner.current.lock().await.take();

        failures = match redial(&inner, &mut shutdown).await {
            Some(failures) => failures,
            None => return,
        };
    }
}

async fn redial<C: Connector>(
    inner: &DialerInner<C>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<FailureSignal> {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            result = inner.dial() => result,
            _ = stopped(shutdown) => return None,
        };

        let err = match result {
            Ok(failures) => {
                info!(attempt, "reconnected");
                return Some(failures);
            }
            Err(err) => err,
        };

        let (wait, stop) = inner.policy.try_num(attempt);
        if stop {
            error!(attempt, error = %err, "giving up reconnecting");
            return None;
        }

        warn!(
            attempt,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "failure to reconnect, retrying"
        );

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stopped(shutdown) => return None,
        }

        attempt = attempt.saturating_add(1);
    }
}
