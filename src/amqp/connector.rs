// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connections
//!
//! Dials RabbitMQ and opens channels for the connection manager. Connection
//! errors reported by lapin are forwarded as the failure signal watched by the
//! `Dialer`.

use crate::{
    config::AmqpConfigs,
    errors::BrokerError,
    transport::{Connector, FailureSignal},
};
use async_trait::async_trait;
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use tokio::sync::mpsc;
use tracing::{debug, error};

const REPLY_SUCCESS: u16 = 200;

/// Connector dialing RabbitMQ with the URI built from `AmqpConfigs`.
pub struct AmqpConnector {
    uri: String,
    connection_name: String,
}

impl AmqpConnector {
    /// Creates a new connector.
    ///
    /// # Parameters
    /// * `cfg` - RabbitMQ connection settings
    ///
    /// # Returns
    /// A connector that has not dialed yet
    pub fn new(cfg: &AmqpConfigs) -> Self {
        AmqpConnector {
            uri: cfg.uri(),
            connection_name: cfg.connection_name.clone(),
        }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    type Connection = Connection;
    type Session = Channel;

    /// Opens an AMQP connection named after `connection_name`.
    ///
    /// # Returns
    /// The connection and a failure signal fed by lapin's error callback,
    /// or `BrokerError::ConnectionError`
    async fn connect(&self) -> Result<(Connection, FailureSignal), BrokerError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.clone()));

        let conn = match Connection::connect(&self.uri, options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(BrokerError::ConnectionError(err.to_string()))
            }
        }?;

        let (tx, failures) = mpsc::unbounded_channel();
        conn.on_error(move |err| {
            let _ = tx.send(BrokerError::ConnectionLost(err.to_string()));
        });

        debug!("amqp connected");
        Ok((conn, failures))
    }

    /// Creates a new channel on `conn`.
    async fn open_session(&self, conn: &Connection) -> Result<Channel, BrokerError> {
        match conn.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(c)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(BrokerError::ChannelError(err.to_string()))
            }
        }
    }

    /// Closes `conn` unless it is already gone.
    async fn close(&self, conn: &Connection) -> Result<(), BrokerError> {
        if !conn.status().connected() {
            return Ok(());
        }

        conn.close(REPLY_SUCCESS, "closing").await.map_err(|err| {
            error!(error = err.to_string(), "failure to close the connection");
            BrokerError::ConnectionError(err.to_string())
        })
    }
}
