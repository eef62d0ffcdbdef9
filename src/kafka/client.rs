// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Client context and client settings shared by producers and consumers.

use crate::{config::KafkaConfigs, errors::BrokerError};
use rdkafka::{
    config::ClientConfig,
    consumer::ConsumerContext,
    error::KafkaError,
    types::RDKafkaErrorCode,
    ClientContext,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

/// Forwards client errors that mean the cluster is unreachable to the
/// failure signal of the connection that owns the client.
pub struct KafkaContext {
    failures: UnboundedSender<BrokerError>,
}

impl KafkaContext {
    pub(crate) fn new(failures: UnboundedSender<BrokerError>) -> Self {
        KafkaContext { failures }
    }
}

impl ClientContext for KafkaContext {
    fn error(&self, error: KafkaError, reason: &str) {
        match error.rdkafka_error_code() {
            Some(RDKafkaErrorCode::AllBrokersDown) => {
                error!(error = %error, reason, "all kafka brokers are down");
                let _ = self
                    .failures
                    .send(BrokerError::ConnectionLost(reason.to_owned()));
            }
            _ => warn!(error = %error, reason, "kafka client error"),
        }
    }
}

impl ConsumerContext for KafkaContext {}

pub(crate) fn producer_config(cfg: &KafkaConfigs) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", cfg.bootstrap_servers())
        .set("client.id", &cfg.client_id)
        .set("message.timeout.ms", cfg.message_timeout_ms.to_string());

    client
}

pub(crate) fn consumer_config(cfg: &KafkaConfigs, prefetch: u16) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", cfg.bootstrap_servers())
        .set("client.id", &cfg.client_id)
        .set("group.id", &cfg.group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", cfg.session_timeout_ms.to_string())
        .set("queued.min.messages", prefetch.max(1).to_string());

    client
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn all_brokers_down_is_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let context = KafkaContext::new(tx);

        context.error(
            KafkaError::Global(RDKafkaErrorCode::MessageTimedOut),
            "slow",
        );
        assert!(rx.try_recv().is_err());

        context.error(
            KafkaError::Global(RDKafkaErrorCode::AllBrokersDown),
            "3/3 brokers are down",
        );
        assert_eq!(
            rx.try_recv(),
            Ok(BrokerError::ConnectionLost("3/3 brokers are down".to_owned()))
        );
    }

    #[test]
    fn consumer_commits_manually() {
        let cfg = KafkaConfigs {
            brokers: vec!["k1:9092".to_owned(), "k2:9092".to_owned()],
            group_id: "billing".to_owned(),
            ..Default::default()
        };

        let client = consumer_config(&cfg, 0);

        assert_eq!(client.get("bootstrap.servers"), Some("k1:9092,k2:9092"));
        assert_eq!(client.get("group.id"), Some("billing"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("queued.min.messages"), Some("1"));
        assert_eq!(consumer_config(&cfg, 50).get("queued.min.messages"), Some("50"));
        assert_eq!(producer_config(&cfg).get("group.id"), None);
    }
}
