//! Test harness running the gateway in front of a mock broker.
//!
//! Provides a complete test environment with:
//! - Mock Kafka broker
//! - A running [`Proxy`] with one listener mapped to it
//! - Helpers for sending requests through the proxy and inspecting what the
//!   broker received

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::broker::BrokerConnection;
use crate::config::ProxyConfigBuilder;
use crate::error::{PublishError, Result};
use crate::metrics::GatewayMetrics;
use crate::network::Proxy;
use crate::pipeline::{DeadLetterPublisher, MessageHandler};

use super::mock_broker::{BrokerCall, MockBroker, ResponseGenerator};

/// Dead-letter publisher keeping payloads in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Bytes)>>,
}

impl RecordingPublisher {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every `(topic, payload)` published so far.
    pub async fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> std::result::Result<(), PublishError> {
        self.published.lock().await.push((topic.to_string(), payload));
        Ok(())
    }
}

/// Test harness for integration testing.
pub struct GatewayTestHarness {
    mock_broker: MockBroker,
    broker_addr: String,
    proxy_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    proxy_task: Option<JoinHandle<Result<()>>>,
    /// Metrics of the running proxy.
    pub metrics: Arc<GatewayMetrics>,
}

impl GatewayTestHarness {
    /// A gateway without handlers.
    ///
    /// # Panics
    ///
    /// Panics if the mock broker or proxy cannot start.
    pub async fn new() -> Self {
        GatewayHarnessBuilder::new().build().await
    }

    #[must_use]
    pub fn builder() -> GatewayHarnessBuilder {
        GatewayHarnessBuilder::new()
    }

    /// Get the mock broker address.
    #[must_use]
    pub fn broker_address(&self) -> &str {
        &self.broker_addr
    }

    /// The address clients connect to.
    #[must_use]
    pub fn proxy_address(&self) -> SocketAddr {
        self.proxy_addr
    }

    /// Register a custom response handler for an API key.
    pub async fn register_handler(&self, api_key: i16, handler: ResponseGenerator) {
        self.mock_broker.register_handler(api_key, handler).await;
    }

    /// Get all recorded broker calls.
    pub async fn get_broker_calls(&self) -> Vec<BrokerCall> {
        self.mock_broker.get_calls().await
    }

    /// Get broker calls filtered by API key.
    pub async fn get_broker_calls_for_api(&self, api_key: i16) -> Vec<BrokerCall> {
        self.mock_broker.get_calls_for_api(api_key).await
    }

    /// A client connection to the proxy.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy does not accept the connection.
    pub async fn connect(&self) -> Result<BrokerConnection> {
        let client = BrokerConnection::new(self.proxy_addr.to_string());
        client.connect().await?;
        Ok(client)
    }

    /// Stop the proxy and the mock broker.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.proxy_task.take() {
            let _ = task.await;
        }
        self.mock_broker.stop().await;
    }
}

/// Builder for a [`GatewayTestHarness`].
#[derive(Default)]
pub struct GatewayHarnessBuilder {
    handlers: Vec<Arc<dyn MessageHandler>>,
    dead_letter: Option<(Arc<dyn DeadLetterPublisher>, String)>,
    extra: Vec<String>,
    advertised_address: Option<String>,
}

impl GatewayHarnessBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    #[must_use]
    pub fn dead_letter(mut self, publisher: Arc<dyn DeadLetterPublisher>, topic: &str) -> Self {
        self.dead_letter = Some((publisher, topic.to_string()));
        self
    }

    #[must_use]
    pub fn extra(mut self, entry: &str) -> Self {
        self.extra.push(entry.to_string());
        self
    }

    #[must_use]
    pub fn advertised_address(mut self, host: &str) -> Self {
        self.advertised_address = Some(host.to_string());
        self
    }

    /// Start the mock broker and the proxy.
    ///
    /// # Panics
    ///
    /// Panics if either cannot start.
    pub async fn build(self) -> GatewayTestHarness {
        let mut mock_broker = MockBroker::new("127.0.0.1:0");
        let broker_addr = mock_broker
            .start()
            .await
            .expect("Failed to start mock broker");

        let mut builder = ProxyConfigBuilder::new(vec![format!("{broker_addr},127.0.0.1:0")])
            .extra(self.extra);
        for handler in self.handlers {
            builder = builder.handler(handler);
        }
        if let Some((publisher, topic)) = self.dead_letter {
            builder = builder.dead_letter(publisher, topic);
        }
        if let Some(host) = self.advertised_address {
            builder = builder.advertised_address(host);
        }
        let config = builder.build().expect("Invalid harness configuration");

        let metrics = Arc::new(GatewayMetrics::new());
        let proxy = Proxy::bind(config, Arc::clone(&metrics))
            .await
            .expect("Failed to bind proxy");
        let proxy_addr = proxy.local_addrs()[0];
        let shutdown_tx = proxy.shutdown_handle();
        let proxy_task = tokio::spawn(proxy.run());

        GatewayTestHarness {
            mock_broker,
            broker_addr,
            proxy_addr,
            shutdown_tx,
            proxy_task: Some(proxy_task),
            metrics,
        }
    }
}
