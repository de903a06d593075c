//! TCP listeners for accepting Kafka client connections.
//!
//! One listener is bound per broker mapping. Each accepted connection is
//! forwarded to that mapping's broker (after dial-address rewriting) by its
//! own [`ConnectionHandler`] task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::mapping::{AddressMapping, DialAddressMap, HostPort};
use crate::metrics::GatewayMetrics;
use crate::pipeline::Dispatcher;

use super::connection::ConnectionHandler;
use super::rewrite::AddressRewriter;

struct BoundListener {
    mapping: AddressMapping,
    listener: TcpListener,
}

/// The running gateway: listeners, the message dispatcher and shared state.
pub struct Proxy {
    config: Arc<ProxyConfig>,
    metrics: Arc<GatewayMetrics>,
    listeners: Vec<BoundListener>,
    dispatcher: Dispatcher,
    rewriter: Arc<AddressRewriter>,
    dial_map: DialAddressMap,
    shutdown_tx: broadcast::Sender<()>,
    active_connections: Arc<AtomicUsize>,
}

impl Proxy {
    /// Bind every listener and prepare the message dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if a listen address cannot be bound.
    pub async fn bind(config: ProxyConfig, metrics: Arc<GatewayMetrics>) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let tuning = config.tuning();

        let mut listeners = Vec::with_capacity(config.mappings().len());
        for mapping in config.mappings() {
            let listener = TcpListener::bind(mapping.local.bind_address()).await?;
            let local = listener.local_addr()?;
            info!(remote = %mapping.remote, local = %local, "proxy listening");

            // port 0 binds an ephemeral port; advertise the real one
            let mut mapping = mapping.clone();
            mapping.local.port = local.port();
            listeners.push(BoundListener { mapping, listener });
        }
        let bound: Vec<AddressMapping> = listeners.iter().map(|l| l.mapping.clone()).collect();

        let dispatcher = Dispatcher::new(
            config.handlers().clone(),
            config.dead_letter().cloned(),
            Some(Arc::clone(&metrics)),
            tuning.router,
        );
        let rewriter = Arc::new(
            AddressRewriter::new(&bound, config.advertised_address())
                .with_metrics(Arc::clone(&metrics)),
        );
        let dial_map = DialAddressMap::from_entries(config.dial_address_mapping());

        Ok(Self {
            config: Arc::new(config),
            metrics,
            listeners,
            dispatcher,
            rewriter,
            dial_map,
            shutdown_tx,
            active_connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Get a shutdown handle to signal the proxy to stop.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Addresses the listeners are bound to, in mapping order.
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|bound| bound.listener.local_addr().ok())
            .collect()
    }

    /// Get the current number of active connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve until the shutdown handle fires.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener task panicked.
    pub async fn run(self) -> Result<()> {
        let mut tasks = JoinSet::new();
        let shared = Arc::new(Shared {
            dispatcher: self.dispatcher.clone(),
            rewriter: Arc::clone(&self.rewriter),
            metrics: Arc::clone(&self.metrics),
            shutdown_tx: self.shutdown_tx.clone(),
            active_connections: Arc::clone(&self.active_connections),
            max_connections: self.config.tuning().max_connections,
            dial_timeout: self.config.tuning().dial_timeout,
            max_frame_size: self.config.tuning().max_frame_size,
        });

        for bound in self.listeners {
            let upstream = self.dial_map.resolve(&bound.mapping.remote);
            if upstream != bound.mapping.remote {
                info!(remote = %bound.mapping.remote, dial = %upstream, "dialling rewritten broker address");
            }
            tasks.spawn(accept_loop(
                Arc::clone(&shared),
                bound,
                upstream,
                self.shutdown_tx.subscribe(),
            ));
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "listener task failed");
                result = Err(ProxyError::Shutdown);
            }
        }

        let active = self.active_connections.load(Ordering::Relaxed);
        if active > 0 {
            info!(active, "connections still closing");
        }

        info!("proxy stopped");
        result
    }
}

/// Per-listener copies of the proxy state.
struct Shared {
    dispatcher: Dispatcher,
    rewriter: Arc<AddressRewriter>,
    metrics: Arc<GatewayMetrics>,
    shutdown_tx: broadcast::Sender<()>,
    active_connections: Arc<AtomicUsize>,
    max_connections: usize,
    dial_timeout: Duration,
    max_frame_size: usize,
}

#[instrument(skip(shared, bound, shutdown_rx), fields(remote = %bound.mapping.remote, local = %bound.mapping.local))]
async fn accept_loop(
    shared: Arc<Shared>,
    bound: BoundListener,
    upstream: HostPort,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = bound.listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let current = shared.active_connections.load(Ordering::Relaxed);

                        if current >= shared.max_connections {
                            warn!(
                                peer = %addr,
                                active = current,
                                max = shared.max_connections,
                                "connection rejected: limit reached"
                            );
                            shared.metrics.record_connection_rejected();
                            continue;
                        }

                        shared.active_connections.fetch_add(1, Ordering::Relaxed);
                        shared.metrics.inc_client_connections();
                        debug!(peer = %addr, active = current + 1, "accepted connection");

                        let handler = ConnectionHandler::new(
                            shared.dispatcher.clone(),
                            Arc::clone(&shared.rewriter),
                            Arc::clone(&shared.metrics),
                            upstream.clone(),
                            shared.dial_timeout,
                            shared.max_frame_size,
                            &shared.shutdown_tx,
                        );
                        let shared = Arc::clone(&shared);

                        tokio::spawn(async move {
                            if let Err(e) = handler.handle(socket, addr).await {
                                match &e {
                                    ProxyError::Shutdown => {
                                        debug!(peer = %addr, "connection closed: shutdown");
                                    }
                                    ProxyError::Connection(io_err)
                                        if io_err.kind() == std::io::ErrorKind::UnexpectedEof =>
                                    {
                                        debug!(peer = %addr, "client disconnected");
                                    }
                                    _ => {
                                        error!(peer = %addr, error = %e, "connection error");
                                    }
                                }
                            }
                            shared.active_connections.fetch_sub(1, Ordering::Relaxed);
                            shared.metrics.dec_client_connections();
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfigBuilder;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    fn test_config(extra: Vec<String>) -> ProxyConfig {
        ProxyConfigBuilder::new(vec!["localhost:9092,127.0.0.1:0".to_string()])
            .extra(extra)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_binds_one_listener_per_mapping() {
        let config = ProxyConfigBuilder::new(vec![
            "broker-1:9092,127.0.0.1:0".to_string(),
            "broker-2:9092,127.0.0.1:0".to_string(),
        ])
        .build()
        .unwrap();

        let proxy = Proxy::bind(config, Arc::new(GatewayMetrics::new())).await.unwrap();
        let addrs = proxy.local_addrs();
        assert_eq!(addrs.len(), 2);
        assert_ne!(addrs[0].port(), 0);
        assert_ne!(addrs[0], addrs[1]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let proxy = Proxy::bind(test_config(vec![]), Arc::new(GatewayMetrics::new()))
            .await
            .unwrap();
        let shutdown = proxy.shutdown_handle();
        let task = tokio::spawn(proxy.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(()).unwrap();

        let result = timeout(Duration::from_secs(2), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let metrics = Arc::new(GatewayMetrics::new());
        let proxy = Proxy::bind(test_config(vec!["max-connections=0".to_string()]), metrics.clone())
            .await
            .unwrap();
        let addr = proxy.local_addrs()[0];
        let shutdown = proxy.shutdown_handle();
        let task = tokio::spawn(proxy.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        let _ = client.write_all(&[0, 0, 0, 4]).await;

        timeout(Duration::from_secs(2), async {
            while metrics.connections_rejected.get() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.send(()).unwrap();
        let _ = timeout(Duration::from_secs(2), task).await;
    }
}
