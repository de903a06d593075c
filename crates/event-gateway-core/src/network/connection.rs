//! Per-connection forwarding.
//!
//! Every client connection gets its own upstream connection to the broker
//! it dialled through the proxy. Two directions run side by side:
//!
//! 1. client → broker: request by request through the [`ProduceInterceptor`],
//!    which feeds this connection's own [`MessageRouter`]
//! 2. broker → client: response frames, with broker addresses rewritten in
//!    the ones tracked by [`InFlightRequests`]
//!
//! The connection ends when either side closes or shutdown is signalled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, warn};

use crate::error::{ProxyError, Result};
use crate::mapping::HostPort;
use crate::metrics::GatewayMetrics;
use crate::pipeline::{Dispatcher, MessageRouter};

use super::codec::ResponseCodec;
use super::interceptor::ProduceInterceptor;
use super::rewrite::{AddressRewriter, InFlightRequests};

/// State shared by every connection on a listener.
pub struct ConnectionHandler {
    dispatcher: Dispatcher,
    rewriter: Arc<AddressRewriter>,
    metrics: Arc<GatewayMetrics>,
    upstream: HostPort,
    dial_timeout: Duration,
    max_frame_size: usize,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatcher: Dispatcher,
        rewriter: Arc<AddressRewriter>,
        metrics: Arc<GatewayMetrics>,
        upstream: HostPort,
        dial_timeout: Duration,
        max_frame_size: usize,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Self {
        Self {
            dispatcher,
            rewriter,
            metrics,
            upstream,
            dial_timeout,
            max_frame_size,
            shutdown_tx: shutdown_tx.clone(),
            shutdown_rx: shutdown_tx.subscribe(),
        }
    }

    /// Dial the broker and relay until either side disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached, the stream breaks,
    /// or shutdown was signalled.
    #[instrument(skip(self, client), fields(peer = %peer, upstream = %self.upstream))]
    pub async fn handle(self, client: TcpStream, peer: SocketAddr) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.resubscribe();
        let upstream = self.upstream.to_string();
        let broker = match timeout(self.dial_timeout, TcpStream::connect(&upstream)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ProxyError::BrokerUnavailable {
                    address: upstream,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ProxyError::BrokerUnavailable {
                    address: upstream,
                    message: "dial timeout".to_string(),
                })
            }
        };
        client.set_nodelay(true)?;
        broker.set_nodelay(true)?;
        info!("client connected");

        let (client_read, client_write) = client.into_split();
        let (broker_read, broker_write) = broker.into_split();
        let in_flight = InFlightRequests::new();

        // dropped with the connection, which ends redelivery of its messages
        let router: Arc<MessageRouter> = Arc::new(self.dispatcher.start(&self.shutdown_tx));
        let interceptor = ProduceInterceptor::new(router)
            .with_metrics(Arc::clone(&self.metrics))
            .with_max_frame_size(self.max_frame_size);

        let requests = self.forward_requests(&interceptor, client_read, broker_write, &in_flight);
        let responses = self.forward_responses(broker_read, client_write, &in_flight);

        tokio::select! {
            result = requests => {
                debug!("client side closed");
                result
            }
            result = responses => {
                debug!("broker side closed");
                result
            }
            _ = shutdown_rx.recv() => {
                debug!("shutdown during connection handling");
                Err(ProxyError::Shutdown)
            }
        }
    }

    async fn forward_requests<R, W>(
        &self,
        interceptor: &ProduceInterceptor,
        client: R,
        mut broker: W,
        in_flight: &InFlightRequests,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut client = BufReader::new(client);

        while let Some(request) = interceptor
            .intercept(&mut client, &mut broker, in_flight)
            .await?
        {
            debug!(
                api_key = request.header.api_key,
                api_version = request.header.api_version,
                correlation_id = request.correlation_id,
                submitted = request.submitted,
                "forwarded request"
            );
        }

        Ok(())
    }

    async fn forward_responses<R, W>(&self, broker: R, client: W, in_flight: &InFlightRequests) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut responses = FramedRead::new(broker, ResponseCodec::with_max_frame_size(self.max_frame_size));
        let mut client = FramedWrite::new(client, ResponseCodec::with_max_frame_size(self.max_frame_size));

        while let Some(frame) = responses.next().await {
            let frame = frame.map_err(|e| {
                warn!(error = %e, "invalid response frame from broker");
                ProxyError::from(e)
            })?;

            let frame = match in_flight.take(frame.correlation_id) {
                Some((api_key, api_version)) => self.rewriter.rewrite(api_key, api_version, frame),
                None => frame,
            };

            self.metrics.record_bytes_sent(8 + frame.body.len() as u64);
            client.send(frame).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::AddressMapping;
    use crate::pipeline::{HandlerChain, RouterSettings};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn echo_broker() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            loop {
                let mut len = [0u8; 4];
                if socket.read_exact(&mut len).await.is_err() {
                    break;
                }
                let mut request = vec![0u8; u32::from_be_bytes(len) as usize];
                socket.read_exact(&mut request).await.unwrap();

                // respond with the correlation id and one byte
                socket.write_all(&5u32.to_be_bytes()).await.unwrap();
                socket.write_all(&request[4..8]).await.unwrap();
                socket.write_all(&[1]).await.unwrap();
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_relays_request_and_response() {
        let broker = echo_broker().await;
        let (shutdown, _) = broadcast::channel(1);

        let dispatcher = Dispatcher::new(HandlerChain::default(), None, None, RouterSettings::default());
        let mapping = AddressMapping::parse(&format!("{broker},:0")).unwrap();
        let metrics = Arc::new(GatewayMetrics::new());
        let handler = ConnectionHandler::new(
            dispatcher,
            Arc::new(AddressRewriter::new(&[mapping], None)),
            metrics.clone(),
            HostPort::new(broker.ip().to_string(), broker.port()),
            Duration::from_secs(1),
            1024,
            &shutdown,
        );

        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (socket, peer) = proxy.accept().await.unwrap();
            handler.handle(socket, peer).await
        });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client
            .write_all(&[0, 0, 0, 12, 0, 18, 0, 3, 0, 0, 0, 9, 0, 0, 0, 0])
            .await
            .unwrap();

        let mut response = [0u8; 9];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, [0, 0, 0, 5, 0, 0, 0, 9, 1]);

        drop(client);
        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(metrics.bytes_sent.get(), 9.0);
    }

    #[tokio::test]
    async fn test_unreachable_broker() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let (shutdown, _) = broadcast::channel(1);
        let handler = ConnectionHandler::new(
            Dispatcher::new(HandlerChain::default(), None, None, RouterSettings::default()),
            Arc::new(AddressRewriter::default()),
            Arc::new(GatewayMetrics::new()),
            HostPort::new("127.0.0.1", addr.port()),
            Duration::from_millis(500),
            1024,
            &shutdown,
        );

        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy.local_addr().unwrap();
        let _client = TcpStream::connect(proxy_addr).await.unwrap();
        let (socket, peer) = proxy.accept().await.unwrap();

        let result = handler.handle(socket, peer).await;
        assert!(matches!(result, Err(ProxyError::BrokerUnavailable { .. })));
    }
}
