//! Single Kafka broker connection.
//!
//! A plain TCP connection with correlation ID tracking, used by the gateway
//! for its own requests to the cluster (dead-letter publishing). Client
//! traffic never goes through this type; it is relayed byte for byte.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::RequestHeader;
use kafka_protocol::protocol::{Encodable, HeaderVersion, StrBytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{ProxyError, Result};

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client id sent with every request.
const CLIENT_ID: &str = "event-gateway";

/// A connection to a single Kafka broker.
pub struct BrokerConnection {
    address: String,
    stream: Mutex<Option<TcpStream>>,
    correlation_id: AtomicI32,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl BrokerConnection {
    /// Create a new broker connection (not yet connected).
    #[must_use]
    pub fn new(address: String) -> Self {
        Self::with_timeouts(address, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a new broker connection with custom timeouts.
    #[must_use]
    pub fn with_timeouts(address: String, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            address,
            stream: Mutex::new(None),
            correlation_id: AtomicI32::new(0),
            connect_timeout,
            request_timeout,
        }
    }

    /// Get the broker address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Check if the connection is established.
    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Connect to the broker.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::BrokerUnavailable`] if the connection fails or
    /// times out.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn connect(&self) -> Result<()> {
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to connect to broker");
                return Err(self.unavailable(e.to_string()));
            }
            Err(_) => {
                warn!("connection timeout");
                return Err(self.unavailable("connection timeout"));
            }
        };

        stream.set_nodelay(true)?;
        *self.stream.lock().await = Some(stream);
        debug!("connected to broker");
        Ok(())
    }

    /// Disconnect from the broker.
    pub async fn disconnect(&self) {
        *self.stream.lock().await = None;
    }

    /// Encode `request` with a fresh header and send it.
    ///
    /// Returns the response body following the correlation id. Only
    /// non-flexible response headers are supported.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, sending or receiving fails.
    pub async fn send<R>(&self, api_key: i16, api_version: i16, request: &R) -> Result<Bytes>
    where
        R: Encodable + HeaderVersion,
    {
        let header = RequestHeader::default()
            .with_request_api_key(api_key)
            .with_request_api_version(api_version)
            .with_correlation_id(self.next_correlation_id())
            .with_client_id(Some(StrBytes::from_static_str(CLIENT_ID)));

        let mut buf = BytesMut::new();
        header
            .encode(&mut buf, R::header_version(api_version))
            .map_err(|e| ProxyError::ProtocolEncode {
                message: format!("failed to encode request header: {e}"),
            })?;
        request
            .encode(&mut buf, api_version)
            .map_err(|e| ProxyError::ProtocolEncode {
                message: format!("failed to encode request: {e}"),
            })?;

        let response = self.send_request(&buf).await?;
        Ok(response.slice(4..))
    }

    /// Send a raw request and receive the response.
    ///
    /// `request_bytes` is the full request (header and body) without the
    /// length prefix. The returned bytes start at the response correlation id.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The connection is not established
    /// - Writing or reading fails or times out
    /// - The response correlation ID doesn't match
    #[instrument(skip(self, request_bytes), fields(address = %self.address))]
    pub async fn send_request(&self, request_bytes: &[u8]) -> Result<Bytes> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| self.unavailable("not connected"))?;

        if request_bytes.len() < 8 {
            return Err(ProxyError::ProtocolEncode {
                message: "request too short".to_string(),
            });
        }
        let correlation_id = i32::from_be_bytes([
            request_bytes[4],
            request_bytes[5],
            request_bytes[6],
            request_bytes[7],
        ]);

        debug!(correlation_id, request_len = request_bytes.len(), "sending request");

        let mut write_buf = BytesMut::with_capacity(4 + request_bytes.len());
        write_buf.put_u32(request_bytes.len() as u32);
        write_buf.extend_from_slice(request_bytes);

        let write_result = timeout(self.request_timeout, async {
            stream.write_all(&write_buf).await?;
            stream.flush().await
        })
        .await;

        match write_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                *guard = None;
                return Err(ProxyError::Connection(e));
            }
            Err(_) => return Err(self.unavailable("write timeout")),
        }

        let read_result = timeout(self.request_timeout, async {
            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await?;
            let response_len = u32::from_be_bytes(len_buf) as usize;

            let mut response_buf = vec![0u8; response_len];
            stream.read_exact(&mut response_buf).await?;

            Ok::<_, std::io::Error>(response_buf)
        })
        .await;

        let response_buf = match read_result {
            Ok(Ok(buf)) => buf,
            Ok(Err(e)) => {
                *guard = None;
                return Err(ProxyError::Connection(e));
            }
            Err(_) => return Err(self.unavailable("read timeout")),
        };

        if response_buf.len() < 4 {
            return Err(ProxyError::ProtocolDecode {
                message: "response too short".to_string(),
            });
        }

        let response_correlation_id = i32::from_be_bytes([
            response_buf[0],
            response_buf[1],
            response_buf[2],
            response_buf[3],
        ]);

        if response_correlation_id != correlation_id {
            return Err(ProxyError::CorrelationIdMismatch {
                expected: correlation_id,
                actual: response_correlation_id,
            });
        }

        debug!(correlation_id, response_len = response_buf.len(), "received response");

        Ok(Bytes::from(response_buf))
    }

    /// Generate a new correlation ID.
    #[must_use]
    pub fn next_correlation_id(&self) -> i32 {
        self.correlation_id.fetch_add(1, Ordering::Relaxed)
    }

    fn unavailable(&self, message: impl Into<String>) -> ProxyError {
        ProxyError::BrokerUnavailable {
            address: self.address.clone(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_correlation_id_generation() {
        let conn = BrokerConnection::new("localhost:9092".to_string());
        assert_eq!(conn.next_correlation_id(), 0);
        assert_eq!(conn.next_correlation_id(), 1);
        assert_eq!(conn.address(), "localhost:9092");
    }

    #[tokio::test]
    async fn test_not_connected() {
        let conn = BrokerConnection::new("localhost:9092".to_string());
        assert!(!conn.is_connected().await);

        let result = conn.send_request(&[0u8; 8]).await;
        assert!(matches!(result, Err(ProxyError::BrokerUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let conn = BrokerConnection::with_timeouts(
            addr.to_string(),
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        let result = conn.connect().await;
        assert!(matches!(result, Err(ProxyError::BrokerUnavailable { ref address, .. }) if *address == addr.to_string()));
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut len = [0u8; 4];
            socket.read_exact(&mut len).await.unwrap();
            let mut request = vec![0u8; u32::from_be_bytes(len) as usize];
            socket.read_exact(&mut request).await.unwrap();

            // echo the correlation id followed by a marker byte
            let mut response = Vec::new();
            response.extend_from_slice(&5u32.to_be_bytes());
            response.extend_from_slice(&request[4..8]);
            response.push(0xab);
            socket.write_all(&response).await.unwrap();
        });

        let conn = BrokerConnection::new(addr.to_string());
        conn.connect().await.unwrap();

        let request = [0, 0, 0, 3, 0, 0, 0, 42];
        let response = conn.send_request(&request).await.unwrap();
        assert_eq!(&response[..], &[0, 0, 0, 42, 0xab]);
    }

    #[tokio::test]
    async fn test_correlation_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 12];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&[0, 0, 0, 4, 0, 0, 0, 7]).await.unwrap();
        });

        let conn = BrokerConnection::new(addr.to_string());
        conn.connect().await.unwrap();

        let result = conn.send_request(&[0, 0, 0, 3, 0, 0, 0, 1]).await;
        assert!(matches!(
            result,
            Err(ProxyError::CorrelationIdMismatch {
                expected: 1,
                actual: 7
            })
        ));
    }
}
