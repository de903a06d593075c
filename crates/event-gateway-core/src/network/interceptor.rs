//! Produce request interception on the client→broker byte stream.
//!
//! Requests are relayed as they arrive. Only the 8-byte
//! [`RequestKeyVersion`] and the correlation id are always read; the rest of
//! a request is streamed to the broker untouched unless it is a produce
//! request and there are handlers to feed. In that case the body is teed into
//! a buffer, forwarded, decoded, and the messages are queued on the
//! [`MessageRouter`]. Decode failures are logged; the request has already
//! been forwarded.

use std::io;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

use crate::error::{ProxyError, Result};
use crate::metrics::GatewayMetrics;
use crate::pipeline::MessageRouter;
use crate::protocol::{ProduceEnvelope, RequestKeyVersion, REQUEST_KEY_VERSION_SIZE};

use super::codec::DEFAULT_MAX_FRAME_SIZE;
use super::rewrite::InFlightRequests;

/// What happened to one intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub header: RequestKeyVersion,
    pub correlation_id: i32,
    /// Decoder input: the request from its API key on. Empty unless the
    /// request was inspected.
    pub tee: Bytes,
    /// Whether the request continues to the broker. Always true; the
    /// gateway never swallows requests.
    pub should_reply: bool,
    /// Messages handed to the router.
    pub submitted: usize,
}

/// Watches requests for produce payloads.
pub struct ProduceInterceptor {
    router: Arc<MessageRouter>,
    metrics: Option<Arc<GatewayMetrics>>,
    max_frame_size: usize,
}

impl ProduceInterceptor {
    #[must_use]
    pub fn new(router: Arc<MessageRouter>) -> Self {
        Self {
            router,
            metrics: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Largest produce request buffered for inspection. Bigger ones are
    /// relayed without decoding.
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Relay one request from `client` to `broker`.
    ///
    /// Returns `None` when the client closed the connection between requests.
    ///
    /// # Errors
    ///
    /// Returns an error if either side fails, the client disconnects
    /// mid-request, or the declared length is impossible.
    pub async fn intercept<R, W>(
        &self,
        client: &mut R,
        broker: &mut W,
        in_flight: &InFlightRequests,
    ) -> Result<Option<InterceptedRequest>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut raw = [0u8; REQUEST_KEY_VERSION_SIZE];
        if !read_header(client, &mut raw).await? {
            return Ok(None);
        }
        let header = RequestKeyVersion::from_bytes(raw);

        let body_len = header.body_len().ok_or_else(|| ProxyError::ProtocolDecode {
            message: format!("invalid request length {}", header.length),
        })?;
        let remaining = body_len.checked_sub(4).ok_or_else(|| ProxyError::ProtocolDecode {
            message: format!(
                "request length {} leaves no room for a correlation id",
                header.length
            ),
        })?;
        let correlation_id = client.read_i32().await?;
        in_flight.track(correlation_id, header.api_key, header.api_version);

        if let Some(metrics) = &self.metrics {
            metrics.record_request(header.api_key);
            metrics.record_bytes_received((body_len + 8) as u64);
        }

        broker.write_all(&raw).await?;
        broker.write_i32(correlation_id).await?;

        let inspect = header.is_produce() && self.router.has_handlers();
        if inspect && body_len > self.max_frame_size {
            warn!(
                correlation_id,
                length = header.length,
                max = self.max_frame_size,
                "produce request too large to inspect, forwarding unchanged"
            );
        }

        if !inspect || body_len > self.max_frame_size {
            relay(client, broker, remaining).await?;
            broker.flush().await?;
            return Ok(Some(InterceptedRequest {
                header,
                correlation_id,
                tee: Bytes::new(),
                should_reply: true,
                submitted: 0,
            }));
        }

        let mut tee = BytesMut::with_capacity(body_len + 4);
        tee.put_i16(header.api_key);
        tee.put_i16(header.api_version);
        tee.put_i32(correlation_id);
        tee.resize(body_len + 4, 0);
        client.read_exact(&mut tee[8..]).await?;
        broker.write_all(&tee[8..]).await?;
        broker.flush().await?;

        let tee = tee.freeze();
        let submitted = self.dispatch(&header, correlation_id, tee.clone()).await;

        Ok(Some(InterceptedRequest {
            header,
            correlation_id,
            tee,
            should_reply: true,
            submitted,
        }))
    }

    async fn dispatch(&self, header: &RequestKeyVersion, correlation_id: i32, frame: Bytes) -> usize {
        let decoded = ProduceEnvelope::decode(frame).and_then(|envelope| envelope.messages());

        let messages = match decoded {
            Ok(messages) => messages,
            Err(e) => {
                error!(
                    error = %e,
                    api_version = header.api_version,
                    correlation_id,
                    "error decoding ProduceRequest"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_decode_error();
                }
                return 0;
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_messages_decoded(messages.len());
        }
        debug!(
            api_version = header.api_version,
            correlation_id,
            messages = messages.len(),
            "decoded produce request"
        );

        if messages.is_empty() {
            return 0;
        }
        self.router.submit(messages).await
    }
}

/// Fill `raw` with the request header. `false` on a clean close before the
/// first byte.
async fn read_header<R>(client: &mut R, raw: &mut [u8; REQUEST_KEY_VERSION_SIZE]) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < raw.len() {
        let n = client.read(&mut raw[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        filled += n;
    }
    Ok(true)
}

/// Stream exactly `len` bytes from `client` to `broker`.
async fn relay<R, W>(client: &mut R, broker: &mut W, len: usize) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(&mut (&mut *client).take(len as u64), broker).await?;
    if copied < len as u64 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}
