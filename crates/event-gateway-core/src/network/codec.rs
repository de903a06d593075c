//! Kafka protocol frame codecs.
//!
//! Implements tokio's `Decoder` and `Encoder` traits for Kafka wire protocol frames.
//! Kafka uses a simple framing format: 4-byte big-endian length prefix followed by
//! the message bytes.
//!
//! The client→broker direction is relayed by the interceptor without framing
//! whole requests; [`KafkaCodec`] is used where a full request is needed
//! (the mock broker). [`ResponseCodec`] frames broker responses so the ones
//! carrying broker addresses can be rewritten.

use bytes::{Buf, BufMut, BytesMut};
use kafka_protocol::messages::ApiKey;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (100 MB by default).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// A parsed Kafka request frame containing the raw bytes and metadata.
#[derive(Debug)]
pub struct KafkaFrame {
    /// The raw API key. Keys unknown to this build are still relayed.
    pub api_key: i16,
    /// The API version.
    pub api_version: i16,
    /// The correlation ID for request/response matching.
    pub correlation_id: i32,
    /// The complete frame bytes (after the length prefix).
    pub bytes: BytesMut,
}

impl KafkaFrame {
    /// Whether this frame carries the given API.
    #[must_use]
    pub fn is(&self, api_key: ApiKey) -> bool {
        self.api_key == api_key as i16
    }
}

/// A response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// The correlation ID (must match the request).
    pub correlation_id: i32,
    /// The response bytes following the correlation ID, including any
    /// flexible header tagged fields.
    pub body: BytesMut,
}

/// Reads the length prefix, returning the frame length once it is complete.
fn complete_frame_len(src: &mut BytesMut, max_frame_size: usize) -> io::Result<Option<usize>> {
    // Need at least 4 bytes for the length prefix
    if src.len() < 4 {
        return Ok(None);
    }

    // Read length without consuming
    let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

    if length > max_frame_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame size {length} exceeds maximum {max_frame_size}"),
        ));
    }

    if src.len() < 4 + length {
        src.reserve(4 + length - src.len());
        return Ok(None);
    }

    Ok(Some(length))
}

fn encode_response(item: ResponseFrame, dst: &mut BytesMut) {
    // 4 bytes: length (correlation_id + body)
    // 4 bytes: correlation_id
    // N bytes: body
    let total_len = 4 + item.body.len();

    dst.reserve(4 + total_len);
    dst.put_u32(total_len as u32);
    dst.put_i32(item.correlation_id);
    dst.extend_from_slice(&item.body);
}

/// Codec for Kafka request frames.
///
/// Kafka messages are framed as:
/// - 4 bytes: message length (big-endian, excludes these 4 bytes)
/// - N bytes: message content
///
/// The first 8 bytes of the message content contain:
/// - 2 bytes: API key
/// - 2 bytes: API version
/// - 4 bytes: correlation ID
#[derive(Debug, Clone)]
pub struct KafkaCodec {
    max_frame_size: usize,
}

impl KafkaCodec {
    /// Create a new codec with default max frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a new codec with custom max frame size.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for KafkaCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for KafkaCodec {
    type Item = KafkaFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(length) = complete_frame_len(src, self.max_frame_size)? else {
            return Ok(None);
        };

        src.advance(4);
        let bytes = src.split_to(length);

        if bytes.len() < 8 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame too small for request header",
            ));
        }

        let api_key = i16::from_be_bytes([bytes[0], bytes[1]]);
        let api_version = i16::from_be_bytes([bytes[2], bytes[3]]);
        let correlation_id = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        Ok(Some(KafkaFrame {
            api_key,
            api_version,
            correlation_id,
            bytes,
        }))
    }
}

impl Encoder<ResponseFrame> for KafkaCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ResponseFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_response(item, dst);
        Ok(())
    }
}

/// Codec for the broker→client direction.
#[derive(Debug, Clone)]
pub struct ResponseCodec {
    max_frame_size: usize,
}

impl ResponseCodec {
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for ResponseCodec {
    fn default() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for ResponseCodec {
    type Item = ResponseFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(length) = complete_frame_len(src, self.max_frame_size)? else {
            return Ok(None);
        };

        if length < 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame too small for response header",
            ));
        }

        src.advance(4);
        let correlation_id = src.get_i32();
        let body = src.split_to(length - 4);

        Ok(Some(ResponseFrame {
            correlation_id,
            body,
        }))
    }
}

impl Encoder<ResponseFrame> for ResponseCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ResponseFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_response(item, dst);
        Ok(())
    }
}
