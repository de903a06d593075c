//! Produce request decoding.
//!
//! The envelope is decoded with `kafka_protocol`'s [`RequestHeader`] and
//! [`ProduceRequest`] for every version the crate knows, from the
//! message-set era (v0-v2) up to the flexible versions. The partitions'
//! `records` fields are then handed to [`decode_records`].

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::produce_request::{PartitionProduceData, TopicProduceData};
use kafka_protocol::messages::{ProduceRequest, RequestHeader, TopicName, TransactionalId};
use kafka_protocol::protocol::{self, Decodable, Encodable, HeaderVersion, StrBytes};
use tracing::debug;

use crate::error::{DecodeError, DecodeResult, ProxyError, Result};
use crate::pipeline::Message;

use super::header::PRODUCE;
use super::records::decode_records;

/// Highest produce version the envelope decoder understands.
pub const MAX_PRODUCE_VERSION: i16 = <ProduceRequest as protocol::Message>::VERSIONS.max;

/// A decoded produce request: header and body.
#[derive(Debug, Clone)]
pub struct ProduceEnvelope {
    pub header: RequestHeader,
    pub request: ProduceRequest,
}

impl ProduceEnvelope {
    /// Decode a produce request frame, starting at the API key.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the frame is not a produce request of a
    /// supported version or is malformed.
    pub fn decode(frame: Bytes) -> DecodeResult<Self> {
        if frame.len() < 4 {
            return Err(DecodeError::Truncated {
                needed: 4,
                available: frame.len(),
            });
        }
        let api_key = i16::from_be_bytes([frame[0], frame[1]]);
        let api_version = i16::from_be_bytes([frame[2], frame[3]]);
        if api_key != PRODUCE || !(0..=MAX_PRODUCE_VERSION).contains(&api_version) {
            return Err(DecodeError::UnsupportedVersion {
                api_key,
                version: api_version,
            });
        }

        let mut buf = frame;
        let header = RequestHeader::decode(&mut buf, ProduceRequest::header_version(api_version))
            .map_err(|e| DecodeError::Protocol(format!("request header: {e:#}")))?;
        let request = ProduceRequest::decode(&mut buf, api_version)
            .map_err(|e| DecodeError::Protocol(format!("produce request: {e:#}")))?;

        Ok(Self { header, request })
    }

    #[must_use]
    pub fn api_version(&self) -> i16 {
        self.header.request_api_version
    }

    #[must_use]
    pub fn correlation_id(&self) -> i32 {
        self.header.correlation_id
    }

    /// Topic names in request order.
    #[must_use]
    pub fn topics(&self) -> Vec<&str> {
        self.request
            .topic_data
            .iter()
            .map(|topic| topic.name.0.as_str())
            .collect()
    }

    /// Decode the records of every partition into messages.
    ///
    /// Transaction markers are logged and dropped. The first malformed
    /// partition fails the whole request.
    ///
    /// # Errors
    ///
    /// Returns the [`DecodeError`] of the first partition that fails.
    pub fn messages(&self) -> DecodeResult<Vec<Message>> {
        let mut messages = Vec::new();

        for topic in &self.request.topic_data {
            let name = topic.name.0.as_str();
            for partition in &topic.partition_data {
                let Some(records) = partition.records.clone() else {
                    continue;
                };
                let decoded = decode_records(records)?;

                for marker in &decoded.control_records {
                    debug!(
                        topic = %name,
                        partition = partition.index,
                        control_type = marker.type_id,
                        coordinator_epoch = ?marker.coordinator_epoch(),
                        "skipping control record"
                    );
                }

                messages.extend(
                    decoded
                        .records
                        .into_iter()
                        .map(|record| Message::from_record(name, partition.index, record)),
                );
            }
        }

        Ok(messages)
    }
}

/// Decode a produce request frame straight into messages.
///
/// # Errors
///
/// See [`ProduceEnvelope::decode`] and [`ProduceEnvelope::messages`].
pub fn decode_produce_messages(frame: Bytes) -> DecodeResult<Vec<Message>> {
    ProduceEnvelope::decode(frame)?.messages()
}

/// Builder for produce request frames of any supported version.
#[derive(Debug, Clone)]
pub struct ProduceRequestBuilder {
    api_version: i16,
    correlation_id: i32,
    client_id: Option<String>,
    transactional_id: Option<String>,
    acks: i16,
    timeout_ms: i32,
    topics: Vec<(String, Vec<(i32, Option<Bytes>)>)>,
}

impl ProduceRequestBuilder {
    #[must_use]
    pub fn new(api_version: i16) -> Self {
        Self {
            api_version,
            correlation_id: 0,
            client_id: Some("event-gateway".to_string()),
            transactional_id: None,
            acks: -1,
            timeout_ms: 30_000,
            topics: Vec::new(),
        }
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: i32) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    #[must_use]
    pub fn client_id(mut self, client_id: Option<&str>) -> Self {
        self.client_id = client_id.map(str::to_string);
        self
    }

    /// Only valid from version 3.
    #[must_use]
    pub fn transactional_id(mut self, transactional_id: &str) -> Self {
        self.transactional_id = Some(transactional_id.to_string());
        self
    }

    #[must_use]
    pub fn acks(mut self, acks: i16) -> Self {
        self.acks = acks;
        self
    }

    /// Add `records` for `topic`/`partition`, grouping partitions by topic.
    #[must_use]
    pub fn partition(mut self, topic: &str, partition: i32, records: Option<Bytes>) -> Self {
        match self.topics.iter_mut().find(|(name, _)| name == topic) {
            Some((_, partitions)) => partitions.push((partition, records)),
            None => self
                .topics
                .push((topic.to_string(), vec![(partition, records)])),
        }
        self
    }

    /// The request body as a `kafka_protocol` message.
    #[must_use]
    pub fn request(&self) -> ProduceRequest {
        ProduceRequest::default()
            .with_transactional_id(
                self.transactional_id
                    .clone()
                    .map(|id| TransactionalId(StrBytes::from_string(id))),
            )
            .with_acks(self.acks)
            .with_timeout_ms(self.timeout_ms)
            .with_topic_data(
                self.topics
                    .iter()
                    .map(|(name, partitions)| {
                        TopicProduceData::default()
                            .with_name(TopicName(StrBytes::from_string(name.clone())))
                            .with_partition_data(
                                partitions
                                    .iter()
                                    .map(|(index, records)| {
                                        PartitionProduceData::default()
                                            .with_index(*index)
                                            .with_records(records.clone())
                                    })
                                    .collect(),
                            )
                    })
                    .collect(),
            )
    }

    /// Encode the request starting at the API key, without a length prefix.
    ///
    /// # Errors
    ///
    /// Fails if the version is unknown or a field is set that the version
    /// cannot carry.
    pub fn build(&self) -> Result<Bytes> {
        let header = RequestHeader::default()
            .with_request_api_key(PRODUCE)
            .with_request_api_version(self.api_version)
            .with_correlation_id(self.correlation_id)
            .with_client_id(self.client_id.clone().map(StrBytes::from_string));

        let mut buf = BytesMut::new();
        header
            .encode(&mut buf, ProduceRequest::header_version(self.api_version))
            .and_then(|()| self.request().encode(&mut buf, self.api_version))
            .map_err(|e| ProxyError::ProtocolEncode {
                message: format!("{e:#}"),
            })?;
        Ok(buf.freeze())
    }

    /// Encode the request with its `int32` length prefix, as sent on the wire.
    ///
    /// # Errors
    ///
    /// See [`ProduceRequestBuilder::build`].
    pub fn build_frame(&self) -> Result<Bytes> {
        let body = self.build()?;
        let mut frame = BytesMut::with_capacity(4 + body.len());
        frame.put_i32(body.len() as i32);
        frame.put_slice(&body);
        Ok(frame.freeze())
    }
}
