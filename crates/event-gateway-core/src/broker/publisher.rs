//! Dead-letter publishing over the Kafka wire protocol.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use kafka_protocol::messages::produce_request::{PartitionProduceData, TopicProduceData};
use kafka_protocol::messages::{ApiKey, ProduceRequest, ProduceResponse, TopicName};
use kafka_protocol::protocol::{Decodable, StrBytes};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{PublishError, ProxyError};
use crate::mapping::{DialAddressMap, HostPort};
use crate::pipeline::DeadLetterPublisher;
use crate::protocol::RecordBatchBuilder;

use super::connection::BrokerConnection;

/// Produce version used for dead-letter records. The oldest version
/// carrying record batches.
const PRODUCE_VERSION: i16 = 3;

/// Broker acknowledgment timeout sent with each produce request.
const PRODUCE_TIMEOUT_MS: i32 = 30_000;

/// Publishes payloads with a Produce request to the first reachable broker.
///
/// Records always go to partition 0 with `acks = 1`. The connection is kept
/// and reused until a request fails, then the broker list is walked again.
pub struct KafkaDeadLetterPublisher {
    brokers: Vec<String>,
    dial_map: DialAddressMap,
    dial_timeout: Duration,
    connection: Mutex<Option<Arc<BrokerConnection>>>,
}

impl KafkaDeadLetterPublisher {
    #[must_use]
    pub fn new(brokers: Vec<String>, dial_timeout: Duration) -> Self {
        Self {
            brokers,
            dial_map: DialAddressMap::default(),
            dial_timeout,
            connection: Mutex::new(None),
        }
    }

    /// Dial through the given address rewrites.
    #[must_use]
    pub fn with_dial_map(mut self, dial_map: DialAddressMap) -> Self {
        self.dial_map = dial_map;
        self
    }

    #[must_use]
    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    fn dial_address(&self, broker: &str) -> String {
        match HostPort::parse(broker) {
            Ok(address) => self.dial_map.resolve(&address).to_string(),
            Err(_) => broker.to_string(),
        }
    }

    async fn connection(&self) -> Result<Arc<BrokerConnection>, PublishError> {
        let mut cached = self.connection.lock().await;
        if let Some(connection) = cached.as_ref() {
            if connection.is_connected().await {
                return Ok(Arc::clone(connection));
            }
        }

        for broker in &self.brokers {
            let address = self.dial_address(broker);
            let connection = Arc::new(BrokerConnection::with_timeouts(
                address,
                self.dial_timeout,
                Duration::from_millis(PRODUCE_TIMEOUT_MS as u64) + self.dial_timeout,
            ));

            match connection.connect().await {
                Ok(()) => {
                    *cached = Some(Arc::clone(&connection));
                    return Ok(connection);
                }
                Err(e) => warn!(broker = %broker, error = %e, "dead-letter broker unreachable"),
            }
        }

        Err(PublishError::NoBrokersAvailable)
    }

    async fn forget(&self, connection: &BrokerConnection) {
        connection.disconnect().await;
        *self.connection.lock().await = None;
    }
}

/// Build the produce request carrying `payload` as a single record.
fn produce_request(topic: &str, payload: Bytes) -> crate::error::Result<ProduceRequest> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();

    let batch = RecordBatchBuilder::new()
        .base_timestamp(timestamp)
        .record(None, Some(payload))
        .build()?;

    Ok(ProduceRequest::default()
        .with_acks(1)
        .with_timeout_ms(PRODUCE_TIMEOUT_MS)
        .with_topic_data(vec![TopicProduceData::default()
            .with_name(TopicName::from(StrBytes::from_string(topic.to_string())))
            .with_partition_data(vec![PartitionProduceData::default()
                .with_index(0)
                .with_records(Some(batch))])]))
}

/// First non-zero partition error code in the response, if any.
fn first_error(response: &ProduceResponse) -> Option<i16> {
    response
        .responses
        .iter()
        .flat_map(|topic| topic.partition_responses.iter())
        .map(|partition| partition.error_code)
        .find(|code| *code != 0)
}

#[async_trait]
impl DeadLetterPublisher for KafkaDeadLetterPublisher {
    #[instrument(skip(self, payload), fields(payload_len = payload.len()))]
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        let connection = self.connection().await?;
        let request = produce_request(topic, payload)?;

        let mut body = match connection
            .send(ApiKey::Produce as i16, PRODUCE_VERSION, &request)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                self.forget(&connection).await;
                return Err(e.into());
            }
        };

        let response = ProduceResponse::decode(&mut body, PRODUCE_VERSION).map_err(|e| {
            ProxyError::ProtocolDecode {
                message: e.to_string(),
            }
        })?;

        if let Some(error_code) = first_error(&response) {
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                error_code,
            });
        }

        debug!(broker = %connection.address(), "dead-letter record written");
        Ok(())
    }
}
