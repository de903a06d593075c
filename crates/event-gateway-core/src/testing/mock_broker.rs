//! Mock Kafka broker for integration testing.
//!
//! A lightweight mock broker that:
//! - Accepts Kafka protocol connections
//! - Records all requests received
//! - Returns configurable responses

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_util::codec::Framed;

use crate::network::{KafkaCodec, ResponseFrame};
use crate::protocol::ProduceEnvelope;

/// API keys used by the tests.
pub mod api_keys {
    pub use crate::protocol::{FIND_COORDINATOR, METADATA, PRODUCE};
    pub const API_VERSIONS: i16 = 18;
}

/// A recorded broker call.
#[derive(Debug, Clone)]
pub struct BrokerCall {
    /// The API key of the request.
    pub api_key: i16,
    /// The API version of the request.
    pub api_version: i16,
    /// The correlation ID.
    pub correlation_id: i32,
    /// The raw request bytes (without length prefix).
    pub request_bytes: Bytes,
}

impl BrokerCall {
    /// Decode the call as a produce request.
    #[must_use]
    pub fn produce(&self) -> Option<ProduceEnvelope> {
        ProduceEnvelope::decode(self.request_bytes.clone()).ok()
    }
}

/// Response generator: the response bytes following the correlation id.
pub type ResponseGenerator = Arc<dyn Fn(&BrokerCall) -> Bytes + Send + Sync>;

/// Mock Kafka broker for testing.
pub struct MockBroker {
    address: String,
    shutdown_tx: Option<broadcast::Sender<()>>,
    call_log: Arc<RwLock<Vec<BrokerCall>>>,
    response_handlers: Arc<RwLock<HashMap<i16, ResponseGenerator>>>,
}

impl MockBroker {
    /// Create a new mock broker that will bind to the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            shutdown_tx: None,
            call_log: Arc::new(RwLock::new(Vec::new())),
            response_handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the mock broker.
    ///
    /// Returns the actual address the broker is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind(&self.address).await?;
        let actual_address = listener.local_addr()?.to_string();
        self.address = actual_address.clone();

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let call_log = self.call_log.clone();
        let response_handlers = self.response_handlers.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _addr)) => {
                                let call_log = call_log.clone();
                                let response_handlers = response_handlers.clone();
                                let shutdown_rx = shutdown_tx.subscribe();

                                tokio::spawn(async move {
                                    Self::handle_connection(stream, call_log, response_handlers, shutdown_rx).await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Ok(actual_address)
    }

    /// Stop the mock broker.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Register a response handler for a specific API key.
    pub async fn register_handler(&self, api_key: i16, handler: ResponseGenerator) {
        self.response_handlers.write().await.insert(api_key, handler);
    }

    /// Get all recorded calls.
    pub async fn get_calls(&self) -> Vec<BrokerCall> {
        self.call_log.read().await.clone()
    }

    /// Get calls filtered by API key.
    pub async fn get_calls_for_api(&self, api_key: i16) -> Vec<BrokerCall> {
        self.call_log
            .read()
            .await
            .iter()
            .filter(|c| c.api_key == api_key)
            .cloned()
            .collect()
    }

    /// Clear the call log.
    pub async fn clear_calls(&self) {
        self.call_log.write().await.clear();
    }

    /// Get the broker address (the bound one once started).
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn handle_connection(
        stream: TcpStream,
        call_log: Arc<RwLock<Vec<BrokerCall>>>,
        response_handlers: Arc<RwLock<HashMap<i16, ResponseGenerator>>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut framed = Framed::new(stream, KafkaCodec::new());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = framed.next() => {
                    let Some(Ok(frame)) = result else {
                        break;
                    };

                    let call = BrokerCall {
                        api_key: frame.api_key,
                        api_version: frame.api_version,
                        correlation_id: frame.correlation_id,
                        request_bytes: frame.bytes.freeze(),
                    };
                    call_log.write().await.push(call.clone());

                    // acks=0 produce requests get no response
                    if call.produce().is_some_and(|envelope| envelope.request.acks == 0) {
                        continue;
                    }

                    let body = {
                        let handlers = response_handlers.read().await;
                        match handlers.get(&call.api_key) {
                            Some(handler) => handler(&call),
                            None => Bytes::new(),
                        }
                    };

                    let response = ResponseFrame {
                        correlation_id: call.correlation_id,
                        body: BytesMut::from(&body[..]),
                    };
                    if framed.send(response).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Response generators for the APIs the gateway cares about.
pub mod responses {
    use super::{BrokerCall, ResponseGenerator};
    use std::sync::Arc;

    use bytes::{Bytes, BytesMut};
    use kafka_protocol::messages::metadata_response::MetadataResponseBroker;
    use kafka_protocol::messages::produce_response::{PartitionProduceResponse, TopicProduceResponse};
    use kafka_protocol::messages::{BrokerId, MetadataResponse, ProduceResponse, ResponseHeader};
    use kafka_protocol::protocol::{Encodable, HeaderVersion, StrBytes};

    /// Encode header and body, dropping the correlation id the codec adds back.
    fn encode<T: Encodable + HeaderVersion>(response: &T, version: i16) -> Bytes {
        let mut buf = BytesMut::new();
        let header_version = T::header_version(version);
        let encoded = ResponseHeader::default()
            .encode(&mut buf, header_version)
            .and_then(|()| response.encode(&mut buf, version));

        match encoded {
            Ok(()) => buf.split_off(4).freeze(),
            Err(_) => Bytes::new(),
        }
    }

    /// A metadata response advertising the given `(node_id, host, port)` brokers.
    pub fn metadata_response(brokers: Vec<(i32, String, i32)>) -> ResponseGenerator {
        Arc::new(move |call: &BrokerCall| {
            let response = MetadataResponse::default().with_brokers(
                brokers
                    .iter()
                    .map(|(id, host, port)| {
                        MetadataResponseBroker::default()
                            .with_node_id(BrokerId(*id))
                            .with_host(StrBytes::from_string(host.clone()))
                            .with_port(*port)
                    })
                    .collect(),
            );
            encode(&response, call.api_version)
        })
    }

    /// A produce response acknowledging every partition in the request with
    /// `error_code`.
    pub fn produce_response(error_code: i16, base_offset: i64) -> ResponseGenerator {
        Arc::new(move |call: &BrokerCall| {
            let topics = call
                .produce()
                .map(|envelope| envelope.request.topic_data)
                .unwrap_or_default();

            let response = ProduceResponse::default().with_responses(
                topics
                    .into_iter()
                    .map(|topic| {
                        TopicProduceResponse::default()
                            .with_name(topic.name)
                            .with_partition_responses(
                                topic
                                    .partition_data
                                    .iter()
                                    .map(|p| {
                                        PartitionProduceResponse::default()
                                            .with_index(p.index)
                                            .with_error_code(error_code)
                                            .with_base_offset(base_offset)
                                    })
                                    .collect(),
                            )
                    })
                    .collect(),
            );
            encode(&response, call.api_version)
        })
    }
}
