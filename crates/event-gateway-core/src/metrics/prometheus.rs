//! Prometheus metrics for the event gateway.
//!
//! Counters cover the three paths a request can take through the proxy:
//! plain forwarding, produce inspection and the dead-letter side channel.

use std::fmt;

use kafka_protocol::messages::ApiKey;
use prometheus::{Counter, CounterVec, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Outcome label of a handler chain run.
pub const RESULT_ACK: &str = "ack";
/// Outcome label of a failed handler chain run.
pub const RESULT_NACK: &str = "nack";
/// Outcome label of a message rejected by a handler.
pub const RESULT_REJECTED: &str = "rejected";

/// Gateway metrics collection.
pub struct GatewayMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Client requests by API key.
    pub requests_total: CounterVec,

    /// Current active client connections.
    pub active_client_connections: IntGauge,

    /// Connections refused because of the connection limit.
    pub connections_rejected: IntCounter,

    /// Messages decoded from produce requests.
    pub messages_decoded: IntCounter,

    /// Produce requests that failed to decode.
    pub decode_errors: IntCounter,

    /// Handler chain runs by result.
    pub handler_results: CounterVec,

    /// Dead-letter publishes by result.
    pub dead_letters: CounterVec,

    /// Broker addresses rewritten in responses.
    pub addresses_rewritten: IntCounter,

    /// Total bytes received from clients.
    pub bytes_received: Counter,

    /// Total bytes sent to clients.
    pub bytes_sent: Counter,
}

impl GatewayMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new(
                "event_gateway_requests_total",
                "Total number of client requests by API key",
            ),
            &["api_key"],
        )
        .expect("metric creation should succeed");

        let active_client_connections = IntGauge::new(
            "event_gateway_active_client_connections",
            "Current number of active client connections",
        )
        .expect("metric creation should succeed");

        let connections_rejected = IntCounter::new(
            "event_gateway_connections_rejected_total",
            "Client connections refused at the connection limit",
        )
        .expect("metric creation should succeed");

        let messages_decoded = IntCounter::new(
            "event_gateway_messages_decoded_total",
            "Messages decoded from produce requests",
        )
        .expect("metric creation should succeed");

        let decode_errors = IntCounter::new(
            "event_gateway_decode_errors_total",
            "Produce requests that could not be decoded",
        )
        .expect("metric creation should succeed");

        let handler_results = CounterVec::new(
            Opts::new(
                "event_gateway_handler_results_total",
                "Message handler chain runs by result",
            ),
            &["result"],
        )
        .expect("metric creation should succeed");

        let dead_letters = CounterVec::new(
            Opts::new(
                "event_gateway_dead_letters_total",
                "Dead-letter publishes by result",
            ),
            &["result"],
        )
        .expect("metric creation should succeed");

        let addresses_rewritten = IntCounter::new(
            "event_gateway_addresses_rewritten_total",
            "Broker addresses rewritten in metadata responses",
        )
        .expect("metric creation should succeed");

        let bytes_received = Counter::new(
            "event_gateway_bytes_received_total",
            "Total bytes received from clients",
        )
        .expect("metric creation should succeed");

        let bytes_sent = Counter::new(
            "event_gateway_bytes_sent_total",
            "Total bytes sent to clients",
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(active_client_connections.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(connections_rejected.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(messages_decoded.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(decode_errors.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(handler_results.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(dead_letters.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(addresses_rewritten.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(bytes_received.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(bytes_sent.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            requests_total,
            active_client_connections,
            connections_rejected,
            messages_decoded,
            decode_errors,
            handler_results,
            dead_letters,
            addresses_rewritten,
            bytes_received,
            bytes_sent,
        }
    }

    /// Record a client request. Unknown keys are labelled by number.
    pub fn record_request(&self, api_key: i16) {
        let label = match ApiKey::try_from(api_key) {
            Ok(key) => format!("{key:?}"),
            Err(_) => api_key.to_string(),
        };
        self.requests_total.with_label_values(&[label.as_str()]).inc();
    }

    pub fn inc_client_connections(&self) {
        self.active_client_connections.inc();
    }

    pub fn dec_client_connections(&self) {
        self.active_client_connections.dec();
    }

    pub fn record_connection_rejected(&self) {
        self.connections_rejected.inc();
    }

    pub fn record_messages_decoded(&self, count: usize) {
        self.messages_decoded.inc_by(count as u64);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.inc();
    }

    /// Record one handler chain run, labelled [`RESULT_ACK`], [`RESULT_NACK`]
    /// or [`RESULT_REJECTED`].
    pub fn record_handler_result(&self, result: &str) {
        self.handler_results.with_label_values(&[result]).inc();
    }

    pub fn record_dead_letter(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.dead_letters.with_label_values(&[result]).inc();
    }

    pub fn record_address_rewritten(&self) {
        self.addresses_rewritten.inc();
    }

    pub fn record_bytes_received(&self, bytes: u64) {
        self.bytes_received.inc_by(bytes as f64);
    }

    pub fn record_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.inc_by(bytes as f64);
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayMetrics")
            .field("active_client_connections", &self.active_client_connections.get())
            .field("messages_decoded", &self.messages_decoded.get())
            .field("decode_errors", &self.decode_errors.get())
            .finish_non_exhaustive()
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
