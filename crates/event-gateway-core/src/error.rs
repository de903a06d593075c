//! Domain error types for the Kafka event gateway.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.
//! Each error class has a different blast radius:
//!
//! - [`ConfigError`] is fatal at startup, the proxy refuses to run.
//! - [`DecodeError`] is logged, the request is still forwarded unmodified.
//! - [`HandlerError`] turns into a negative acknowledgment and redelivery.
//! - [`PublishError`] is logged and never escalates to the forwarding path.

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The validated mapping list must never be empty.
    #[error("BrokersMapping is mandatory")]
    MissingBrokersMapping,

    /// A mapping entry did not split into two comma separated addresses.
    #[error("BrokersMapping should be in form 'remotehost:remoteport,localhost:localport'")]
    InvalidMappingFormat,

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// Broker and proxy would listen on the same host and port.
    #[error("broker and proxy can't listen to the same port on the same host. Broker is already listening at {remote}. Please configure a different listener port")]
    AddressCollision { remote: String },

    /// No server descriptor matched the Kafka protocol family.
    #[error("no Kafka brokers were found when configuring")]
    NoBrokersFound,

    /// A server URL could not be split into host and port.
    #[error("error getting port from broker {name}. URL: {url}")]
    InvalidServerUrl { name: String, url: String },

    /// Extra configuration must be `key=value`.
    #[error("invalid extra configuration '{0}' (expected 'key=value')")]
    InvalidExtraConfig(String),

    /// A recognised extra configuration key carried an unusable value.
    #[error("invalid value '{value}' for extra configuration '{key}'")]
    InvalidExtraValue { key: String, value: String },

    /// The requested server is not part of the contract.
    #[error("server {0} not found in the provided contract")]
    ServerNotFound(String),

    /// The requested server does not speak Kafka.
    #[error("server {name} has no kafka protocol configured but '{protocol}'")]
    NonKafkaServer { name: String, protocol: String },

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Errors raised while decoding the body of a produce request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes were available than the encoding requires.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// A length or count field was negative or out of range.
    #[error("invalid length {length} for {field}")]
    InvalidLength { field: &'static str, length: i64 },

    /// A batch base value too close to the `i64` limits to add record deltas to.
    #[error("{field} {base} leaves no room for record deltas")]
    DeltaOverflow { field: &'static str, base: i64 },

    /// Magic byte outside the supported encodings.
    #[error("unsupported magic byte {0}")]
    UnsupportedMagic(i8),

    /// Request version outside the decodable range.
    #[error("unsupported version {version} for api key {api_key}")]
    UnsupportedVersion { api_key: i16, version: i16 },

    /// The produce request envelope could not be decoded.
    #[error("protocol decode error: {0}")]
    Protocol(String),

    /// A record batch or message set could not be decoded.
    #[error("record decode error: {0}")]
    Records(String),
}

/// A failure raised by a message handler.
///
/// The message text is kept verbatim so it can be logged exactly as the
/// handler produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The handler's error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised by a message validator that could not reach a verdict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("validation failed: {0}")]
pub struct ValidatorError(pub String);

/// Errors raised by the dead-letter side channel.
#[derive(Error, Debug)]
pub enum PublishError {
    /// None of the configured brokers accepted a connection.
    #[error("no brokers available for publishing")]
    NoBrokersAvailable,

    /// The broker rejected the produce request.
    #[error("broker rejected publish to '{topic}' with error code {error_code}")]
    Rejected { topic: String, error_code: i16 },

    /// The request could not be sent or the response could not be read.
    #[error("publish failed: {0}")]
    Proxy(#[from] ProxyError),
}

/// Errors that occur during proxy operation.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Failed to decode Kafka protocol message.
    #[error("protocol decode error: {message}")]
    ProtocolDecode { message: String },

    /// Failed to encode Kafka protocol message.
    #[error("protocol encode error: {message}")]
    ProtocolEncode { message: String },

    /// Broker is not available or connection failed.
    #[error("broker {address} unavailable: {message}")]
    BrokerUnavailable { address: String, message: String },

    /// Request correlation ID mismatch.
    #[error("correlation ID mismatch: expected {expected}, got {actual}")]
    CorrelationIdMismatch { expected: i32, actual: i32 },

    /// Configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Shutdown signal received.
    #[error("proxy shutting down")]
    Shutdown,
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for decoding operations.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
