//! Configuration types for the event gateway.
//!
//! Two layers live here:
//!
//! - [`GatewayConfig`], the YAML application config. It carries the contract's
//!   server list plus validation, logging and metrics settings.
//! - [`ProxyConfig`], the resolved and validated runtime configuration,
//!   produced once by [`ProxyConfigBuilder::build`] and never mutated.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::KafkaDeadLetterPublisher;
use crate::error::{ConfigError, ConfigResult};
use crate::mapping::{build_address_mapping, AddressMapping, DialAddressMap, ServerDescriptor};
use crate::pipeline::{
    DeadLetterPublisher, DeadLetterSink, HandlerChain, JsonPayloadValidator, MessageHandler,
    RouterSettings, ValidationHandler,
};

/// Root application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Address clients use to reach this proxy, usually a domain name.
    #[serde(default)]
    pub address: Option<String>,

    /// Only proxy this server of the contract instead of all of them.
    #[serde(default)]
    pub broker_from_server: Option<String>,

    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,

    /// Contract servers keyed by name, in document order.
    #[serde(default)]
    pub servers: serde_yaml::Mapping,

    /// Payload validation settings.
    #[serde(default)]
    pub message_validation: MessageValidationConfig,

    /// Pipe separated `key=value` runtime flags.
    #[serde(default)]
    pub extra_flags: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Payload validation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageValidationConfig {
    /// Whether produced messages are validated.
    #[serde(default = "default_validation_enabled")]
    pub enabled: bool,

    /// Topic receiving invalid messages. Without it they are discarded.
    #[serde(default)]
    pub publish_to_kafka_topic: Option<String>,

    /// Treat invalid messages as handler failures instead of rejecting them.
    #[serde(default)]
    pub fail_when_invalid: bool,

    /// Top-level fields every JSON payload must carry.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to enable the metrics endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Address for the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

fn default_validation_enabled() -> bool {
    true
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MessageValidationConfig {
    fn default() -> Self {
        Self {
            enabled: default_validation_enabled(),
            publish_to_kafka_topic: None,
            fail_when_invalid: false,
            required_fields: Vec::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the parts that can be checked without building a proxy.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed servers, an unknown or non-Kafka
    /// `broker_from_server`, or malformed extra flags.
    pub fn validate(&self) -> ConfigResult<()> {
        self.selected_servers()?;
        ProxyTuning::from_extra(&self.extra())?;
        Ok(())
    }

    /// Every server of the contract, in document order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if a server entry is malformed.
    pub fn server_descriptors(&self) -> ConfigResult<Vec<ServerDescriptor>> {
        self.servers
            .iter()
            .map(|(name, value)| {
                let mut server: ServerDescriptor = serde_yaml::from_value(value.clone())?;
                if let Some(name) = name.as_str() {
                    server.name = name.to_string();
                }
                Ok(server)
            })
            .collect()
    }

    /// The servers the proxy fronts, honouring `broker_from_server`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ServerNotFound`] or [`ConfigError::NonKafkaServer`]
    /// when `broker_from_server` names an unusable server.
    pub fn selected_servers(&self) -> ConfigResult<Vec<ServerDescriptor>> {
        let servers = self.server_descriptors()?;
        let Some(wanted) = &self.broker_from_server else {
            return Ok(servers);
        };

        let server = servers
            .into_iter()
            .find(|s| &s.name == wanted)
            .ok_or_else(|| ConfigError::ServerNotFound(wanted.clone()))?;

        if !server.is_kafka() {
            return Err(ConfigError::NonKafkaServer {
                name: server.name,
                protocol: server.protocol,
            });
        }

        Ok(vec![server])
    }

    /// The extra flags as individual `key=value` entries.
    #[must_use]
    pub fn extra(&self) -> Vec<String> {
        self.extra_flags
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Build the runtime proxy configuration.
    ///
    /// With validation enabled the handler chain holds a
    /// [`ValidationHandler`] over a [`JsonPayloadValidator`], and invalid
    /// messages go to `publish_to_kafka_topic` through the contract brokers.
    ///
    /// # Errors
    ///
    /// Returns any configuration error from server selection, address mapping
    /// or proxy validation.
    pub fn proxy_config(&self) -> ConfigResult<ProxyConfig> {
        let servers = self.selected_servers()?;
        let mappings = build_address_mapping(&servers)?;

        let mut builder = ProxyConfigBuilder::new(mappings.brokers_mapping)
            .dial_address_mapping(mappings.dial_address_mapping)
            .extra(self.extra())
            .debug(self.debug);

        if let Some(address) = &self.address {
            builder = builder.advertised_address(address.clone());
        }

        let validation = &self.message_validation;
        if validation.enabled {
            let validator = JsonPayloadValidator::new(validation.required_fields.clone());
            builder = builder.handler(Arc::new(ValidationHandler::new(
                Arc::new(validator),
                validation.fail_when_invalid,
            )));

            match &validation.publish_to_kafka_topic {
                Some(topic) if !topic.is_empty() => {
                    let tuning = ProxyTuning::from_extra(&self.extra())?;
                    let brokers = servers
                        .iter()
                        .filter(|s| s.is_kafka())
                        .map(|s| s.url.clone())
                        .collect();
                    let publisher = KafkaDeadLetterPublisher::new(brokers, tuning.dial_timeout)
                        .with_dial_map(DialAddressMap::from_entries(&builder.dial_address_mapping));
                    builder = builder.dead_letter(Arc::new(publisher), topic.clone());
                }
                _ => warn!("No topic set for invalid messages. Invalid messages will be discarded"),
            }
        }

        builder.build()
    }
}

/// Runtime knobs carried in the extra flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyTuning {
    /// Maximum concurrent client connections across all listeners.
    pub max_connections: usize,
    /// Timeout for dialling an upstream broker.
    pub dial_timeout: Duration,
    /// Largest request or response frame accepted.
    pub max_frame_size: usize,
    /// Message router sizing for each client connection.
    pub router: RouterSettings,
}

impl Default for ProxyTuning {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            dial_timeout: Duration::from_secs(10),
            max_frame_size: 100 * 1024 * 1024,
            router: RouterSettings::default(),
        }
    }
}

impl ProxyTuning {
    /// Parse `key=value` entries. Unknown keys are logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidExtraConfig`] for an entry without `=`
    /// and [`ConfigError::InvalidExtraValue`] for an unusable value.
    pub fn from_extra(extra: &[String]) -> ConfigResult<Self> {
        let mut tuning = Self::default();

        for entry in extra {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidExtraConfig(entry.clone()))?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "max-connections" => tuning.max_connections = parse_value(key, value)?,
                "dial-timeout-ms" => {
                    tuning.dial_timeout = Duration::from_millis(parse_value(key, value)?);
                }
                "max-frame-size" => tuning.max_frame_size = parse_value(key, value)?,
                "handler-workers" => tuning.router.workers = parse_value(key, value)?,
                "handler-queue-size" => tuning.router.queue_capacity = parse_value(key, value)?,
                _ => warn!(key = %key, "ignoring unknown extra flag"),
            }
        }

        Ok(tuning)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value.parse().map_err(|_| ConfigError::InvalidExtraValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Validate a broker mapping list.
///
/// # Errors
///
/// Fails on an empty list, an entry that is not two `host:port` tokens, or
/// an entry whose local address collides with its remote one.
pub fn validate_mappings(brokers_mapping: &[String]) -> ConfigResult<Vec<AddressMapping>> {
    if brokers_mapping.is_empty() {
        return Err(ConfigError::MissingBrokersMapping);
    }

    brokers_mapping
        .iter()
        .map(|entry| {
            let mapping = AddressMapping::parse(entry)?;
            if mapping.collides() {
                return Err(ConfigError::AddressCollision {
                    remote: mapping.remote.to_string(),
                });
            }
            Ok(mapping)
        })
        .collect()
}

/// Resolved, validated proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    brokers_mapping: Vec<String>,
    dial_address_mapping: Vec<String>,
    extra_config: Vec<String>,
    debug: bool,
    advertised_address: Option<String>,
    handlers: HandlerChain,
    dead_letter: Option<DeadLetterSink>,
    mappings: Vec<AddressMapping>,
    tuning: ProxyTuning,
}

impl ProxyConfig {
    /// Re-run the structural checks on this configuration.
    ///
    /// # Errors
    ///
    /// See [`validate_mappings`].
    pub fn validate(&self) -> ConfigResult<()> {
        validate_mappings(&self.brokers_mapping).map(|_| ())
    }

    #[must_use]
    pub fn brokers_mapping(&self) -> &[String] {
        &self.brokers_mapping
    }

    #[must_use]
    pub fn dial_address_mapping(&self) -> &[String] {
        &self.dial_address_mapping
    }

    #[must_use]
    pub fn extra_config(&self) -> &[String] {
        &self.extra_config
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    #[must_use]
    pub fn advertised_address(&self) -> Option<&str> {
        self.advertised_address.as_deref()
    }

    #[must_use]
    pub fn handlers(&self) -> &HandlerChain {
        &self.handlers
    }

    #[must_use]
    pub fn dead_letter(&self) -> Option<&DeadLetterSink> {
        self.dead_letter.as_ref()
    }

    /// Parsed form of the broker mapping list.
    #[must_use]
    pub fn mappings(&self) -> &[AddressMapping] {
        &self.mappings
    }

    #[must_use]
    pub fn tuning(&self) -> ProxyTuning {
        self.tuning
    }
}

/// Builder for [`ProxyConfig`].
#[derive(Default)]
pub struct ProxyConfigBuilder {
    brokers_mapping: Vec<String>,
    dial_address_mapping: Vec<String>,
    extra: Vec<String>,
    debug: bool,
    advertised_address: Option<String>,
    handlers: Vec<Arc<dyn MessageHandler>>,
    dead_letter: Option<DeadLetterSink>,
}

impl ProxyConfigBuilder {
    /// Start from a `"remote,local"` mapping list.
    #[must_use]
    pub fn new(brokers_mapping: Vec<String>) -> Self {
        Self {
            brokers_mapping,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn dial_address_mapping(mut self, mapping: Vec<String>) -> Self {
        self.dial_address_mapping = mapping;
        self
    }

    /// Raw `key=value` runtime flags.
    #[must_use]
    pub fn extra(mut self, extra: Vec<String>) -> Self {
        self.extra = extra;
        self
    }

    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Host advertised to clients in metadata responses.
    #[must_use]
    pub fn advertised_address(mut self, address: impl Into<String>) -> Self {
        self.advertised_address = Some(address.into());
        self
    }

    /// Append a handler to the chain.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Send rejected payloads to `topic` through `publisher`.
    #[must_use]
    pub fn dead_letter(mut self, publisher: Arc<dyn DeadLetterPublisher>, topic: impl Into<String>) -> Self {
        self.dead_letter = Some(DeadLetterSink::new(publisher, topic));
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first mapping or extra flag error.
    pub fn build(self) -> ConfigResult<ProxyConfig> {
        let mappings = validate_mappings(&self.brokers_mapping)?;
        let tuning = ProxyTuning::from_extra(&self.extra)?;

        if self.handlers.is_empty() {
            warn!("There is no message handler configured");
        }
        debug!(mappings = mappings.len(), handlers = self.handlers.len(), "proxy configuration validated");

        Ok(ProxyConfig {
            brokers_mapping: self.brokers_mapping,
            dial_address_mapping: self.dial_address_mapping,
            extra_config: self.extra,
            debug: self.debug,
            advertised_address: self.advertised_address,
            handlers: HandlerChain::new(self.handlers),
            dead_letter: self.dead_letter,
            mappings,
            tuning,
        })
    }
}
