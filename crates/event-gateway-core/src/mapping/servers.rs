//! Server descriptors and the remote → local address mapping builder.
//!
//! The contract declares broker endpoints as servers. Each Kafka server turns
//! into one `"remote,local"` mapping entry the proxy listens on, plus any
//! dial-address rewrites carried in its extensions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};

use super::address::HostPort;

/// Protocol family prefix a server must carry to be proxied.
pub const KAFKA_PROTOCOL_PREFIX: &str = "kafka";

/// Extension overriding the local listen address for a server.
pub const LISTENER_EXTENSION: &str = "x-eventgateway-listener";

/// Extension carrying pipe separated dial-address rewrite rules.
pub const DIAL_MAPPING_EXTENSION: &str = "x-eventgateway-dial-mapping";

/// One contract-declared broker endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerDescriptor {
    /// Server name as declared in the contract.
    #[serde(default)]
    pub name: String,

    /// Broker address, `host:port`.
    pub url: String,

    /// Protocol string, e.g. `kafka` or `kafka-secure`.
    pub protocol: String,

    /// Human readable description, unused by the proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Every other attribute of the server, keyed by name.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl ServerDescriptor {
    /// Create a descriptor without extensions.
    pub fn new(name: impl Into<String>, url: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            protocol: protocol.into(),
            description: None,
            extensions: BTreeMap::new(),
        }
    }

    /// Attach an extension value.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Whether the protocol belongs to the Kafka family.
    #[must_use]
    pub fn is_kafka(&self) -> bool {
        self.protocol.starts_with(KAFKA_PROTOCOL_PREFIX)
    }

    /// The extension value rendered as a string, if present and scalar.
    #[must_use]
    pub fn extension(&self, key: &str) -> Option<String> {
        let value = self.extensions.get(key)?;
        let rendered = render_scalar(value);
        if rendered.is_none() {
            warn!(server = %self.name, extension = key, "ignoring non-scalar extension value");
        }
        rendered
    }

    /// Local listen address for this server.
    ///
    /// The listener extension wins when present. A bare port is turned into
    /// `:port` so the proxy binds on all interfaces. Without the extension the
    /// proxy listens on the broker's port on all interfaces.
    fn listen_address(&self) -> ConfigResult<String> {
        if let Some(value) = self.extension(LISTENER_EXTENSION).filter(|v| !v.is_empty()) {
            if HostPort::parse(&value).is_ok() {
                return Ok(value);
            }
            return Ok(format!(":{value}"));
        }

        let remote = HostPort::parse(&self.url).map_err(|_| ConfigError::InvalidServerUrl {
            name: self.name.clone(),
            url: self.url.clone(),
        })?;
        Ok(format!(":{}", remote.port))
    }
}

/// Render a scalar YAML value the way it reads in the document.
fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => render_scalar(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

/// Broker and dial-address mappings derived from a server list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerMappings {
    /// `"remote,local"` entries, one per Kafka server.
    pub brokers_mapping: Vec<String>,
    /// Dial-address rewrite rules, passed through unmodified.
    pub dial_address_mapping: Vec<String>,
}

/// Build the address mappings for every Kafka server in `servers`.
///
/// Servers with another protocol family are skipped.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidServerUrl`] if a server without a listener
/// override has no usable port, or [`ConfigError::NoBrokersFound`] if no
/// server matched the Kafka protocol family.
pub fn build_address_mapping(servers: &[ServerDescriptor]) -> ConfigResult<BrokerMappings> {
    let mut mappings = BrokerMappings::default();

    for server in servers {
        if !server.is_kafka() {
            debug!(server = %server.name, protocol = %server.protocol, "skipping non-kafka server");
            continue;
        }

        let local = server.listen_address()?;
        debug!(server = %server.name, remote = %server.url, local = %local, "mapped broker");
        mappings
            .brokers_mapping
            .push(format!("{},{}", server.url, local));

        if let Some(dial_mapping) = server.extension(DIAL_MAPPING_EXTENSION) {
            mappings
                .dial_address_mapping
                .extend(dial_mapping.split('|').map(str::to_string));
        }
    }

    if mappings.brokers_mapping.is_empty() {
        return Err(ConfigError::NoBrokersFound);
    }

    Ok(mappings)
}
