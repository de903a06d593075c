//! Event Gateway Core Library
//!
//! A Kafka edge proxy configured from an API contract. Clients connect to
//! the gateway instead of the brokers; every byte is relayed unchanged,
//! while produce requests are decoded on the side and their messages run
//! through a chain of handlers (payload validation out of the box).
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading, proxy configuration builder and validation
//! - [`error`] - Domain-specific error types
//! - [`mapping`] - Contract servers to listener mappings, loopback detection, dial rewrites
//! - [`protocol`] - Produce request, record batch and message set decoding
//! - [`pipeline`] - Message handlers, the router with redelivery, dead-lettering
//! - [`network`] - Listeners, produce interception and response rewriting
//! - [`broker`] - Minimal broker client used for dead-letter publishing
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use event_gateway_core::config::GatewayConfig;
//! use event_gateway_core::network::Proxy;
//!
//! let config = GatewayConfig::from_file("gateway.yaml")?;
//! let proxy = Proxy::bind(config.proxy_config()?, metrics).await?;
//! proxy.run().await?;
//! ```

#![forbid(unsafe_code)]

pub mod broker;
pub mod config;
pub mod error;
pub mod mapping;
pub mod metrics;
pub mod network;
pub mod pipeline;
pub mod protocol;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::{GatewayConfig, ProxyConfig, ProxyConfigBuilder};
pub use error::{ConfigError, DecodeError, HandlerError, ProxyError, PublishError, Result};
pub use network::Proxy;
pub use pipeline::{Message, MessageHandler};
