//! Network layer of the gateway.
//!
//! This module provides:
//! - TCP listeners, one per broker mapping
//! - Kafka frame codecs
//! - The produce interceptor on the client→broker stream
//! - Broker address rewriting in Metadata and FindCoordinator responses
//! - The per-connection forwarder tying them together

pub mod codec;
pub mod connection;
pub mod interceptor;
pub mod listener;
pub mod rewrite;

pub use codec::{KafkaCodec, KafkaFrame, ResponseCodec, ResponseFrame};
pub use connection::ConnectionHandler;
pub use interceptor::{InterceptedRequest, ProduceInterceptor};
pub use listener::Proxy;
pub use rewrite::{AddressRewriter, InFlightRequests};
