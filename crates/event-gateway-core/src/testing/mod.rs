//! Test utilities for the event gateway.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`MockBroker`] - A lightweight mock Kafka broker for testing
//! - [`GatewayTestHarness`] - A running gateway in front of a mock broker
//! - [`LogCapture`] - In-memory `tracing` layer for log assertions
//! - [`RecordingPublisher`] - Dead-letter publisher keeping payloads in memory
//!
//! # Example
//!
//! ```rust,ignore
//! use event_gateway_core::testing::{api_keys, GatewayTestHarness};
//!
//! #[tokio::test]
//! async fn test_produce_request() {
//!     let harness = GatewayTestHarness::new().await;
//!     let client = harness.connect().await.unwrap();
//!
//!     // send a request through the proxy, then
//!     let calls = harness.get_broker_calls_for_api(api_keys::PRODUCE).await;
//!     assert_eq!(calls.len(), 1);
//! }
//! ```

pub mod harness;
pub mod logs;
pub mod mock_broker;

pub use harness::{GatewayHarnessBuilder, GatewayTestHarness, RecordingPublisher};
pub use logs::{CapturedEvent, LogCapture};
pub use mock_broker::{api_keys, responses, BrokerCall, MockBroker, ResponseGenerator};
