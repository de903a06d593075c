//! Metrics collection for the event gateway.

pub mod prometheus;

pub use prometheus::GatewayMetrics;
