//! Minimal broker client.
//!
//! The gateway only talks to brokers on its own behalf to publish rejected
//! payloads. Everything else is relayed from the clients' connections.

pub mod connection;
pub mod publisher;

pub use connection::BrokerConnection;
pub use publisher::KafkaDeadLetterPublisher;
