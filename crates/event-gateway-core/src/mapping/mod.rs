//! Address mapping between contract brokers and proxy listeners.
//!
//! This module provides:
//! - Loopback identity detection for collision checks
//! - `host:port` parsing and remote → local pairs
//! - The builder turning server descriptors into broker mappings
//! - Dial-address rewriting used when connecting upstream

pub mod address;
pub mod dial;
pub mod servers;

pub use address::{is_local, AddressMapping, HostPort};
pub use dial::DialAddressMap;
pub use servers::{
    build_address_mapping, BrokerMappings, ServerDescriptor, DIAL_MAPPING_EXTENSION,
    KAFKA_PROTOCOL_PREFIX, LISTENER_EXTENSION,
};
