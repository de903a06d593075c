//! Integration tests for configuration loading and mapping validation.

use std::io::Write;

use event_gateway_core::config::{validate_mappings, GatewayConfig, ProxyConfigBuilder};
use event_gateway_core::error::ConfigError;
use event_gateway_core::mapping::{build_address_mapping, is_local, ServerDescriptor, LISTENER_EXTENSION};
use event_gateway_core::testing::LogCapture;
use proptest::prelude::*;
use tracing::Level;

#[test]
fn test_distinct_ports_without_handlers_builds() {
    let logs = LogCapture::new();
    let config = {
        let _guard = logs.install();
        ProxyConfigBuilder::new(vec!["localhost:9092,localhost:28002".to_string()])
            .build()
            .unwrap()
    };

    assert!(config.handlers().is_empty());
    assert_eq!(config.mappings()[0].local.port, 28002);
    assert_eq!(
        logs.matching(Level::WARN, "There is no message handler configured").len(),
        1
    );
}

#[test]
fn test_same_host_and_port_collides() {
    let err = ProxyConfigBuilder::new(vec!["broker:9092,broker:9092".to_string()])
        .build()
        .unwrap_err();

    assert!(matches!(&err, ConfigError::AddressCollision { remote } if remote == "broker:9092"));
    assert!(err.to_string().contains("broker:9092"));
}

#[test]
fn test_listener_override_maps_to_bind_all() {
    let server = ServerDescriptor::new("production", "localhost:9092", "kafka-secure")
        .with_extension(LISTENER_EXTENSION, "28002");

    let mappings = build_address_mapping(&[server]).unwrap();
    assert_eq!(mappings.brokers_mapping, vec!["localhost:9092,:28002"]);

    let config = ProxyConfigBuilder::new(mappings.brokers_mapping).build().unwrap();
    assert_eq!(config.mappings()[0].local.host, "");
    assert_eq!(config.mappings()[0].remote.to_string(), "localhost:9092");
}

#[test]
fn test_empty_mapping_is_rejected() {
    let err = ProxyConfigBuilder::new(vec![]).build().unwrap_err();
    assert_eq!(err.to_string(), "BrokersMapping is mandatory");
}

#[test]
fn test_malformed_entries_are_rejected() {
    for entry in ["broker:9092", "broker:9092,:28002,:28003", "broker,:28002", "broker:9092,local"] {
        assert!(
            validate_mappings(&[entry.to_string()]).is_err(),
            "{entry} should not validate"
        );
    }
}

#[test]
fn test_loopback_aliases_collide_on_same_port() {
    for entry in [
        "localhost:9092,127.0.0.1:9092",
        "127.0.0.1:9092,:9092",
        "[::1]:9092,localhost:9092",
        "127.0.0.5:9092,[0:0:0:0:0:0:0:1]:9092",
    ] {
        let err = validate_mappings(&[entry.to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::AddressCollision { .. }), "{entry}");
    }

    assert!(validate_mappings(&["broker:9092,:9092".to_string()]).is_ok());
}

#[test]
fn test_config_file_to_proxy_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
address: gateway.example.com
servers:
  production:
    url: broker-1:9092
    protocol: kafka
    x-eventgateway-listener: 28002
    x-eventgateway-dial-mapping: "broker-1:9092,10.0.0.5:9092|broker-2:9092,10.0.0.6:9092"
  websocket:
    url: ws.example.com:80
    protocol: ws
message_validation:
  enabled: true
  publish_to_kafka_topic: invalid-messages
extra_flags: "max-connections=10|dial-timeout-ms=250"
"#
    )
    .unwrap();

    let config = GatewayConfig::from_file(file.path()).unwrap();
    let proxy = config.proxy_config().unwrap();

    assert_eq!(proxy.brokers_mapping(), ["broker-1:9092,:28002"]);
    assert_eq!(proxy.dial_address_mapping().len(), 2);
    assert_eq!(proxy.advertised_address(), Some("gateway.example.com"));
    assert_eq!(proxy.handlers().len(), 1);
    assert_eq!(proxy.dead_letter().map(|d| d.topic()), Some("invalid-messages"));
    assert_eq!(proxy.tuning().max_connections, 10);
    assert_eq!(proxy.tuning().dial_timeout.as_millis(), 250);
}

#[test]
fn test_validation_without_topic_warns() {
    let config = GatewayConfig::from_str(
        r#"
servers:
  production:
    url: broker:9092
    protocol: kafka
"#,
    )
    .unwrap();

    let logs = LogCapture::new();
    let proxy = {
        let _guard = logs.install();
        config.proxy_config().unwrap()
    };

    assert!(proxy.dead_letter().is_none());
    assert_eq!(logs.containing(Level::WARN, "Invalid messages will be discarded").len(), 1);
}

#[test]
fn test_contract_without_kafka_servers() {
    let config = GatewayConfig::from_str(
        r#"
servers:
  websocket:
    url: ws.example.com:80
    protocol: ws
"#,
    )
    .unwrap();

    assert!(matches!(config.proxy_config(), Err(ConfigError::NoBrokersFound)));
}

#[test]
fn test_bad_extra_flag_fails_loading() {
    let err = GatewayConfig::from_str("extra_flags: \"max-connections\"").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidExtraConfig(_)));
}

fn host() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("localhost".to_string()),
        Just("127.0.0.1".to_string()),
        Just("127.0.0.9".to_string()),
        Just("[::1]".to_string()),
        Just("broker-a".to_string()),
        Just("broker-b".to_string()),
    ]
}

fn bare(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

proptest! {
    #[test]
    fn test_validation_accepts_iff_no_entry_collides(
        pairs in prop::collection::vec((host(), 9090u16..9094, host(), 9090u16..9094), 1..6)
    ) {
        let entries: Vec<String> = pairs
            .iter()
            .map(|(rh, rp, lh, lp)| {
                let remote = if rh.is_empty() { "localhost".to_string() } else { rh.clone() };
                format!("{remote}:{rp},{lh}:{lp}")
            })
            .collect();

        let expected_collision = pairs.iter().any(|(rh, rp, lh, lp)| {
            let rh = if rh.is_empty() { "localhost" } else { rh.as_str() };
            rp == lp && (bare(rh) == bare(lh) || (is_local(bare(rh)) && is_local(bare(lh))))
        });

        let result = validate_mappings(&entries);
        prop_assert_eq!(result.is_ok(), !expected_collision);
        if let Err(err) = result {
            let is_collision = matches!(err, ConfigError::AddressCollision { .. });
            prop_assert!(is_collision);
        }
    }
}
