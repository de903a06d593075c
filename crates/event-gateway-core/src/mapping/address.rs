//! Host/port parsing and remote → local address pairs.
//!
//! Addresses follow the usual `host:port` convention. IPv6 hosts are written
//! in brackets (`[::1]:9092`) and an empty host (`:9092`) means "all
//! interfaces" when used as a listen address.

use std::fmt;
use std::net::IpAddr;

use crate::error::{ConfigError, ConfigResult};

/// Returns true if `host` denotes this machine.
///
/// The empty host, `localhost`, the IPv6 loopback in short or long form and
/// any address in `127.0.0.0/8` are all treated as the same identity when
/// checking for address collisions.
#[must_use]
pub fn is_local(host: &str) -> bool {
    if host.is_empty() || host == "localhost" {
        return true;
    }

    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Split a `host:port` string into its host and port parts.
///
/// Mirrors the classic socket-address rules: a bracketed host may contain
/// colons, an unbracketed one may not, and the port is mandatory.
fn split_host_port(address: &str) -> Option<(&str, &str)> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        return Some((host, port));
    }

    let (host, port) = address.rsplit_once(':')?;
    if host.contains(':') || host.contains('[') || host.contains(']') {
        return None;
    }
    Some((host, port))
}

/// A parsed `host:port` pair. The host may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    /// Host name or IP literal, without brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl HostPort {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `host:port` string. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if the port is missing or not
    /// a valid TCP port, or if an IPv6 host is not bracketed.
    pub fn parse(address: &str) -> ConfigResult<Self> {
        let trimmed = address.trim();
        let (host, port) = split_host_port(trimmed)
            .ok_or_else(|| ConfigError::InvalidAddress(trimmed.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidAddress(trimmed.to_string()))?;

        Ok(Self::new(host, port))
    }

    /// Whether the host denotes this machine.
    #[must_use]
    pub fn is_local(&self) -> bool {
        is_local(&self.host)
    }

    /// Address suitable for binding a listener. An empty host binds all interfaces.
    #[must_use]
    pub fn bind_address(&self) -> String {
        if self.host.is_empty() {
            format!("0.0.0.0:{}", self.port)
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// One remote broker paired with the local address the proxy listens on for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMapping {
    /// Broker address as declared in the contract.
    pub remote: HostPort,
    /// Local listen address (host may be empty).
    pub local: HostPort,
}

impl AddressMapping {
    /// Parse a `"remotehost:remoteport,localhost:localport"` entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMappingFormat`] if the entry does not hold
    /// exactly two comma separated tokens, or [`ConfigError::InvalidAddress`]
    /// if either token is not a `host:port` pair.
    pub fn parse(entry: &str) -> ConfigResult<Self> {
        let parts: Vec<&str> = entry.split(',').collect();
        let [remote, local] = parts.as_slice() else {
            return Err(ConfigError::InvalidMappingFormat);
        };

        Ok(Self {
            remote: HostPort::parse(remote)?,
            local: HostPort::parse(local)?,
        })
    }

    /// Whether the proxy would end up listening where the broker already does.
    ///
    /// Either both addresses are identical, or both hosts denote this machine
    /// and the ports match.
    #[must_use]
    pub fn collides(&self) -> bool {
        if self.remote.port != self.local.port {
            return false;
        }

        self.remote.host == self.local.host || (self.remote.is_local() && self.local.is_local())
    }
}

impl fmt::Display for AddressMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.remote, self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_local_identities() {
        for host in [
            "",
            "localhost",
            "::1",
            "0:0:0:0:0:0:0:1",
            "127.0.0.1",
            "127.0.0.42",
            "127.1.2.3",
        ] {
            assert!(is_local(host), "{host:?} should be local");
        }
    }

    #[test]
    fn test_is_local_rejects_remote_hosts() {
        for host in ["broker", "10.0.0.1", "128.0.0.1", "::2", "localhost.example.com"] {
            assert!(!is_local(host), "{host:?} should not be local");
        }
    }

    #[test]
    fn test_parse_host_port() {
        let addr = HostPort::parse("broker:9092").unwrap();
        assert_eq!(addr.host, "broker");
        assert_eq!(addr.port, 9092);
        assert_eq!(addr.to_string(), "broker:9092");
    }

    #[test]
    fn test_parse_empty_host() {
        let addr = HostPort::parse(":28002").unwrap();
        assert_eq!(addr.host, "");
        assert_eq!(addr.port, 28002);
        assert_eq!(addr.bind_address(), "0.0.0.0:28002");
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let addr = HostPort::parse("[::1]:9092").unwrap();
        assert_eq!(addr.host, "::1");
        assert!(addr.is_local());
        assert_eq!(addr.to_string(), "[::1]:9092");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let addr = HostPort::parse(" localhost:28002").unwrap();
        assert_eq!(addr.host, "localhost");
    }

    #[test]
    fn test_parse_invalid_addresses() {
        for bad in ["broker", "broker:", "broker:port", "::1:9092", "broker:70000"] {
            assert!(
                matches!(HostPort::parse(bad), Err(ConfigError::InvalidAddress(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_mapping_requires_two_tokens() {
        assert!(matches!(
            AddressMapping::parse("localhost:9092"),
            Err(ConfigError::InvalidMappingFormat)
        ));
        assert!(matches!(
            AddressMapping::parse("a:1,b:2,c:3"),
            Err(ConfigError::InvalidMappingFormat)
        ));
    }

    #[test]
    fn test_mapping_collision_rules() {
        let same = AddressMapping::parse("broker:9092,broker:9092").unwrap();
        assert!(same.collides());

        let loopback = AddressMapping::parse("localhost:9092,127.0.0.1:9092").unwrap();
        assert!(loopback.collides());

        let bind_all = AddressMapping::parse("localhost:9092,:9092").unwrap();
        assert!(bind_all.collides());

        let other_port = AddressMapping::parse("localhost:9092,localhost:28002").unwrap();
        assert!(!other_port.collides());

        let remote_broker = AddressMapping::parse("broker:9092,:9092").unwrap();
        assert!(!remote_broker.collides());
    }
}
