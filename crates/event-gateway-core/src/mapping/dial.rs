//! Dial-address rewriting.
//!
//! Brokers sometimes advertise addresses the proxy cannot reach directly
//! (NAT, container networks). A dial mapping entry
//! `"advertised:port,reachable:port"` makes the proxy dial the reachable
//! address whenever it would otherwise dial the advertised one.

use std::collections::HashMap;

use tracing::warn;

use super::address::HostPort;

/// Lookup table from advertised broker address to the address actually dialled.
#[derive(Debug, Clone, Default)]
pub struct DialAddressMap {
    rewrites: HashMap<HostPort, HostPort>,
}

impl DialAddressMap {
    /// Build the table from raw `"from,to"` entries.
    ///
    /// Entries are opaque to the configuration layer, so malformed ones are
    /// only reported here and skipped.
    #[must_use]
    pub fn from_entries(entries: &[String]) -> Self {
        let mut rewrites = HashMap::new();

        for entry in entries {
            let parsed = entry
                .split_once(',')
                .and_then(|(from, to)| Some((HostPort::parse(from).ok()?, HostPort::parse(to).ok()?)));

            match parsed {
                Some((from, to)) => {
                    rewrites.insert(from, to);
                }
                None => warn!(entry = %entry, "ignoring malformed dial address mapping"),
            }
        }

        Self { rewrites }
    }

    /// The address to dial for `remote`.
    #[must_use]
    pub fn resolve(&self, remote: &HostPort) -> HostPort {
        self.rewrites.get(remote).cloned().unwrap_or_else(|| remote.clone())
    }

    /// Number of rewrite rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rewrites.len()
    }

    /// Whether there are no rewrite rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rewrites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rewrites_known_address() {
        let map = DialAddressMap::from_entries(&["broker:9092,10.0.0.5:9093".to_string()]);

        let dial = map.resolve(&HostPort::new("broker", 9092));
        assert_eq!(dial, HostPort::new("10.0.0.5", 9093));
    }

    #[test]
    fn test_resolve_passes_unknown_address_through() {
        let map = DialAddressMap::from_entries(&["broker:9092,10.0.0.5:9093".to_string()]);

        let dial = map.resolve(&HostPort::new("other", 9092));
        assert_eq!(dial, HostPort::new("other", 9092));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let map = DialAddressMap::from_entries(&[
            "no-comma".to_string(),
            "broker:9092,missing-port".to_string(),
            String::new(),
        ]);
        assert!(map.is_empty());
    }
}
