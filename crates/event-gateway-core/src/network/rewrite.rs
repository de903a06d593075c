//! Broker address rewriting in responses.
//!
//! Metadata and FindCoordinator responses tell clients where to connect
//! next. Every advertised broker that has a listener is replaced with the
//! proxy's address for it, so clients never bypass the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use dashmap::DashMap;
use kafka_protocol::messages::{FindCoordinatorResponse, MetadataResponse, ResponseHeader};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, StrBytes};
use tracing::{debug, warn};

use crate::mapping::{AddressMapping, HostPort};
use crate::metrics::GatewayMetrics;
use crate::protocol::{FIND_COORDINATOR, METADATA};

use super::codec::ResponseFrame;

/// Host advertised when neither an advertised address nor a usable
/// listener host is configured.
const FALLBACK_HOST: &str = "localhost";

/// Requests on one connection whose responses need rewriting.
///
/// The request side records the API key and version by correlation id;
/// the response side takes them back out.
#[derive(Debug, Default, Clone)]
pub struct InFlightRequests {
    pending: Arc<DashMap<i32, (i16, i16)>>,
}

impl InFlightRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the request if its response carries broker addresses.
    pub fn track(&self, correlation_id: i32, api_key: i16, api_version: i16) {
        if is_rewritable(api_key) {
            self.pending.insert(correlation_id, (api_key, api_version));
        }
    }

    /// API key and version of a tracked request.
    #[must_use]
    pub fn take(&self, correlation_id: i32) -> Option<(i16, i16)> {
        self.pending.remove(&correlation_id).map(|(_, request)| request)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Whether responses to `api_key` advertise broker addresses.
#[must_use]
pub fn is_rewritable(api_key: i16) -> bool {
    api_key == METADATA || api_key == FIND_COORDINATOR
}

/// Rewrites broker addresses to the proxy listeners.
#[derive(Debug, Default)]
pub struct AddressRewriter {
    targets: HashMap<HostPort, HostPort>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl AddressRewriter {
    /// Build the rewrite table.
    ///
    /// Each remote broker is advertised as `advertised_host` (or the
    /// listener's own host) with the listener's port.
    #[must_use]
    pub fn new(mappings: &[AddressMapping], advertised_host: Option<&str>) -> Self {
        let targets = mappings
            .iter()
            .map(|mapping| {
                let host = match advertised_host {
                    Some(host) if !host.is_empty() => host.to_string(),
                    _ => listener_host(&mapping.local),
                };
                (mapping.remote.clone(), HostPort::new(host, mapping.local.port))
            })
            .collect();

        Self {
            targets,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The address advertised in place of `remote`, if it has a listener.
    #[must_use]
    pub fn advertised(&self, remote: &HostPort) -> Option<&HostPort> {
        self.targets.get(remote)
    }

    /// Rewrite a response to a tracked request.
    ///
    /// Responses that cannot be decoded are returned unchanged.
    #[must_use]
    pub fn rewrite(&self, api_key: i16, api_version: i16, frame: ResponseFrame) -> ResponseFrame {
        let result = match api_key {
            METADATA => self.rewrite_metadata(api_version, &frame),
            FIND_COORDINATOR => self.rewrite_find_coordinator(api_version, &frame),
            _ => return frame,
        };

        match result {
            Ok(rewritten) => rewritten,
            Err(message) => {
                warn!(
                    api_key,
                    api_version,
                    correlation_id = frame.correlation_id,
                    error = %message,
                    "failed to rewrite response, forwarding unchanged"
                );
                frame
            }
        }
    }

    fn rewrite_metadata(&self, version: i16, frame: &ResponseFrame) -> Result<ResponseFrame, String> {
        let header_version = MetadataResponse::header_version(version);
        let (header, mut response) =
            decode_response::<MetadataResponse>(frame, version, header_version)?;

        for broker in &mut response.brokers {
            if let Some((host, port)) = self.replace(&broker.host, broker.port) {
                debug!(broker_id = broker.node_id.0, host = %host, port, "rewrote broker address");
                broker.host = host;
                broker.port = port;
            }
        }

        encode_response(&header, &response, version, header_version)
    }

    fn rewrite_find_coordinator(&self, version: i16, frame: &ResponseFrame) -> Result<ResponseFrame, String> {
        let header_version = FindCoordinatorResponse::header_version(version);
        let (header, mut response) =
            decode_response::<FindCoordinatorResponse>(frame, version, header_version)?;

        if let Some((host, port)) = self.replace(&response.host, response.port) {
            response.host = host;
            response.port = port;
        }
        for coordinator in &mut response.coordinators {
            if let Some((host, port)) = self.replace(&coordinator.host, coordinator.port) {
                coordinator.host = host;
                coordinator.port = port;
            }
        }

        encode_response(&header, &response, version, header_version)
    }

    /// The replacement for an advertised broker, `None` to leave it alone.
    fn replace(&self, host: &StrBytes, port: i32) -> Option<(StrBytes, i32)> {
        // FindCoordinator v4+ leaves the top-level address empty.
        if host.is_empty() {
            return None;
        }

        let remote = HostPort::new(host.to_string(), u16::try_from(port).ok()?);
        match self.targets.get(&remote) {
            Some(target) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_address_rewritten();
                }
                Some((StrBytes::from_string(target.host.clone()), i32::from(target.port)))
            }
            None => {
                warn!(broker = %remote, "broker has no listener, clients will connect to it directly");
                None
            }
        }
    }
}

/// A host clients can dial for a listener.
fn listener_host(local: &HostPort) -> String {
    match local.host.as_str() {
        "" | "0.0.0.0" | "::" => FALLBACK_HOST.to_string(),
        host => host.to_string(),
    }
}

fn decode_response<T: Decodable>(
    frame: &ResponseFrame,
    version: i16,
    header_version: i16,
) -> Result<(ResponseHeader, T), String> {
    let mut buf = BytesMut::with_capacity(4 + frame.body.len());
    buf.put_i32(frame.correlation_id);
    buf.extend_from_slice(&frame.body);
    let mut bytes = buf.freeze();

    let header = ResponseHeader::decode(&mut bytes, header_version).map_err(|e| e.to_string())?;
    let response = T::decode(&mut bytes, version).map_err(|e| e.to_string())?;
    Ok((header, response))
}

fn encode_response<T: Encodable>(
    header: &ResponseHeader,
    response: &T,
    version: i16,
    header_version: i16,
) -> Result<ResponseFrame, String> {
    let mut buf = BytesMut::new();
    header
        .encode(&mut buf, header_version)
        .map_err(|e| e.to_string())?;
    response.encode(&mut buf, version).map_err(|e| e.to_string())?;

    let body = buf.split_off(4);
    Ok(ResponseFrame {
        correlation_id: header.correlation_id,
        body,
    })
}
