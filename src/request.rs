//! The view of an inbound request that the gate decides on.

use crate::config::IpExtractionConfig;
use std::collections::HashMap;
use std::net::IpAddr;

/// An inbound request as seen by the gate.
///
/// Header names are stored lowercased. The gate never reads a request body,
/// so none is carried here.
#[derive(Debug, Clone)]
pub struct GateRequest {
    client_ip: String,
    method: String,
    path: String,
    query: Option<String>,
    host: Option<String>,
    headers: HashMap<String, String>,
    internal: bool,
}

impl GateRequest {
    /// Create a `GET` request for `path` from `client_ip`.
    pub fn new(client_ip: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            client_ip: client_ip.into(),
            method: "GET".to_string(),
            path: path.into(),
            query: None,
            host: None,
            headers: HashMap::new(),
            internal: false,
        }
    }

    /// Build a request from the connection peer and its headers, resolving the
    /// client IP according to `extraction`.
    pub fn from_peer(
        peer: IpAddr,
        method: &str,
        uri: &str,
        headers: &HashMap<String, Vec<String>>,
        extraction: &IpExtractionConfig,
    ) -> Self {
        let headers = flatten_headers(headers);
        let client_ip = client_ip(peer, &headers, extraction);

        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };

        let host = headers.get("host").cloned();

        Self {
            client_ip: client_ip.to_string(),
            method: method.to_string(),
            path,
            query,
            host,
            headers,
            internal: false,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.headers.insert("host".to_string(), host.clone());
        self.host = Some(host);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.to_lowercase();
        let value = value.into();
        if name == "host" {
            self.host = Some(value.clone());
        }
        self.headers.insert(name, value);
        self
    }

    /// Mark this as an internal sub-evaluation of a request that is already
    /// being gated.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Host header value, including any port.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Host name with the port stripped, lowercased.
    pub fn server_name(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        let name = if host.starts_with('[') {
            // [::1]:8443
            host.split(']').next().map(|h| h.trim_start_matches('['))?
        } else {
            host.rsplit_once(':').map_or(host, |(name, _)| name)
        };
        Some(name.to_lowercase())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }
}

/// Resolve the client IP for a connection.
///
/// Forwarding headers are only honored when the peer is a trusted proxy;
/// otherwise the peer address is the client.
pub fn client_ip(
    peer: IpAddr,
    headers: &HashMap<String, String>,
    config: &IpExtractionConfig,
) -> IpAddr {
    if config.headers.is_empty() || !config.is_trusted(&peer) {
        return peer;
    }
    extract_client_ip(headers, config).unwrap_or(peer)
}

/// Extract client IP from forwarding headers.
pub fn extract_client_ip(
    headers: &HashMap<String, String>,
    config: &IpExtractionConfig,
) -> Option<IpAddr> {
    for header_name in &config.headers {
        let header_lower = header_name.to_lowercase();
        if let Some(value) = headers.get(&header_lower) {
            let ip_str = if config.use_first_ip {
                // X-Forwarded-For: client, proxy1, proxy2
                value.split(',').next()?.trim()
            } else {
                value.split(',').last()?.trim()
            };

            if let Ok(ip) = ip_str.parse() {
                return Some(ip);
            }
        }
    }
    None
}

/// Flatten multi-value headers to single values.
fn flatten_headers(headers: &HashMap<String, Vec<String>>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.first().cloned().unwrap_or_default()))
        .collect()
}
