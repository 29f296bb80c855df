//! Queries against the CrowdSec decision service.
//!
//! Each lookup is an independent [`OutboundRequest`] value handed to a
//! [`DecisionTransport`]. Nothing from the inbound request travels with it,
//! and the service's answer comes back only through the returned
//! [`OutboundResponse`], never into the inbound request's response.

pub mod http;

use crate::base_url::ApiUrl;
use crate::settings::{FallbackPolicy, ServerSettings};
use crate::verdict::Verdict;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// Path of the decisions endpoint on the service.
pub const DECISIONS_PATH: &str = "/v1/decisions";

/// User-Agent sent with every lookup.
pub const USER_AGENT: &str = concat!("zentinel-agent-crowdsec/", env!("CARGO_PKG_VERSION"));

/// A lookup request, detached from any inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The service's answer.
///
/// `body` is `None` when no body could be captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundResponse {
    pub status: u16,
    pub body: Option<String>,
}

impl OutboundResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(body.into()),
        }
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Error from a transport before any response status was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be built for the configured endpoint.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// The status a gateway would have answered with, or `None` when the
    /// endpoint itself is unusable.
    pub fn gateway_status(&self) -> Option<u16> {
        match self {
            TransportError::InvalidRequest(_) => None,
            TransportError::Connect(_) => Some(503),
            TransportError::Timeout => Some(504),
            TransportError::Other(_) => Some(502),
        }
    }
}

/// Performs lookups against the decision service.
#[async_trait]
pub trait DecisionTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError>;
}

/// Result of one lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// A classification returned by the service. May be cached.
    Answer(String),
    /// A classification synthesized by fallback policy. Never cached.
    Fallback(String),
    /// The request is decided without a classification.
    Reject(Verdict),
}

/// Builds lookups and applies fallback policy to their failures.
#[derive(Clone)]
pub struct QueryExecutor {
    transport: Arc<dyn DecisionTransport>,
}

impl QueryExecutor {
    pub fn new(transport: Arc<dyn DecisionTransport>) -> Self {
        Self { transport }
    }

    /// `{scheme}://{authority}/v1/decisions?ip={ip}` with the IP form-encoded.
    /// Any path on the base URL is not used.
    pub fn lookup_url(api: &ApiUrl, client_ip: &str) -> String {
        let ip: String = ::url::form_urlencoded::byte_serialize(client_ip.as_bytes()).collect();
        format!("{}{}?ip={}", api.origin(), DECISIONS_PATH, ip)
    }

    /// Build the lookup for `client_ip`.
    pub fn build_request(api: &ApiUrl, api_key: Option<&str>, client_ip: &str) -> OutboundRequest {
        let mut headers = Vec::with_capacity(2);
        if let Some(key) = api_key {
            headers.push(("X-Api-Key".to_string(), key.to_string()));
        }
        headers.push(("User-Agent".to_string(), USER_AGENT.to_string()));

        OutboundRequest {
            url: Self::lookup_url(api, client_ip),
            headers,
        }
    }

    /// Look up `client_ip` and map the result through `fallback`.
    pub async fn query(
        &self,
        settings: &ServerSettings,
        client_ip: &str,
        fallback: FallbackPolicy,
    ) -> QueryOutcome {
        let Some(api) = settings.api_url.as_ref() else {
            error!(ip = %client_ip, "No decision service url configured, request rejected");
            return QueryOutcome::Reject(Verdict::internal_error());
        };

        let request = Self::build_request(api, settings.api_key.as_deref(), client_ip);
        let target = request.url.clone();

        debug!(ip = %client_ip, target = %target, "Looking up IP");

        let status = match self.transport.send(request).await {
            Ok(response) => {
                debug!(target = %target, status = response.status, "Decision service responded");

                if response.status == 404 {
                    return Self::not_a_decision_service(&target);
                }

                if response.is_success() {
                    return match response.body {
                        Some(body) => QueryOutcome::Answer(body),
                        None => {
                            error!(
                                target = %target,
                                "Response from decision service was not recorded, request rejected"
                            );
                            QueryOutcome::Reject(Verdict::internal_error())
                        }
                    };
                }

                response.status
            }
            Err(e) => match e.gateway_status() {
                Some(status) => {
                    debug!(target = %target, error = %e, status = status, "Decision service unreachable");
                    status
                }
                None => {
                    error!(target = %target, error = %e, "Could not dispatch request to decision service");
                    return Self::not_a_decision_service(&target);
                }
            },
        };

        Self::apply_fallback(&target, status, fallback)
    }

    fn not_a_decision_service(target: &str) -> QueryOutcome {
        error!(
            target = %target,
            "Received 404 Not Found from the decision service; the url may not point at a \
             CrowdSec service, request rejected"
        );
        QueryOutcome::Reject(Verdict::internal_error())
    }

    fn apply_fallback(target: &str, status: u16, fallback: FallbackPolicy) -> QueryOutcome {
        match fallback {
            FallbackPolicy::Fail => {
                error!(target = %target, status = status, "Decision service failed, request failed");
                QueryOutcome::Reject(Verdict::advisory_error())
            }
            FallbackPolicy::Block => {
                error!(target = %target, status = status, "Decision service failed, request blocked");
                QueryOutcome::Fallback(format!(
                    "[{{\"error\":\"'{}' returned {}\"}}]",
                    target, status
                ))
            }
            FallbackPolicy::Allow => {
                error!(
                    target = %target,
                    status = status,
                    "Decision service failed, request accepted anyway"
                );
                QueryOutcome::Fallback("null".to_string())
            }
        }
    }
}
