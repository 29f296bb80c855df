//! reqwest-backed transport for decision lookups.

use super::{DecisionTransport, OutboundRequest, OutboundResponse, TransportError};
use async_trait::async_trait;
use reqwest::{redirect, Client};
use std::time::Duration;
use tracing::warn;

/// HTTP transport used in production.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with the given request and connect timeouts.
    ///
    /// Redirects are never followed: a 3xx from the LAPI is handed back as is
    /// and the api key only ever goes to the configured host.
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        Ok(Self { client })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

#[async_trait]
impl DecisionTransport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let body = match response.text().await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Failed to read decision service response");
                None
            }
        };

        Ok(OutboundResponse { status, body })
    }
}
