//! CrowdSec Agent for Zentinel.
//!
//! Gates requests on the CrowdSec Local API: the client IP is looked up on
//! `/v1/decisions` and any active decision blocks the request.
//!
//! # Features
//!
//! - **Scoped settings** - Main server, virtual host and path-prefix scopes,
//!   merged field by field
//! - **Caching** - Lookup results cached per IP with a configurable TTL
//! - **Fallback policy** - `fail`, `block` or `allow` when the LAPI is unusable
//! - **Custom block response** - 403, 429 or 500, or a redirect built from
//!   `%{VAR}` expressions
//! - **Client IP extraction** - Forwarding headers honored from trusted proxies
//!
//! # Example Configuration
//!
//! ```yaml
//! crowdsec:
//!   url: "http://localhost:8080"
//!   api_key: "${CROWDSEC_API_KEY}"
//!   cache: "memory"
//!   cache_timeout_seconds: 60
//!
//! locations:
//!   - path: "/"
//!     enabled: true
//!     fallback: allow
//!     blocked_http_code: 403
//! ```

pub mod agent;
pub mod base_url;
pub mod cache;
pub mod config;
pub mod expr;
pub mod request;
pub mod settings;
pub mod upstream;
pub mod verdict;

pub use agent::CrowdsecAgent;
pub use config::Config;
pub use request::GateRequest;
pub use verdict::Verdict;
