//! Configuration file for the CrowdSec agent.

use crate::base_url::{ApiUrl, UrlError};
use crate::cache::{self, CacheError, CacheSpec};
use crate::expr::{ExprError, LocationExpr};
use crate::settings::{
    BlockedStatus, FallbackPolicy, LocationScope, RouteSettings, Scopes, ServerSettings,
    VirtualHost,
};
use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Main server scope.
    #[serde(default)]
    pub crowdsec: ServerConfig,

    /// Client IP extraction.
    #[serde(default)]
    pub ip_extraction: IpExtractionConfig,

    /// Location scopes of the main server. Inherited by every virtual host.
    #[serde(default)]
    pub locations: Vec<LocationConfig>,

    /// Virtual hosts.
    #[serde(default)]
    pub virtual_hosts: Vec<VirtualHostConfig>,
}

/// Server scope settings. Unset fields are inherited.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Base URL of the CrowdSec LAPI, e.g. `http://localhost:8080`.
    #[serde(default)]
    pub url: Option<String>,

    /// Bouncer API key (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Cache provider, `name` or `name:args`.
    #[serde(default)]
    pub cache: Option<String>,

    /// How long a lookup result is cached.
    #[serde(default)]
    pub cache_timeout_seconds: Option<u64>,

    /// Lookup request timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Lookup connect timeout in milliseconds.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

/// Location scope settings. Unset fields are inherited.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LocationConfig {
    /// Path prefix this scope applies to.
    pub path: String,

    #[serde(default)]
    pub enabled: Option<bool>,

    /// `fail`, `block` or `allow`.
    #[serde(default)]
    pub fallback: Option<String>,

    /// 403, 429 or 500.
    #[serde(default)]
    pub blocked_http_code: Option<u16>,

    /// Redirect target expression for blocked clients.
    #[serde(default)]
    pub location: Option<String>,
}

/// A virtual host overriding the main server scope.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VirtualHostConfig {
    pub server_name: String,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub crowdsec: ServerConfig,

    #[serde(default)]
    pub locations: Vec<LocationConfig>,
}

/// IP extraction configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpExtractionConfig {
    /// Headers to check for client IP, in order of preference. Empty means the
    /// connection peer is always the client.
    #[serde(default)]
    pub headers: Vec<String>,

    /// Use first IP from X-Forwarded-For (true) or last IP (false).
    #[serde(default = "default_true")]
    pub use_first_ip: bool,

    /// Peers allowed to supply the client IP through `headers`.
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
}

impl Default for IpExtractionConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            use_first_ip: true,
            trusted_proxies: Vec::new(),
        }
    }
}

impl IpExtractionConfig {
    pub fn is_trusted(&self, peer: &IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(peer))
    }
}

fn default_true() -> bool {
    true
}

/// Error in the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{scope}: invalid url '{url}': {source}")]
    Url {
        scope: String,
        url: String,
        source: UrlError,
    },
    #[error("{scope}: api_key is empty")]
    EmptyApiKey { scope: String },
    #[error("{scope}: cache '{spec}': {source}")]
    Cache {
        scope: String,
        spec: String,
        source: CacheError,
    },
    #[error("location '{path}': {reason}")]
    Location { path: String, reason: String },
    #[error("location '{path}': cannot parse expression '{expr}': {source}")]
    Expression {
        path: String,
        expr: String,
        source: ExprError,
    },
    #[error("virtual host '{0}' is defined more than once")]
    DuplicateVirtualHost(String),
}

impl ServerConfig {
    fn to_settings(&self, scope: &str) -> Result<ServerSettings, ConfigError> {
        let api_url = match self.url {
            Some(ref raw) => {
                let url: ApiUrl = raw.parse().map_err(|source| ConfigError::Url {
                    scope: scope.to_string(),
                    url: raw.clone(),
                    source,
                })?;
                Some(url)
            }
            None => None,
        };

        if matches!(self.api_key.as_deref(), Some(key) if key.trim().is_empty()) {
            return Err(ConfigError::EmptyApiKey {
                scope: scope.to_string(),
            });
        }

        let cache = match self.cache {
            Some(ref raw) => {
                let cache_err = |source| ConfigError::Cache {
                    scope: scope.to_string(),
                    spec: raw.clone(),
                    source,
                };
                let spec: CacheSpec = raw.parse().map_err(cache_err)?;
                // Reject unknown providers and bad arguments now; the real
                // instance is created when the agent starts.
                cache::provider::create(&spec).map_err(cache_err)?;
                Some(spec)
            }
            None => None,
        };

        Ok(ServerSettings {
            api_url,
            api_key: self.api_key.clone(),
            cache,
            cache_timeout: self.cache_timeout_seconds.map(Duration::from_secs),
            request_timeout: self.timeout_ms.map(Duration::from_millis),
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
        })
    }
}

impl LocationConfig {
    fn to_scope(&self) -> Result<LocationScope, ConfigError> {
        let location_err = |reason: String| ConfigError::Location {
            path: self.path.clone(),
            reason,
        };

        if !self.path.starts_with('/') {
            return Err(location_err("path must start with '/'".to_string()));
        }

        let fallback = self
            .fallback
            .as_deref()
            .map(str::parse::<FallbackPolicy>)
            .transpose()
            .map_err(location_err)?;

        let blocked_status = self
            .blocked_http_code
            .map(BlockedStatus::try_from)
            .transpose()
            .map_err(location_err)?;

        let location = match self.location {
            Some(ref expr) => {
                let parsed = LocationExpr::parse(expr).map_err(|source| ConfigError::Expression {
                    path: self.path.clone(),
                    expr: expr.clone(),
                    source,
                })?;
                Some(Arc::new(parsed))
            }
            None => None,
        };

        Ok(LocationScope {
            prefix: self.path.clone(),
            settings: RouteSettings {
                enabled: self.enabled,
                fallback,
                blocked_status,
                location,
            },
        })
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, expanding `${ENV_VAR}` references.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.scopes()?;
        Ok(())
    }

    /// Compile the file model into typed, validated scopes.
    pub fn scopes(&self) -> Result<Scopes, ConfigError> {
        let server = self.crowdsec.to_settings("main server")?;
        let locations = compile_locations(&self.locations)?;

        let mut seen = HashSet::new();
        let mut virtual_hosts = Vec::with_capacity(self.virtual_hosts.len());

        for vhost in &self.virtual_hosts {
            for name in std::iter::once(&vhost.server_name).chain(&vhost.aliases) {
                if !seen.insert(name.to_lowercase()) {
                    return Err(ConfigError::DuplicateVirtualHost(name.clone()));
                }
            }

            virtual_hosts.push(VirtualHost {
                server_name: vhost.server_name.clone(),
                aliases: vhost.aliases.clone(),
                server: vhost.crowdsec.to_settings(&vhost.server_name)?,
                locations: compile_locations(&vhost.locations)?,
            });
        }

        Ok(Scopes {
            server,
            locations,
            virtual_hosts,
        })
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# CrowdSec Agent Configuration

# Main server scope
crowdsec:
  url: "http://localhost:8080"         # CrowdSec LAPI; any path is ignored
  api_key: "${CROWDSEC_API_KEY}"       # Add one with 'cscli bouncers add'
  cache: "memory:10000"                # Omit to disable caching
  cache_timeout_seconds: 60
  timeout_ms: 5000
  connect_timeout_ms: 1000

# Client IP extraction. By default the connection peer is the client.
ip_extraction:
  headers:
    - "x-forwarded-for"
  use_first_ip: true
  trusted_proxies:
    - "10.0.0.0/8"

# Location scopes, merged in order for every matching path prefix
locations:
  - path: "/"
    enabled: true
    fallback: fail                     # fail, block or allow
    blocked_http_code: 429             # 403, 429 or 500

  - path: "/one/"
    blocked_http_code: 403

  - path: "/four/"
    location: "https://somewhere.example.com/blocked.html?ip=%{REMOTE_ADDR}"

# Virtual hosts override the main server scope
virtual_hosts:
  - server_name: "api.example.com"
    aliases:
      - "api.example.net"
    crowdsec:
      api_key: "${CROWDSEC_API_BOUNCER_KEY}"
      cache: "memory:2000"
    locations:
      - path: "/health"
        enabled: false
"#
        .to_string()
    }
}

fn compile_locations(locations: &[LocationConfig]) -> Result<Vec<LocationScope>, ConfigError> {
    locations.iter().map(LocationConfig::to_scope).collect()
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"))
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    env_var_pattern()
        .replace_all(content, |cap: &regex::Captures<'_>| {
            std::env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
