//! Scoped settings and their merge rules.
//!
//! Every configurable field is an `Option`: `Some` means the field was set in
//! that scope. Merging takes the narrower scope's value when it is set and
//! falls back to the wider scope otherwise, field by field.

use crate::base_url::ApiUrl;
use crate::cache::CacheSpec;
use crate::expr::LocationExpr;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// What to do when the decision service cannot be consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Reject the request with a server error.
    #[default]
    Fail,
    /// Treat the client as blocked.
    Block,
    /// Let the request through.
    Allow,
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(FallbackPolicy::Fail),
            "block" => Ok(FallbackPolicy::Block),
            "allow" => Ok(FallbackPolicy::Allow),
            other => Err(format!(
                "Unknown fallback '{}'. Valid values are 'fail', 'block' and 'allow'.",
                other
            )),
        }
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FallbackPolicy::Fail => "fail",
            FallbackPolicy::Block => "block",
            FallbackPolicy::Allow => "allow",
        })
    }
}

/// Status codes a blocked request may be answered with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockedStatus {
    Forbidden,
    #[default]
    TooManyRequests,
    InternalServerError,
}

impl BlockedStatus {
    pub fn as_u16(self) -> u16 {
        match self {
            BlockedStatus::Forbidden => 403,
            BlockedStatus::TooManyRequests => 429,
            BlockedStatus::InternalServerError => 500,
        }
    }
}

impl TryFrom<u16> for BlockedStatus {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            403 => Ok(BlockedStatus::Forbidden),
            429 => Ok(BlockedStatus::TooManyRequests),
            500 => Ok(BlockedStatus::InternalServerError),
            other => Err(format!(
                "Unknown blocked_http_code '{}'. Valid values are 403, 500 and 429.",
                other
            )),
        }
    }
}

/// Server or virtual-host scope settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerSettings {
    pub api_url: Option<ApiUrl>,
    pub api_key: Option<String>,
    pub cache: Option<CacheSpec>,
    pub cache_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl ServerSettings {
    /// Combine `self` (the wider scope) with `over` (the narrower scope).
    pub fn merge(&self, over: &ServerSettings) -> ServerSettings {
        ServerSettings {
            api_url: over.api_url.clone().or_else(|| self.api_url.clone()),
            api_key: over.api_key.clone().or_else(|| self.api_key.clone()),
            cache: over.cache.clone().or_else(|| self.cache.clone()),
            cache_timeout: over.cache_timeout.or(self.cache_timeout),
            request_timeout: over.request_timeout.or(self.request_timeout),
            connect_timeout: over.connect_timeout.or(self.connect_timeout),
        }
    }

    pub fn cache_timeout(&self) -> Duration {
        self.cache_timeout.unwrap_or(DEFAULT_CACHE_TIMEOUT)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }
}

/// Location scope settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteSettings {
    pub enabled: Option<bool>,
    pub fallback: Option<FallbackPolicy>,
    pub blocked_status: Option<BlockedStatus>,
    pub location: Option<Arc<LocationExpr>>,
}

impl RouteSettings {
    /// Combine `self` (the wider scope) with `over` (the narrower scope).
    pub fn merge(&self, over: &RouteSettings) -> RouteSettings {
        RouteSettings {
            enabled: over.enabled.or(self.enabled),
            fallback: over.fallback.or(self.fallback),
            blocked_status: over.blocked_status.or(self.blocked_status),
            location: over.location.clone().or_else(|| self.location.clone()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback.unwrap_or_default()
    }

    pub fn blocked_status(&self) -> u16 {
        self.blocked_status.unwrap_or_default().as_u16()
    }

    pub fn location(&self) -> Option<&LocationExpr> {
        self.location.as_deref()
    }
}

/// Route settings that apply to requests whose path starts with `prefix`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationScope {
    pub prefix: String,
    pub settings: RouteSettings,
}

impl LocationScope {
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// A named server scope overriding the main server's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualHost {
    pub server_name: String,
    pub aliases: Vec<String>,
    pub server: ServerSettings,
    pub locations: Vec<LocationScope>,
}

impl VirtualHost {
    pub fn serves(&self, name: &str) -> bool {
        self.server_name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

/// The whole configured scope tree, before any cache is created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scopes {
    pub server: ServerSettings,
    pub locations: Vec<LocationScope>,
    pub virtual_hosts: Vec<VirtualHost>,
}

impl Scopes {
    /// Index into `virtual_hosts` of the host serving `server_name`, if any.
    pub fn virtual_host_index(&self, server_name: Option<&str>) -> Option<usize> {
        let name = server_name?;
        self.virtual_hosts.iter().position(|v| v.serves(name))
    }

    /// Effective route settings for `path`: every matching location is merged
    /// in configuration order, main server locations before the vhost's.
    pub fn route_for(&self, vhost: Option<&VirtualHost>, path: &str) -> RouteSettings {
        let vhost_locations = vhost.map(|v| v.locations.as_slice()).unwrap_or_default();

        self.locations
            .iter()
            .chain(vhost_locations)
            .filter(|scope| scope.matches(path))
            .fold(RouteSettings::default(), |acc, scope| acc.merge(&scope.settings))
    }

    /// Effective server settings for a virtual host (or the main server).
    pub fn server_for(&self, vhost: Option<&VirtualHost>) -> ServerSettings {
        match vhost {
            Some(v) => self.server.merge(&v.server),
            None => self.server.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_server(authority: &str, key: &str, secs: u64) -> ServerSettings {
        ServerSettings {
            api_url: Some(format!("http://{}", authority).parse().unwrap()),
            api_key: Some(key.to_string()),
            cache: Some(format!("memory:{}", secs * 10).parse().unwrap()),
            cache_timeout: Some(Duration::from_secs(secs)),
            request_timeout: Some(Duration::from_millis(secs * 100)),
            connect_timeout: Some(Duration::from_millis(secs * 10)),
        }
    }

    fn location(expr: &str) -> Option<Arc<LocationExpr>> {
        Some(Arc::new(LocationExpr::parse(expr).unwrap()))
    }

    #[test]
    fn test_fallback_parse() {
        assert_eq!("fail".parse::<FallbackPolicy>(), Ok(FallbackPolicy::Fail));
        assert_eq!("block".parse::<FallbackPolicy>(), Ok(FallbackPolicy::Block));
        assert_eq!("allow".parse::<FallbackPolicy>(), Ok(FallbackPolicy::Allow));

        let err = "open".parse::<FallbackPolicy>().unwrap_err();
        assert!(err.contains("'open'"));
        assert!(err.contains("'fail', 'block' and 'allow'"));
    }

    #[test]
    fn test_blocked_status_allow_list() {
        assert_eq!(BlockedStatus::try_from(403).unwrap().as_u16(), 403);
        assert_eq!(BlockedStatus::try_from(429).unwrap().as_u16(), 429);
        assert_eq!(BlockedStatus::try_from(500).unwrap().as_u16(), 500);
        assert!(BlockedStatus::try_from(200).is_err());
        assert!(BlockedStatus::try_from(418).is_err());
    }

    #[test]
    fn test_route_defaults() {
        let route = RouteSettings::default();
        assert!(!route.enabled());
        assert_eq!(route.fallback(), FallbackPolicy::Fail);
        assert_eq!(route.blocked_status(), 429);
        assert!(route.location().is_none());
    }

    #[test]
    fn test_server_defaults() {
        let server = ServerSettings::default();
        assert_eq!(server.cache_timeout(), Duration::from_secs(60));
        assert_eq!(server.request_timeout(), Duration::from_secs(5));
        assert_eq!(server.connect_timeout(), Duration::from_secs(1));
        assert!(server.cache.is_none());
    }

    #[test]
    fn test_server_merge_right_bias_per_field() {
        let base = full_server("base:8080", "base-key", 60);
        let over = full_server("over:8080", "over-key", 30);

        // Every combination of fields set in the override.
        for mask in 0u8..64 {
            let mut partial = ServerSettings::default();
            if mask & 1 != 0 {
                partial.api_url = over.api_url.clone();
            }
            if mask & 2 != 0 {
                partial.api_key = over.api_key.clone();
            }
            if mask & 4 != 0 {
                partial.cache = over.cache.clone();
            }
            if mask & 8 != 0 {
                partial.cache_timeout = over.cache_timeout;
            }
            if mask & 16 != 0 {
                partial.request_timeout = over.request_timeout;
            }
            if mask & 32 != 0 {
                partial.connect_timeout = over.connect_timeout;
            }

            let merged = base.merge(&partial);
            let pick = |bit: u8| if mask & bit != 0 { &over } else { &base };
            assert_eq!(merged.api_url, pick(1).api_url);
            assert_eq!(merged.api_key, pick(2).api_key);
            assert_eq!(merged.cache, pick(4).cache);
            assert_eq!(merged.cache_timeout, pick(8).cache_timeout);
            assert_eq!(merged.request_timeout, pick(16).request_timeout);
            assert_eq!(merged.connect_timeout, pick(32).connect_timeout);
        }
    }

    #[test]
    fn test_server_merge_unset_base_keeps_unset() {
        let merged = ServerSettings::default().merge(&ServerSettings::default());
        assert_eq!(merged, ServerSettings::default());
    }

    #[test]
    fn test_route_merge_right_bias_per_field() {
        let base = RouteSettings {
            enabled: Some(true),
            fallback: Some(FallbackPolicy::Allow),
            blocked_status: Some(BlockedStatus::Forbidden),
            location: location("/base"),
        };
        let over = RouteSettings {
            enabled: Some(false),
            fallback: Some(FallbackPolicy::Block),
            blocked_status: Some(BlockedStatus::InternalServerError),
            location: location("/over"),
        };

        for mask in 0u8..16 {
            let partial = RouteSettings {
                enabled: if mask & 1 != 0 { over.enabled } else { None },
                fallback: if mask & 2 != 0 { over.fallback } else { None },
                blocked_status: if mask & 4 != 0 { over.blocked_status } else { None },
                location: if mask & 8 != 0 { over.location.clone() } else { None },
            };

            let merged = base.merge(&partial);
            let pick = |bit: u8| if mask & bit != 0 { &over } else { &base };
            assert_eq!(merged.enabled, pick(1).enabled);
            assert_eq!(merged.fallback, pick(2).fallback);
            assert_eq!(merged.blocked_status, pick(4).blocked_status);
            assert_eq!(merged.location, pick(8).location);
        }
    }

    #[test]
    fn test_narrow_scope_overrides_single_field() {
        let scopes = Scopes {
            locations: vec![
                LocationScope {
                    prefix: "/".to_string(),
                    settings: RouteSettings {
                        enabled: Some(true),
                        fallback: Some(FallbackPolicy::Allow),
                        ..Default::default()
                    },
                },
                LocationScope {
                    prefix: "/one/".to_string(),
                    settings: RouteSettings {
                        blocked_status: Some(BlockedStatus::Forbidden),
                        ..Default::default()
                    },
                },
            ],
            ..Default::default()
        };

        let root = scopes.route_for(None, "/index.html");
        assert!(root.enabled());
        assert_eq!(root.blocked_status(), 429);

        let one = scopes.route_for(None, "/one/page");
        assert!(one.enabled());
        assert_eq!(one.fallback(), FallbackPolicy::Allow);
        assert_eq!(one.blocked_status(), 403);
    }

    #[test]
    fn test_vhost_locations_apply_after_main() {
        let vhost = VirtualHost {
            server_name: "api.example.com".to_string(),
            aliases: vec!["API.example.net".to_string()],
            server: ServerSettings {
                api_key: Some("vhost-key".to_string()),
                ..Default::default()
            },
            locations: vec![LocationScope {
                prefix: "/".to_string(),
                settings: RouteSettings {
                    enabled: Some(false),
                    ..Default::default()
                },
            }],
        };
        let scopes = Scopes {
            server: full_server("lapi:8080", "main-key", 60),
            locations: vec![LocationScope {
                prefix: "/".to_string(),
                settings: RouteSettings {
                    enabled: Some(true),
                    ..Default::default()
                },
            }],
            virtual_hosts: vec![vhost],
        };

        let index = scopes.virtual_host_index(Some("api.example.net"));
        assert_eq!(index, Some(0));
        let v = index.map(|i| &scopes.virtual_hosts[i]);
        assert!(!scopes.route_for(v, "/").enabled());
        assert!(scopes.route_for(None, "/").enabled());

        let server = scopes.server_for(v);
        assert_eq!(server.api_key.as_deref(), Some("vhost-key"));
        assert_eq!(server.api_url, scopes.server.api_url);

        assert!(scopes.virtual_host_index(Some("other.example.com")).is_none());
        assert!(scopes.virtual_host_index(None).is_none());
    }

    #[test]
    fn test_unmatched_path_is_disabled() {
        let scopes = Scopes {
            locations: vec![LocationScope {
                prefix: "/protected/".to_string(),
                settings: RouteSettings {
                    enabled: Some(true),
                    ..Default::default()
                },
            }],
            ..Default::default()
        };
        assert!(!scopes.route_for(None, "/public").enabled());
        assert!(scopes.route_for(None, "/protected/x").enabled());
    }
}
