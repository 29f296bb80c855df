//! Parsing of the CrowdSec LAPI base URL.

use std::fmt;
use std::str::FromStr;

/// Error returned when the configured base URL cannot be split.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("invalid lapi base url: url is empty")]
    Empty,
    #[error("invalid lapi base url: scheme is missing")]
    MissingScheme,
    #[error("invalid lapi base url: missing double slash after scheme")]
    MissingDoubleSlash,
    #[error("invalid lapi base url: authority is missing")]
    MissingAuthority,
}

/// Base URL of the decision service, split into its parts.
///
/// Only `scheme` and `authority` are used to build lookups; a path is kept so
/// that it can be reported when it would otherwise be silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiUrl {
    pub scheme: String,
    pub authority: String,
    pub path: Option<String>,
}

impl ApiUrl {
    /// Whether the configured path carries anything beyond a bare `/`.
    pub fn has_ignored_path(&self) -> bool {
        matches!(self.path.as_deref(), Some(p) if p != "/")
    }

    /// `scheme://authority` with no trailing slash.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.authority)
    }
}

impl FromStr for ApiUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(UrlError::Empty);
        }

        let colon = s.find(':').ok_or(UrlError::MissingScheme)?;
        let scheme = &s[..colon];

        let rest = s[colon + 1..]
            .strip_prefix("//")
            .ok_or(UrlError::MissingDoubleSlash)?;

        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], Some(&rest[slash..])),
            None => (rest, None),
        };

        if authority.is_empty() && path.is_none() {
            return Err(UrlError::MissingAuthority);
        }

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            path: path.map(str::to_string),
        })
    }
}

impl fmt::Display for ApiUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)?;
        if let Some(ref path) = self.path {
            f.write_str(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scheme_and_authority() {
        let url: ApiUrl = "http://localhost:8080".parse().unwrap();
        assert_eq!(url.scheme, "http");
        assert_eq!(url.authority, "localhost:8080");
        assert_eq!(url.path, None);
        assert!(!url.has_ignored_path());
    }

    #[test]
    fn test_parse_with_path() {
        let url: ApiUrl = "https://lapi.example.com/api/".parse().unwrap();
        assert_eq!(url.authority, "lapi.example.com");
        assert_eq!(url.path.as_deref(), Some("/api/"));
        assert!(url.has_ignored_path());
        assert_eq!(url.origin(), "https://lapi.example.com");
    }

    #[test]
    fn test_bare_slash_path_is_not_ignored() {
        let url: ApiUrl = "http://127.0.0.1:8080/".parse().unwrap();
        assert_eq!(url.path.as_deref(), Some("/"));
        assert!(!url.has_ignored_path());
    }

    #[test]
    fn test_missing_double_slash() {
        assert_eq!(
            "http:localhost".parse::<ApiUrl>(),
            Err(UrlError::MissingDoubleSlash)
        );
        assert_eq!("http:/x".parse::<ApiUrl>(), Err(UrlError::MissingDoubleSlash));
    }

    #[test]
    fn test_missing_scheme() {
        assert_eq!("localhost".parse::<ApiUrl>(), Err(UrlError::MissingScheme));
        assert_eq!("".parse::<ApiUrl>(), Err(UrlError::Empty));
    }

    #[test]
    fn test_missing_authority() {
        assert_eq!("http://".parse::<ApiUrl>(), Err(UrlError::MissingAuthority));
    }

    #[test]
    fn test_empty_authority_with_path() {
        let url: ApiUrl = "unix:///run/crowdsec.sock".parse().unwrap();
        assert_eq!(url.scheme, "unix");
        assert_eq!(url.authority, "");
        assert_eq!(url.path.as_deref(), Some("/run/crowdsec.sock"));
    }

    #[test]
    fn test_display_round_trips_input() {
        let input = "http://localhost:8080/v1";
        let url: ApiUrl = input.parse().unwrap();
        assert_eq!(url.to_string(), input);
    }
}
