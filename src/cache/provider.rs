//! Shared-cache provider interface and registry.

use super::memory::MemoryCache;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest classification a lookup will accept back from a provider.
pub const MAX_VALUE_LEN: usize = 255;

/// Sizing hints handed to a provider at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHints {
    pub avg_id_len: usize,
    pub avg_obj_len: usize,
    pub expiry_interval: Duration,
}

impl Default for CacheHints {
    fn default() -> Self {
        Self {
            avg_id_len: 48,
            avg_obj_len: 256,
            expiry_interval: Duration::from_secs(60),
        }
    }
}

/// Error from a cache provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// No live entry for the key. Not a failure.
    #[error("not found")]
    NotFound,
    #[error("unknown cache provider '{0}'")]
    UnknownProvider(String),
    #[error("invalid arguments for cache provider '{provider}': {reason}")]
    InvalidArgs { provider: String, reason: String },
    #[error("cached value of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("cache '{0}' has not been initialized")]
    NotInitialized(String),
    #[error("cache storage is unavailable: {0}")]
    Unavailable(String),
}

/// A key/value store with per-entry expiry.
///
/// Implementations must be safe to share between request tasks. Writers are
/// serialized by [`ReputationCache`](super::ReputationCache); readers are not.
pub trait CacheProvider: Send + Sync {
    /// Provider name as used in configuration.
    fn name(&self) -> &str;

    /// Prepare storage. Called once per owning scope at startup.
    fn init(&self, hints: &CacheHints, scope: &str) -> Result<(), CacheError>;

    /// Fetch a live value. Values longer than `max_len` are an error.
    fn retrieve(&self, key: &[u8], max_len: usize) -> Result<Vec<u8>, CacheError>;

    /// Store a value until `expiry`, replacing any previous value.
    fn store(&self, key: &[u8], expiry: Instant, value: &[u8]) -> Result<(), CacheError>;

    /// Release storage. Called once at shutdown.
    fn destroy(&self);
}

/// A configured cache provider: `name` or `name:args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSpec {
    pub name: String,
    pub args: Option<String>,
}

impl FromStr for CacheSpec {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, args) = match s.split_once(':') {
            Some((name, args)) => (name, Some(args.to_string())),
            None => (s, None),
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(CacheError::UnknownProvider(s.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            args,
        })
    }
}

impl fmt::Display for CacheSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.args {
            Some(ref args) => write!(f, "{}:{}", self.name, args),
            None => f.write_str(&self.name),
        }
    }
}

/// Create an uninitialized provider instance for `spec`.
pub fn create(spec: &CacheSpec) -> Result<Arc<dyn CacheProvider>, CacheError> {
    match spec.name.as_str() {
        MemoryCache::NAME => Ok(Arc::new(MemoryCache::from_args(spec.args.as_deref())?)),
        other => Err(CacheError::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_name_only() {
        let spec: CacheSpec = "memory".parse().unwrap();
        assert_eq!(spec.name, "memory");
        assert_eq!(spec.args, None);
        assert_eq!(spec.to_string(), "memory");
    }

    #[test]
    fn test_spec_with_args() {
        let spec: CacheSpec = "memory:512".parse().unwrap();
        assert_eq!(spec.name, "memory");
        assert_eq!(spec.args.as_deref(), Some("512"));
        assert_eq!(spec.to_string(), "memory:512");
    }

    #[test]
    fn test_spec_empty_name() {
        assert!(":512".parse::<CacheSpec>().is_err());
        assert!("".parse::<CacheSpec>().is_err());
    }

    #[test]
    fn test_create_memory() {
        let provider = create(&"memory:16".parse().unwrap()).unwrap();
        assert_eq!(provider.name(), "memory");
    }

    #[test]
    fn test_create_unknown_provider() {
        let err = create(&"shmcb".parse().unwrap()).err().unwrap();
        assert_eq!(err, CacheError::UnknownProvider("shmcb".to_string()));
        assert_eq!(err.to_string(), "unknown cache provider 'shmcb'");
    }

    #[test]
    fn test_create_bad_args() {
        let err = create(&"memory:lots".parse().unwrap()).err().unwrap();
        assert!(matches!(err, CacheError::InvalidArgs { .. }));
    }

    #[test]
    fn test_default_hints() {
        let hints = CacheHints::default();
        assert_eq!(hints.avg_id_len, 48);
        assert_eq!(hints.avg_obj_len, 256);
        assert_eq!(hints.expiry_interval, Duration::from_secs(60));
    }
}
