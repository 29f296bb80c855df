//! Reputation cache keyed by client IP.
//!
//! Lookups go straight to the provider. Writes take the scope's write lock
//! with a non-blocking attempt and are dropped when another writer holds it:
//! a missed cache write only costs one extra upstream query later, while
//! waiting would add latency to the request.

pub mod memory;
pub mod provider;

pub use provider::{CacheError, CacheHints, CacheProvider, CacheSpec, MAX_VALUE_LEN};

use std::borrow::Cow;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Some providers reject very short keys; `::1` is only three bytes.
pub const MIN_KEY_LEN: usize = 4;

/// Derive the cache key for a client IP, space-padding short keys.
pub fn cache_key(ip: &str) -> Cow<'_, str> {
    if ip.len() < MIN_KEY_LEN {
        Cow::Owned(format!("{:<width$}", ip, width = MIN_KEY_LEN))
    } else {
        Cow::Borrowed(ip)
    }
}

/// A scope's reputation cache: a provider instance plus its write lock.
///
/// A cache built with [`ReputationCache::disabled`] never hits and ignores
/// writes.
pub struct ReputationCache {
    provider: Option<Arc<dyn CacheProvider>>,
    write_lock: Mutex<()>,
    scope: String,
}

impl ReputationCache {
    /// Create and initialize the cache described by `spec` for `scope`.
    pub fn open(spec: &CacheSpec, scope: &str) -> Result<Self, CacheError> {
        let provider = provider::create(spec)?;
        Self::with_provider(provider, scope)
    }

    /// Initialize `provider` for `scope` and wrap it.
    pub fn with_provider(
        provider: Arc<dyn CacheProvider>,
        scope: &str,
    ) -> Result<Self, CacheError> {
        provider.init(&CacheHints::default(), scope)?;
        Ok(Self {
            provider: Some(provider),
            write_lock: Mutex::new(()),
            scope: scope.to_string(),
        })
    }

    /// A cache that is not configured.
    pub fn disabled() -> Self {
        Self {
            provider: None,
            write_lock: Mutex::new(()),
            scope: String::new(),
        }
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.name())
    }

    /// Look up the cached classification for `ip`.
    ///
    /// Provider failures are logged and reported as a miss.
    pub fn get(&self, ip: &str) -> Option<String> {
        let provider = self.provider.as_ref()?;
        let key = cache_key(ip);

        match provider.retrieve(key.as_bytes(), MAX_VALUE_LEN) {
            Ok(value) => {
                debug!(ip = %ip, scope = %self.scope, "Response found in cache");
                Some(String::from_utf8_lossy(&value).into_owned())
            }
            Err(CacheError::NotFound) => {
                debug!(ip = %ip, scope = %self.scope, "No response found in cache");
                None
            }
            Err(e) => {
                error!(ip = %ip, scope = %self.scope, error = %e, "Error while retrieving cached response");
                None
            }
        }
    }

    /// Store `classification` for `ip` for `ttl`. Best effort.
    pub fn put(&self, ip: &str, classification: &str, ttl: Duration) {
        let Some(provider) = self.provider.as_ref() else {
            return;
        };

        let _guard = match self.write_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                debug!(ip = %ip, "Result not written to cache (lock busy)");
                return;
            }
            Err(TryLockError::Poisoned(e)) => {
                error!(ip = %ip, error = %e, "Result not written to cache (failed to take cache lock)");
                return;
            }
        };

        let key = cache_key(ip);
        let expiry = Instant::now() + ttl;

        match provider.store(key.as_bytes(), expiry, classification.as_bytes()) {
            Ok(()) => debug!(ip = %ip, ttl_secs = ttl.as_secs(), "Result written to cache"),
            Err(e) => error!(ip = %ip, error = %e, "Result not written to cache"),
        }
    }
}

impl Drop for ReputationCache {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            debug!(scope = %self.scope, provider = provider.name(), "Destroying cache");
            provider.destroy();
        }
    }
}

impl std::fmt::Debug for ReputationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReputationCache")
            .field("provider", &self.provider_name())
            .field("scope", &self.scope)
            .finish()
    }
}
