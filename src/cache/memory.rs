//! In-process TTL cache provider.

use super::provider::{CacheError, CacheHints, CacheProvider};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;
use tracing::debug;

const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Stored value.
#[derive(Debug, Clone)]
struct CachedValue {
    value: Vec<u8>,
    stored_at: Instant,
    expires_at: Instant,
}

impl CachedValue {
    /// Check if this cache entry has expired.
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe TTL store, shared by every request task of the owning scope.
pub struct MemoryCache {
    entries: RwLock<Option<HashMap<Vec<u8>, CachedValue>>>,
    max_entries: usize,
}

impl MemoryCache {
    pub const NAME: &'static str = "memory";

    /// Create a provider holding at most `max_entries` values.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(None),
            max_entries,
        }
    }

    /// Create a provider from its configuration arguments (`max_entries`).
    pub fn from_args(args: Option<&str>) -> Result<Self, CacheError> {
        let max_entries = match args.map(str::trim) {
            None | Some("") => DEFAULT_MAX_ENTRIES,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(CacheError::InvalidArgs {
                        provider: Self::NAME.to_string(),
                        reason: format!("'{}' is not a positive entry count", raw),
                    })
                }
            },
        };
        Ok(Self::new(max_entries))
    }

    /// Get the number of entries in the cache, live or not yet evicted.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .ok()
            .and_then(|e| e.as_ref().map(HashMap::len))
            .unwrap_or(0)
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired_entries(entries: &mut HashMap<Vec<u8>, CachedValue>, now: Instant) {
        entries.retain(|_, v| !v.is_expired(now));
    }
}

impl CacheProvider for MemoryCache {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn init(&self, hints: &CacheHints, scope: &str) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        if entries.is_none() {
            let capacity = self.max_entries.min(1024);
            *entries = Some(HashMap::with_capacity(capacity));
            debug!(
                scope = scope,
                max_entries = self.max_entries,
                avg_obj_len = hints.avg_obj_len,
                "Memory cache initialized"
            );
        }
        Ok(())
    }

    fn retrieve(&self, key: &[u8], max_len: usize) -> Result<Vec<u8>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        let entries = entries
            .as_ref()
            .ok_or_else(|| CacheError::NotInitialized(Self::NAME.to_string()))?;

        // Expired entries are left for the next writer to evict.
        let entry = entries.get(key).ok_or(CacheError::NotFound)?;
        if entry.is_expired(Instant::now()) {
            return Err(CacheError::NotFound);
        }

        if entry.value.len() > max_len {
            return Err(CacheError::TooLarge {
                len: entry.value.len(),
                max: max_len,
            });
        }

        Ok(entry.value.clone())
    }

    fn store(&self, key: &[u8], expiry: Instant, value: &[u8]) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        let entries = entries
            .as_mut()
            .ok_or_else(|| CacheError::NotInitialized(Self::NAME.to_string()))?;

        let now = Instant::now();

        // Evict if at capacity
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            Self::evict_expired_entries(entries, now);

            // If still at capacity, remove oldest entry
            if entries.len() >= self.max_entries {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, v)| v.stored_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key.to_vec(),
            CachedValue {
                value: value.to_vec(),
                stored_at: now,
                expires_at: expiry,
            },
        );
        Ok(())
    }

    fn destroy(&self) {
        if let Ok(mut entries) = self.entries.write() {
            *entries = None;
        }
    }
}
