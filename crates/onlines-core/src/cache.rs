//! Tiered in-memory cache
//!
//! Results are stored as `serde_json::Value` keyed by query identity and
//! expire after a TTL picked by [`TtlPolicy`]. Concurrent misses on the same
//! key may both fetch; results are idempotent so the last write wins.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::HostSettings;
use crate::error::Result;

/// TTL in home mode, minutes
pub const HOME_TTL_MINUTES: u64 = 5;

/// TTL ceiling in constrained-network mode, minutes
pub const CONSTRAINED_TTL_MINUTES: u64 = 2;

/// Cached value with its expiry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Concurrent key-value cache with per-entry TTL
#[derive(Debug, Default)]
pub struct TieredCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl TieredCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value. Expired entries are removed and count as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let value = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
                Some(_) => None,
                None => return None,
            }
        };

        match value {
            Some(value) => match serde_json::from_value(value) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    tracing::debug!(key, error = %e, "Cached value has a different shape");
                    None
                }
            },
            None => {
                let mut entries = self.entries.write();
                if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
                    entries.remove(key);
                }
                None
            }
        }
    }

    /// Store a value for `ttl`. A zero TTL stores nothing.
    ///
    /// # Errors
    /// Returns `OnlineError::Json` if the value cannot be serialized
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        let entry = CacheEntry {
            value: serde_json::to_value(value)?,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    /// Cache-aside: return the cached value or run `fetch`. A fresh value is
    /// stored only when `keep` accepts it; failures are never cached.
    pub async fn get_or_fetch<T, F, Fut, K>(&self, key: &str, ttl: Duration, fetch: F, keep: K) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        K: FnOnce(&T) -> bool,
    {
        if let Some(hit) = self.get(key) {
            tracing::trace!(key, "Cache hit");
            return Ok(hit);
        }

        let value = fetch().await?;
        if keep(&value) {
            self.set(key, &value, ttl)?;
        } else {
            tracing::debug!(key, "Result not cached");
        }
        Ok(value)
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// TTL selection by deployment mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Deployment mode flags
    pub mode: HostSettings,
    /// Per-adapter override in minutes, `0` when unset
    pub cache_time: u64,
    /// Premium override in minutes
    pub premium: Option<u64>,
}

impl TtlPolicy {
    /// Policy for a mode with no overrides.
    pub fn new(mode: HostSettings) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Effective TTL in minutes for a result class.
    ///
    /// The class default is the ceiling in every mode.
    pub fn minutes(&self, class_default: u64) -> u64 {
        let minutes = if let Some(premium) = self.premium.filter(|p| *p > 0) {
            premium
        } else if self.mode.constrained {
            CONSTRAINED_TTL_MINUTES.min(self.shared_minutes(class_default))
        } else if self.mode.shared {
            self.shared_minutes(class_default)
        } else {
            HOME_TTL_MINUTES
        };

        minutes.min(class_default)
    }

    /// Effective TTL for a result class given in minutes.
    pub fn ttl(&self, class_default: u64) -> Duration {
        Duration::from_secs(self.minutes(class_default) * 60)
    }

    fn shared_minutes(&self, class_default: u64) -> u64 {
        if self.cache_time > 0 {
            self.cache_time
        } else {
            class_default
        }
    }
}

/// Build a cache key: `{adapter}:{operation}:{parts…}`.
///
/// Every part is trimmed and lower-cased.
///
/// # Examples
/// ```
/// use onlines_core::cache::cache_key;
///
/// assert_eq!(
///     cache_key("uakino", "search", &["  Шерлок ", "Sherlock"]),
///     "uakino:search:шерлок:sherlock"
/// );
/// ```
pub fn cache_key(adapter: &str, operation: &str, parts: &[&str]) -> String {
    let mut key = format!(
        "{}:{}",
        adapter.trim().to_lowercase(),
        operation.trim().to_lowercase()
    );
    for part in parts {
        key.push(':');
        key.push_str(&part.trim().to_lowercase());
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OnlineError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn mode(constrained: bool, shared: bool) -> HostSettings {
        HostSettings { constrained, shared }
    }

    #[test]
    fn test_set_then_get() {
        let cache = TieredCache::new();
        cache
            .set("k", &vec!["a".to_string(), "b".to_string()], Duration::from_secs(60))
            .unwrap();
        let value: Option<Vec<String>> = cache.get("k");
        assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_get_missing() {
        let cache = TieredCache::new();
        assert_eq!(cache.get::<String>("nope"), None);
    }

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let cache = TieredCache::new();
        cache.set("k", &1u32, Duration::from_millis(20)).unwrap();
        assert_eq!(cache.get::<u32>("k"), Some(1));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get::<u32>("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_stores_nothing() {
        let cache = TieredCache::new();
        cache.set("k", &1u32, Duration::ZERO).unwrap();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_shape_mismatch_is_miss() {
        let cache = TieredCache::new();
        cache.set("k", &"text", Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get::<u32>("k"), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_fetches_once() {
        let cache = TieredCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value: String = cache
                .get_or_fetch(
                    "k",
                    Duration::from_secs(60),
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("fresh".to_string())
                    },
                    |_| true,
                )
                .await
                .unwrap();
            assert_eq!(value, "fresh");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_does_not_cache_failures() {
        let cache = TieredCache::new();
        let result: Result<String> = cache
            .get_or_fetch(
                "k",
                Duration::from_secs(60),
                || async { Err(OnlineError::NotFound("q".to_string())) },
                |_| true,
            )
            .await;
        assert!(matches!(result, Err(OnlineError::NotFound(_))));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_fetch_skips_rejected_values() {
        let cache = TieredCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let value: Vec<String> = cache
                .get_or_fetch(
                    "k",
                    Duration::from_secs(60),
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Vec::new())
                    },
                    |v: &Vec<String>| !v.is_empty(),
                )
                .await
                .unwrap();
            assert!(value.is_empty());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(TieredCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let key = format!("{}:{}", i, j);
                        cache.set(&key, &j, Duration::from_secs(60)).unwrap();
                        assert_eq!(cache.get::<i32>(&key), Some(j));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 800);
    }

    #[test]
    fn test_ttl_home_mode() {
        let policy = TtlPolicy::new(mode(false, false));
        assert_eq!(policy.minutes(20), 5);
        assert_eq!(policy.minutes(3), 3);
    }

    #[test]
    fn test_ttl_constrained_mode() {
        let policy = TtlPolicy::new(mode(true, true));
        assert_eq!(policy.minutes(20), 2);
        assert_eq!(policy.minutes(1), 1);
    }

    #[test]
    fn test_ttl_shared_mode() {
        let mut policy = TtlPolicy::new(mode(false, true));
        assert_eq!(policy.minutes(20), 20);
        policy.cache_time = 7;
        assert_eq!(policy.minutes(20), 7);
        policy.cache_time = 60;
        assert_eq!(policy.minutes(20), 20);
    }

    #[test]
    fn test_ttl_premium_override() {
        let policy = TtlPolicy {
            mode: mode(true, false),
            cache_time: 0,
            premium: Some(15),
        };
        assert_eq!(policy.minutes(20), 15);
        assert_eq!(policy.minutes(10), 10);
        assert_eq!(policy.ttl(20), Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_cache_key_normalizes_parts() {
        assert_eq!(
            cache_key("StarLight", "Project", &[" Https://A/B "]),
            "starlight:project:https://a/b"
        );
        assert_eq!(cache_key("bamboo", "search", &[]), "bamboo:search");
        assert_eq!(cache_key("mikai", "search", &["", "x"]), "mikai:search::x");
    }

    proptest! {
        #[test]
        fn prop_ttl_never_exceeds_class_default(
            class_default in 1u64..120,
            cache_time in 0u64..240,
            premium in proptest::option::of(0u64..240),
            constrained: bool,
            shared: bool,
        ) {
            let policy = TtlPolicy { mode: mode(constrained, shared), cache_time, premium };
            prop_assert!(policy.minutes(class_default) <= class_default);
        }

        #[test]
        fn prop_constrained_not_above_shared(
            class_default in 1u64..120,
            cache_time in 0u64..240,
        ) {
            let shared = TtlPolicy { mode: mode(false, true), cache_time, premium: None };
            let constrained = TtlPolicy { mode: mode(true, false), cache_time, premium: None };
            prop_assert!(constrained.minutes(class_default) <= shared.minutes(class_default));
        }

        #[test]
        fn prop_set_then_get_round_trip(key in "[a-z:]{1,24}", value in any::<i64>()) {
            let cache = TieredCache::new();
            cache.set(&key, &value, Duration::from_secs(60)).unwrap();
            prop_assert_eq!(cache.get::<i64>(&key), Some(value));
        }
    }
}
