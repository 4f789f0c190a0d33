//! Resolution cache for external lookups
//!
//! Entries hold a shared future, so concurrent lookups for the same key wait
//! on one in-flight request. The first writer for a key wins; failed lookups
//! are evicted so they can be retried.

use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;

use crate::core::Result;

/// Identity of a cached lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model_version: String,
    /// Value set, code system or reference being resolved
    pub identity: String,
    pub code: String,
    pub system: String,
    /// Operation URL the request goes to
    pub endpoint: String,
}

impl CacheKey {
    pub fn new(model_version: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            model_version: model_version.into(),
            identity: String::new(),
            code: String::new(),
            system: String::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_code(mut self, system: impl Into<String>, code: impl Into<String>) -> Self {
        self.system = system.into();
        self.code = code.into();
        self
    }
}

type SharedLookup = Shared<BoxFuture<'static, Result<Value>>>;

struct CacheEntry {
    lookup: SharedLookup,
    created: Instant,
}

impl CacheEntry {
    fn start<F>(start: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value>>,
    {
        Self {
            lookup: start().shared(),
            created: Instant::now(),
        }
    }
}

/// Time-limited cache of external lookups
pub struct ResolutionCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl ResolutionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Await the cached lookup for `key`, starting it with `start` when absent or expired
    pub async fn get_or_fetch<F>(&self, key: CacheKey, start: F) -> Result<Value>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value>>,
    {
        let (lookup, created) = match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().created.elapsed() < self.ttl => {
                log::debug!("Resolution cache hit for {}", key.endpoint);
                (entry.get().lookup.clone(), entry.get().created)
            }
            Entry::Occupied(mut entry) => {
                log::debug!("Resolution cache entry expired for {}", key.endpoint);
                let fresh = CacheEntry::start(start);
                let stamp = (fresh.lookup.clone(), fresh.created);
                entry.insert(fresh);
                stamp
            }
            Entry::Vacant(entry) => {
                log::debug!("Resolution cache miss for {}", key.endpoint);
                let fresh = CacheEntry::start(start);
                let stamp = (fresh.lookup.clone(), fresh.created);
                entry.insert(fresh);
                stamp
            }
        };
        let result = lookup.await;
        if result.is_err() {
            // Only evict the entry this lookup came from; a newer one may have replaced it.
            self.entries.remove_if(&key, |_, entry| entry.created == created);
        }
        result
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FhirPathError;
    use crate::core::error_code::FP0200;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>, value: Value) -> BoxFuture<'static, Result<Value>> {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_identical_keys_share_one_request() {
        let cache = ResolutionCache::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new("4.0.1", "https://tx/ValueSet/$expand").with_identity("vs");

        let (a, b) = tokio::join!(
            cache.get_or_fetch(key.clone(), || counting(&counter, json!(1))),
            cache.get_or_fetch(key.clone(), || counting(&counter, json!(2))),
        );
        assert_eq!(a.unwrap(), json!(1));
        assert_eq!(b.unwrap(), json!(1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_and_failed_entries_are_refetched() {
        let cache = ResolutionCache::new(Duration::ZERO);
        let counter = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new("4.0.1", "https://tx/CodeSystem/$lookup");
        cache.get_or_fetch(key.clone(), || counting(&counter, json!(1))).await.unwrap();
        cache.get_or_fetch(key.clone(), || counting(&counter, json!(1))).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        let cache = ResolutionCache::default();
        let failed = cache
            .get_or_fetch(key.clone(), || {
                async { Err(FhirPathError::external(FP0200, "down", None)) }.boxed()
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_a_newer_entry_for_the_same_key() {
        let cache = ResolutionCache::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new("4.0.1", "https://tx/ValueSet/$validate-code").with_identity("vs");
        let (release, released) = futures::channel::oneshot::channel::<()>();

        let stale = cache.get_or_fetch(key.clone(), move || {
            async move {
                let _ = released.await;
                Err(FhirPathError::external(FP0200, "down", None))
            }
            .boxed()
        });
        let replacement = async {
            cache.clear();
            tokio::time::sleep(Duration::from_millis(2)).await;
            let value = cache.get_or_fetch(key.clone(), || counting(&counter, json!(true))).await;
            let _ = release.send(());
            value
        };
        let (stale, replacement) = tokio::join!(stale, replacement);

        assert!(stale.is_err());
        assert_eq!(replacement.unwrap(), json!(true));
        assert_eq!(cache.len(), 1);
        let cached = cache.get_or_fetch(key, || counting(&counter, json!(false))).await;
        assert_eq!(cached.unwrap(), json!(true));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
