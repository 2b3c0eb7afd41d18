//! Time-bounded cache of tenant overrides.
//!
//! A refresh is split in two: [`OverrideCache::fetch`] talks to the store
//! with no registry lock held, and [`CachedOverride::apply`] folds the
//! result into an entry under that entry's lock. Store failures and
//! timeouts never reach the caller; the last known value stays in force.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::policy::OverrideLimits;
use super::store::OverrideStore;
use crate::config::OverrideCacheConfig;

/// Result of one store lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The store answered; `None` means the tenant has no override.
    Loaded(Option<OverrideLimits>),
    /// The store errored or timed out.
    Failed,
}

/// Override state cached on a registry entry.
#[derive(Debug, Clone, Default)]
pub struct CachedOverride {
    limits: Option<OverrideLimits>,
    loaded_at: Option<Instant>,
    refresh_started: Option<Instant>,
}

impl CachedOverride {
    /// Limits currently in force, if the tenant has an override.
    pub fn limits(&self) -> Option<OverrideLimits> {
        self.limits
    }

    pub fn loaded_at(&self) -> Option<Instant> {
        self.loaded_at
    }

    /// True when nothing was loaded yet or the last load is older than `ttl`.
    pub fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        match self.loaded_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) > ttl,
        }
    }

    /// Claim the refresh for this entry.
    ///
    /// Returns `true` when the caller should fetch. Concurrent callers see
    /// `false` while a claimed refresh is younger than `fetch_timeout`, and
    /// keep using the cached value.
    pub fn begin_refresh(&mut self, now: Instant, ttl: Duration, fetch_timeout: Duration) -> bool {
        if !self.is_stale(now, ttl) {
            return false;
        }
        if let Some(started) = self.refresh_started {
            if now.saturating_duration_since(started) <= fetch_timeout {
                return false;
            }
        }
        self.refresh_started = Some(now);
        true
    }

    /// Record a fetch that began at `started`.
    ///
    /// A failure keeps the previous limits but still counts as a load, so a
    /// broken store is retried once per TTL rather than on every request.
    /// Returns `true` if the limits in force changed.
    pub fn apply(&mut self, outcome: FetchOutcome, started: Instant) -> bool {
        if let Some(previous) = self.loaded_at {
            if previous > started {
                return false;
            }
        }
        self.loaded_at = Some(started);
        self.refresh_started = None;

        match outcome {
            FetchOutcome::Loaded(limits) => {
                let changed = self.limits != limits;
                self.limits = limits;
                changed
            }
            FetchOutcome::Failed => false,
        }
    }
}

/// Fetches overrides from the store with a timeout.
#[derive(Clone)]
pub struct OverrideCache {
    store: Arc<dyn OverrideStore>,
    ttl: Duration,
    fetch_timeout: Duration,
}

impl std::fmt::Debug for OverrideCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideCache")
            .field("ttl", &self.ttl)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl OverrideCache {
    pub fn new(store: Arc<dyn OverrideStore>, config: &OverrideCacheConfig) -> Self {
        Self {
            store,
            ttl: config.ttl(),
            fetch_timeout: config.fetch_timeout(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Look up a tenant's override, bounded by the fetch timeout.
    pub async fn fetch(&self, tenant_id: &str) -> FetchOutcome {
        match tokio::time::timeout(self.fetch_timeout, self.store.load_override(tenant_id)).await {
            Ok(Ok(record)) => {
                let limits = record.map(|r| r.limits());
                debug!(tenant = %tenant_id, limits = ?limits, "Loaded tenant override");
                FetchOutcome::Loaded(limits)
            }
            Ok(Err(e)) => {
                warn!(tenant = %tenant_id, error = %e, "Override fetch failed, keeping cached limits");
                FetchOutcome::Failed
            }
            Err(_) => {
                warn!(
                    tenant = %tenant_id,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "Override fetch timed out, keeping cached limits"
                );
                FetchOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, TollgateError};
    use crate::ratelimit::store::{InMemoryOverrideStore, OverrideRecord};
    use async_trait::async_trait;

    const TTL: Duration = Duration::from_secs(60);
    const TIMEOUT: Duration = Duration::from_millis(250);

    const LIMITS: OverrideLimits = OverrideLimits {
        per_minute: 5,
        per_hour: 50,
    };

    struct BrokenStore;

    #[async_trait]
    impl OverrideStore for BrokenStore {
        async fn load_override(&self, _tenant_id: &str) -> Result<Option<OverrideRecord>> {
            Err(TollgateError::Store("connection refused".to_string()))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl OverrideStore for SlowStore {
        async fn load_override(&self, tenant_id: &str) -> Result<Option<OverrideRecord>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(OverrideRecord::new(tenant_id, 5, 50)))
        }
    }

    fn cache(store: Arc<dyn OverrideStore>) -> OverrideCache {
        OverrideCache::new(
            store,
            &OverrideCacheConfig {
                ttl_secs: 60,
                fetch_timeout_ms: 250,
                path: None,
            },
        )
    }

    #[test]
    fn test_empty_cache_is_stale() {
        let cached = CachedOverride::default();
        assert!(cached.is_stale(Instant::now(), TTL));
        assert!(cached.limits().is_none());
    }

    #[test]
    fn test_staleness_follows_ttl() {
        let t0 = Instant::now();
        let mut cached = CachedOverride::default();
        cached.apply(FetchOutcome::Loaded(Some(LIMITS)), t0);

        assert!(!cached.is_stale(t0 + Duration::from_secs(60), TTL));
        assert!(cached.is_stale(t0 + Duration::from_secs(61), TTL));
    }

    #[test]
    fn test_failure_keeps_last_known_limits() {
        let t0 = Instant::now();
        let mut cached = CachedOverride::default();
        cached.apply(FetchOutcome::Loaded(Some(LIMITS)), t0);

        let t1 = t0 + Duration::from_secs(61);
        assert!(!cached.apply(FetchOutcome::Failed, t1));
        assert_eq!(cached.limits(), Some(LIMITS));
        assert_eq!(cached.loaded_at(), Some(t1));
    }

    #[test]
    fn test_removed_override_reverts_to_defaults() {
        let t0 = Instant::now();
        let mut cached = CachedOverride::default();
        cached.apply(FetchOutcome::Loaded(Some(LIMITS)), t0);

        assert!(cached.apply(FetchOutcome::Loaded(None), t0 + Duration::from_secs(61)));
        assert!(cached.limits().is_none());
    }

    #[test]
    fn test_older_fetch_does_not_overwrite_newer() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);
        let mut cached = CachedOverride::default();

        cached.apply(FetchOutcome::Loaded(Some(LIMITS)), t1);
        assert!(!cached.apply(FetchOutcome::Loaded(None), t0));
        assert_eq!(cached.limits(), Some(LIMITS));
    }

    #[test]
    fn test_begin_refresh_is_claimed_once() {
        let t0 = Instant::now();
        let mut cached = CachedOverride::default();

        assert!(cached.begin_refresh(t0, TTL, TIMEOUT));
        assert!(!cached.begin_refresh(t0, TTL, TIMEOUT));

        // An abandoned claim expires after the fetch timeout.
        assert!(cached.begin_refresh(t0 + Duration::from_secs(1), TTL, TIMEOUT));
    }

    #[test]
    fn test_begin_refresh_skips_fresh_cache() {
        let t0 = Instant::now();
        let mut cached = CachedOverride::default();
        cached.apply(FetchOutcome::Loaded(None), t0);

        assert!(!cached.begin_refresh(t0 + Duration::from_secs(10), TTL, TIMEOUT));
    }

    #[tokio::test]
    async fn test_fetch_loaded() {
        let store = Arc::new(InMemoryOverrideStore::new());
        store.upsert(OverrideRecord::new("acme", 5, 50)).unwrap();
        let cache = cache(store);

        assert_eq!(cache.fetch("acme").await, FetchOutcome::Loaded(Some(LIMITS)));
        assert_eq!(cache.fetch("other").await, FetchOutcome::Loaded(None));
    }

    #[tokio::test]
    async fn test_fetch_error_is_failed() {
        let cache = cache(Arc::new(BrokenStore));
        assert_eq!(cache.fetch("acme").await, FetchOutcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_failed() {
        let cache = cache(Arc::new(SlowStore));
        assert_eq!(cache.fetch("acme").await, FetchOutcome::Failed);
    }
}
