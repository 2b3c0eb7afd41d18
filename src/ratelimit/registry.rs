//! The per-key registry and the two-window admission check.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::backend::AdmissionControl;
use super::bucket::{TimeWindow, TokenBucket};
use super::clock::{Clock, SystemClock};
use super::decision::Decision;
use super::key::RateLimitKey;
use super::overrides::{CachedOverride, FetchOutcome, OverrideCache};
use super::policy::{OverrideLimits, Policy, ResolvedLimits, WindowLimit};
use super::store::OverrideStore;
use crate::config::{EvictionConfig, LimitsConfig, TollgateConfig};

/// Bucket state for one key.
#[derive(Debug)]
struct RegistryEntry {
    minute: TokenBucket,
    hour: TokenBucket,
    /// Created on the first auth-endpoint request for this key
    auth_minute: Option<TokenBucket>,
    overrides: CachedOverride,
    /// Set under the entry lock when the entry leaves the map. A caller
    /// that finds it set looks the key up again.
    removed: bool,
}

impl RegistryEntry {
    fn new(limits: &LimitsConfig, now: Instant) -> Self {
        Self {
            minute: TokenBucket::for_window(limits.requests_per_minute, TimeWindow::Minute, now),
            hour: TokenBucket::for_window(limits.requests_per_hour, TimeWindow::Hour, now),
            auth_minute: None,
            overrides: CachedOverride::default(),
            removed: false,
        }
    }

    /// Most recent time any bucket of this entry was touched.
    fn last_active(&self) -> Instant {
        match &self.auth_minute {
            Some(auth) => self.minute.last_refill().max(auth.last_refill()),
            None => self.minute.last_refill(),
        }
    }

    fn admit(
        &mut self,
        key: &RateLimitKey,
        is_auth_endpoint: bool,
        defaults: &LimitsConfig,
        now: Instant,
        unix_now: u64,
    ) -> Decision {
        let policy = Policy::resolve(self.overrides.limits(), is_auth_endpoint);
        let limits = policy.limits(defaults);

        trace!(key = %key, policy = policy.name(), "Checking rate limit");

        match limits.hour {
            None => self.admit_minute_only(key, limits.minute, now, unix_now),
            Some(hour) => {
                self.sync_capacity(key, &limits);
                self.admit_two_window(key, hour, now, unix_now)
            }
        }
    }

    fn admit_minute_only(
        &mut self,
        key: &RateLimitKey,
        minute: WindowLimit,
        now: Instant,
        unix_now: u64,
    ) -> Decision {
        let bucket = self
            .auth_minute
            .get_or_insert_with(|| TokenBucket::new(minute.capacity, minute.refill_rate, now));
        if bucket.capacity() != minute.capacity {
            bucket.apply_capacity(minute.capacity, minute.refill_rate);
        }

        if !bucket.try_consume(now).is_accepted() {
            debug!(key = %key, limit = minute.capacity, "Auth endpoint rate limit exceeded");
            return Decision::deny(bucket.capacity(), TimeWindow::Minute, unix_now);
        }
        Decision::allow(bucket.capacity(), bucket.remaining(), TimeWindow::Minute, unix_now)
    }

    fn admit_two_window(
        &mut self,
        key: &RateLimitKey,
        hour: WindowLimit,
        now: Instant,
        unix_now: u64,
    ) -> Decision {
        if !self.minute.try_consume(now).is_accepted() {
            debug!(key = %key, limit = self.minute.capacity(), "Minute rate limit exceeded");
            return Decision::deny(self.minute.capacity(), TimeWindow::Minute, unix_now);
        }

        if !self.hour.try_consume(now).is_accepted() {
            // The request is denied overall, so the minute token goes back.
            self.minute.refund();
            debug!(key = %key, limit = hour.capacity, "Hour rate limit exceeded");
            return Decision::deny(self.hour.capacity(), TimeWindow::Hour, unix_now);
        }

        Decision::allow(
            self.minute.capacity(),
            self.minute.remaining(),
            TimeWindow::Minute,
            unix_now,
        )
    }

    /// Bring the standard buckets in line with the resolved capacities.
    ///
    /// The next `try_consume` refills at the new rate.
    fn sync_capacity(&mut self, key: &RateLimitKey, limits: &ResolvedLimits) {
        if self.minute.capacity() != limits.minute.capacity {
            debug!(
                key = %key,
                from = self.minute.capacity(),
                to = limits.minute.capacity,
                "Applying minute capacity"
            );
            self.minute.apply_capacity(limits.minute.capacity, limits.minute.refill_rate);
        }
        if let Some(hour) = limits.hour {
            if self.hour.capacity() != hour.capacity {
                debug!(
                    key = %key,
                    from = self.hour.capacity(),
                    to = hour.capacity,
                    "Applying hour capacity"
                );
                self.hour.apply_capacity(hour.capacity, hour.refill_rate);
            }
        }
    }
}

type SharedEntry = Arc<Mutex<RegistryEntry>>;

/// Read-only copy of one key's state.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
    pub minute_tokens: f64,
    pub minute_capacity: u32,
    pub hour_tokens: f64,
    pub hour_capacity: u32,
    pub auth_tokens: Option<f64>,
    pub override_limits: Option<OverrideLimits>,
}

/// What one eviction sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub idle_removed: usize,
    pub overflow_removed: usize,
    pub remaining: usize,
}

/// Per-key admission state for the whole process.
///
/// Each key's buckets sit behind their own mutex, so checks on different
/// keys never wait on each other and the refill-then-consume sequence for
/// one key is serialized.
pub struct Registry {
    entries: DashMap<RateLimitKey, SharedEntry>,
    limits: LimitsConfig,
    eviction: EvictionConfig,
    overrides: OverrideCache,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries.len())
            .field("limits", &self.limits)
            .field("eviction", &self.eviction)
            .field("overrides", &self.overrides)
            .finish()
    }
}

impl Registry {
    /// Create a registry on the system clock.
    pub fn new(config: &TollgateConfig, store: Arc<dyn OverrideStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a registry on the given clock.
    pub fn with_clock(
        config: &TollgateConfig,
        store: Arc<dyn OverrideStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            limits: config.limits.clone(),
            eviction: config.eviction.clone(),
            overrides: OverrideCache::new(store, &config.overrides),
            clock,
        }
    }

    /// Decide whether a request for `(tenant_id, credential_id)` is admitted.
    ///
    /// The override store is consulted first when the cached override is
    /// stale; that lookup runs without any lock held. The bucket update
    /// itself happens under the key's lock.
    pub async fn check_rate_limit(
        &self,
        tenant_id: &str,
        credential_id: &str,
        is_auth_endpoint: bool,
    ) -> Decision {
        let key = RateLimitKey::new(tenant_id, credential_id);
        let mut refreshed = self.refresh_override(&key).await;

        loop {
            let now = self.clock.now();
            let entry = self.entry(&key, now);
            let mut guard = entry.lock();
            if guard.removed {
                continue;
            }

            if let Some((outcome, started)) = refreshed.take() {
                if guard.overrides.apply(outcome, started) {
                    debug!(
                        key = %key,
                        limits = ?guard.overrides.limits(),
                        "Tenant override changed"
                    );
                }
            }

            return guard.admit(&key, is_auth_endpoint, &self.limits, now, self.clock.unix_now());
        }
    }

    /// Fetch the key's override if the cached copy is stale and no other
    /// request is already fetching it.
    async fn refresh_override(&self, key: &RateLimitKey) -> Option<(FetchOutcome, Instant)> {
        let started = self.clock.now();
        let claimed = {
            let entry = self.entry(key, started);
            let mut guard = entry.lock();
            guard
                .overrides
                .begin_refresh(started, self.overrides.ttl(), self.overrides.fetch_timeout())
        };
        if !claimed {
            return None;
        }

        let outcome = self.overrides.fetch(key.tenant()).await;
        Some((outcome, started))
    }

    /// Look up or lazily create the entry for `key`.
    fn entry(&self, key: &RateLimitKey, now: Instant) -> SharedEntry {
        if let Some(entry) = self.entries.get(key) {
            return entry.value().clone();
        }

        self.entries
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(
                    key = %key,
                    per_minute = self.limits.requests_per_minute,
                    per_hour = self.limits.requests_per_hour,
                    "Creating rate limit entry"
                );
                Arc::new(Mutex::new(RegistryEntry::new(&self.limits, now)))
            })
            .value()
            .clone()
    }

    /// Drop all state for a key, e.g. when its credential is revoked.
    ///
    /// Returns `true` if the key had state.
    pub fn clear_key(&self, tenant_id: &str, credential_id: &str) -> bool {
        let key = RateLimitKey::new(tenant_id, credential_id);
        match self.entries.remove(&key) {
            Some((_, entry)) => {
                entry.lock().removed = true;
                debug!(key = %key, "Cleared rate limit entry");
                true
            }
            None => false,
        }
    }

    /// Remove idle entries, then the least recently active ones if the
    /// registry is still over its size bound.
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now();
        let idle_ttl = self.eviction.idle_ttl();
        let mut stats = SweepStats::default();

        self.entries.retain(|_, entry| {
            let mut guard = entry.lock();
            if now.saturating_duration_since(guard.last_active()) > idle_ttl {
                guard.removed = true;
                stats.idle_removed += 1;
                false
            } else {
                true
            }
        });

        let len = self.entries.len();
        if len > self.eviction.max_entries {
            stats.overflow_removed = self.evict_oldest(len - self.eviction.target_entries());
        }

        stats.remaining = self.entries.len();
        if stats.idle_removed > 0 || stats.overflow_removed > 0 {
            info!(
                idle_removed = stats.idle_removed,
                overflow_removed = stats.overflow_removed,
                remaining = stats.remaining,
                "Evicted rate limit entries"
            );
        } else {
            trace!(remaining = stats.remaining, "Eviction sweep found nothing to remove");
        }
        stats
    }

    /// Remove up to `count` entries, least recently active first.
    ///
    /// An entry that saw traffic after it was picked is left in place.
    fn evict_oldest(&self, count: usize) -> usize {
        let mut candidates: Vec<(RateLimitKey, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().lock().last_active()))
            .collect();
        candidates.sort_by_key(|(_, last_active)| *last_active);

        candidates
            .into_iter()
            .take(count)
            .filter(|(key, seen)| {
                self.entries
                    .remove_if(key, |_, entry| {
                        let mut guard = entry.lock();
                        if guard.last_active() > *seen {
                            return false;
                        }
                        guard.removed = true;
                        true
                    })
                    .is_some()
            })
            .count()
    }

    /// Read-only copy of a key's bucket state.
    pub fn snapshot(&self, tenant_id: &str, credential_id: &str) -> Option<EntrySnapshot> {
        let key = RateLimitKey::new(tenant_id, credential_id);
        let entry = self.entries.get(&key)?.value().clone();
        let guard = entry.lock();
        Some(EntrySnapshot {
            minute_tokens: guard.minute.tokens(),
            minute_capacity: guard.minute.capacity(),
            hour_tokens: guard.hour.tokens(),
            hour_capacity: guard.hour.capacity(),
            auth_tokens: guard.auth_minute.as_ref().map(|b| b.tokens()),
            override_limits: guard.overrides.limits(),
        })
    }

    pub fn contains(&self, tenant_id: &str, credential_id: &str) -> bool {
        self.entries
            .contains_key(&RateLimitKey::new(tenant_id, credential_id))
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn eviction_config(&self) -> &EvictionConfig {
        &self.eviction
    }
}

#[async_trait]
impl AdmissionControl for Registry {
    async fn check_rate_limit(
        &self,
        tenant_id: &str,
        credential_id: &str,
        is_auth_endpoint: bool,
    ) -> Decision {
        Registry::check_rate_limit(self, tenant_id, credential_id, is_auth_endpoint).await
    }

    async fn clear_key(&self, tenant_id: &str, credential_id: &str) -> bool {
        Registry::clear_key(self, tenant_id, credential_id)
    }
}
