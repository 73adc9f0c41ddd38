//! Decision cache with generation-tagged invalidation and single-flight
//! recomputation
//!
//! Entries are keyed by a BLAKE3 fingerprint of the request and stamped with
//! the per-(tenant, user) and per-tenant generation counters current at
//! compute time. Bumping a generation lazily invalidates every entry carrying
//! the old value without enumerating keys. A short TTL bounds staleness in
//! case a generation-bump event is lost. At most one computation runs per
//! fingerprint at a time; concurrent callers wait on the in-flight one and
//! then re-read the cache.

use crate::error::Result;
use crate::types::{Action, RequestContext, ResourceRef, TenantId, UserId};
use crate::engine::Decision;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub capacity: usize,

    /// Staleness bound for entries whose generations still match
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(30),
        }
    }
}

/// Cache key type (BLAKE3 hash)
pub type Fingerprint = [u8; 32];

/// Deterministic fingerprint of a decision request
///
/// Context attributes are hashed sorted by key with their canonical JSON
/// encoding, so attribute insertion order never changes the fingerprint.
pub fn fingerprint(
    tenant_id: &TenantId,
    user_id: &UserId,
    resource: &ResourceRef,
    action: Action,
    context: &RequestContext,
) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(user_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(resource.canonical().as_bytes());
    hasher.update(&[0]);
    hasher.update(action.as_str().as_bytes());

    let mut attrs: Vec<_> = context.attributes.iter().collect();
    attrs.sort_by_key(|(k, _)| k.as_str());
    for (key, value) in attrs {
        hasher.update(&[0]);
        hasher.update(key.as_bytes());
        hasher.update(&[0]);
        hasher.update(value.to_string().as_bytes());
    }

    *hasher.finalize().as_bytes()
}

/// Cached entry stamped with the generations current at compute time
#[derive(Clone)]
struct CachedEntry {
    decision: Decision,
    user_generation: u64,
    tenant_generation: u64,
    cached_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Generation-tagged decision cache
pub struct DecisionCache {
    entries: DashMap<Fingerprint, CachedEntry>,

    /// Per-(tenant, user) generation counters
    user_generations: DashMap<(TenantId, UserId), u64>,

    /// Per-tenant fallback counters, bumped when affected users cannot be
    /// determined
    tenant_generations: DashMap<TenantId, u64>,

    /// In-flight computation guards, one per fingerprint
    in_flight: DashMap<Fingerprint, Arc<Mutex<()>>>,

    config: CacheConfig,

    stats: DashMap<String, usize>,
}

impl DecisionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            user_generations: DashMap::new(),
            tenant_generations: DashMap::new(),
            in_flight: DashMap::new(),
            config,
            stats: DashMap::new(),
        }
    }

    /// Current generations for a (tenant, user) partition
    fn generations(&self, tenant_id: &TenantId, user_id: &UserId) -> (u64, u64) {
        let user = self
            .user_generations
            .get(&(tenant_id.clone(), user_id.clone()))
            .map(|g| *g)
            .unwrap_or(0);
        let tenant = self
            .tenant_generations
            .get(tenant_id)
            .map(|g| *g)
            .unwrap_or(0);
        (user, tenant)
    }

    /// Look up a live cached decision
    pub fn get(
        &self,
        key: &Fingerprint,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Option<Decision> {
        let Some(entry) = self.entries.get(key) else {
            self.increment_stat("misses");
            return None;
        };

        let (user_gen, tenant_gen) = self.generations(tenant_id, user_id);
        if entry.user_generation != user_gen || entry.tenant_generation != tenant_gen {
            drop(entry);
            self.entries.remove(key);
            self.increment_stat("stale");
            self.increment_stat("misses");
            return None;
        }
        if entry.is_expired(self.config.ttl) {
            drop(entry);
            self.entries.remove(key);
            self.increment_stat("expirations");
            self.increment_stat("misses");
            return None;
        }

        self.increment_stat("hits");
        Some(entry.decision.clone())
    }

    /// Get a cached decision or run `compute`, with at most one concurrent
    /// computation per fingerprint
    ///
    /// Failed computations are never cached; the error propagates to this
    /// caller while waiters fall through to their own attempt.
    pub async fn get_or_compute<F, Fut>(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
        key: Fingerprint,
        compute: F,
    ) -> Result<(Decision, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Decision>>,
    {
        if let Some(decision) = self.get(&key, tenant_id, user_id) {
            return Ok((decision, true));
        }

        let guard = self
            .in_flight
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _lock = guard.lock().await;

        // Another caller may have filled the entry while we waited.
        if let Some(decision) = self.get(&key, tenant_id, user_id) {
            return Ok((decision, true));
        }

        // Generations are read before computing so a bump that lands during
        // the computation marks the stored entry stale.
        let (user_generation, tenant_generation) = self.generations(tenant_id, user_id);

        let result = compute().await;
        self.in_flight.remove(&key);
        let decision = result?;

        if self.entries.len() >= self.config.capacity {
            self.evict();
        }
        self.entries.insert(
            key,
            CachedEntry {
                decision: decision.clone(),
                user_generation,
                tenant_generation,
                cached_at: Instant::now(),
            },
        );

        Ok((decision, false))
    }

    /// Bump the generation for one user, lazily invalidating their entries
    ///
    /// Idempotent in effect: every call moves the generation forward, and any
    /// number of calls leaves the same observable state (no live entries for
    /// the user).
    pub fn invalidate_user(&self, tenant_id: &TenantId, user_id: &UserId) {
        self.user_generations
            .entry((tenant_id.clone(), user_id.clone()))
            .and_modify(|g| *g += 1)
            .or_insert(1);
    }

    /// Bump the tenant-wide generation, invalidating every entry for the
    /// tenant
    pub fn invalidate_tenant(&self, tenant_id: &TenantId) {
        self.tenant_generations
            .entry(tenant_id.clone())
            .and_modify(|g| *g += 1)
            .or_insert(1);
    }

    /// Drop all entries and counters
    pub fn clear(&self) {
        self.entries.clear();
        self.user_generations.clear();
        self.tenant_generations.clear();
        self.stats.clear();
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            stale: self.get_stat("stale"),
            expirations: self.get_stat("expirations"),
            entries: self.entries.len(),
            max_entries: self.config.capacity,
        }
    }

    /// Drop expired entries plus an arbitrary slice, freeing roughly a
    /// tenth of capacity
    fn evict(&self) {
        let to_remove = (self.config.capacity / 10).max(1);
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if removed < to_remove || entry.is_expired(self.config.ttl) {
                removed += 1;
                false
            } else {
                true
            }
        });
    }

    fn increment_stat(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub stale: usize,
    pub expirations: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
