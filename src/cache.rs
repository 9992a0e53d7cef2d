//! Parameter value cache.
//!
//! Keyed by fully-qualified parameter name, with a TTL and an eviction
//! priority of `access_count + (now - created_at) / 60s` — lower priority
//! evicts first. Entries are small, so a single coarse `std::sync::Mutex`
//! guards the whole table rather than a sharded map.
//!
//! An open-chained hash table with entries linked in a bucket is expressed
//! the idiomatic-Rust way: a fixed number of buckets, each a `Vec<Entry>`,
//! rather than a literal intrusive linked list.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::codec::{TypedValue, WireType};

const BUCKET_COUNT: usize = 64;

/// A single cached parameter value.
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    value: TypedValue,
    created_at: Instant,
    access_count: u64,
}

impl Entry {
    fn priority(&self, now: Instant) -> u64 {
        let age_minutes = now.saturating_duration_since(self.created_at).as_secs() / 60;
        self.access_count.saturating_add(age_minutes)
    }
}

struct Table {
    buckets: Vec<Vec<Entry>>,
    len: usize,
}

impl Table {
    fn new() -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    fn bucket_index(name: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation, reason = "bucket index is small and modulo-bound")]
        let index = (hasher.finish() % BUCKET_COUNT as u64) as usize;
        index
    }
}

/// Cache statistics, reported when `enable_stats` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cache lookups that found a live, unexpired entry.
    pub hits: u64,
    /// Cache lookups that found no entry or an expired one.
    pub misses: u64,
    /// Entries removed by TTL expiry (via `expire_sweep` or lazily on read).
    pub expirations: u64,
    /// Entries removed to make room under `max_entries`.
    pub evictions: u64,
}

/// The parameter value cache.
pub struct ParameterCache {
    table: Mutex<Table>,
    stats: Mutex<CacheStats>,
    max_entries: usize,
    default_ttl: Duration,
    enable_stats: bool,
}

impl ParameterCache {
    /// Build a cache bounded to `max_entries` live entries, with entries
    /// expiring `default_ttl` after creation unless refreshed by a new
    /// `put`.
    #[must_use]
    pub fn new(max_entries: usize, default_ttl: Duration, enable_stats: bool) -> Self {
        Self {
            table: Mutex::new(Table::new()),
            stats: Mutex::new(CacheStats::default()),
            max_entries,
            default_ttl,
            enable_stats,
        }
    }

    /// Look up `name`. Returns `None` on a miss or an expired entry (which is
    /// evicted lazily as a side effect); otherwise bumps the entry's access
    /// count and returns its value.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned by a prior panic in another
    /// thread while holding the lock.
    #[must_use]
    #[allow(clippy::missing_panics_doc, reason = "poisoning panic is an invariant violation, not a documented API contract")]
    pub fn get(&self, name: &str) -> Option<TypedValue> {
        let now = Instant::now();
        let index = Table::bucket_index(name);
        let mut table = self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let bucket = &mut table.buckets[index];
        let Some(position) = bucket.iter().position(|entry| entry.name == name) else {
            self.record_miss();
            return None;
        };
        if now.saturating_duration_since(bucket[position].created_at) >= self.default_ttl {
            bucket.remove(position);
            table.len = table.len.saturating_sub(1);
            drop(table);
            self.record_expiration();
            self.record_miss();
            return None;
        }
        bucket[position].access_count = bucket[position].access_count.saturating_add(1);
        let value = bucket[position].value.clone();
        drop(table);
        self.record_hit();
        Some(value)
    }

    /// Insert or refresh `name`'s cached value, resetting its age and access
    /// count. If the cache is already at `max_entries` and `name` is not
    /// already present, evicts `⌈max_entries / 10⌉` lowest-priority entries
    /// first.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned by a prior panic in another
    /// thread while holding the lock.
    #[allow(clippy::missing_panics_doc, reason = "poisoning panic is an invariant violation, not a documented API contract")]
    pub fn put(&self, name: &str, value: TypedValue) {
        let now = Instant::now();
        let index = Table::bucket_index(name);
        let mut table = self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let bucket = &mut table.buckets[index];
        if let Some(position) = bucket.iter().position(|entry| entry.name == name) {
            bucket[position] = Entry {
                name: name.to_owned(),
                value,
                created_at: now,
                access_count: 0,
            };
            return;
        }
        if table.len >= self.max_entries {
            let batch = self.eviction_batch_size();
            let evicted = Self::evict_batch(&mut table, now, batch);
            drop(table);
            self.record_evictions(evicted);
            table = self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        table.buckets[index].push(Entry {
            name: name.to_owned(),
            value,
            created_at: now,
            access_count: 0,
        });
        table.len = table.len.saturating_add(1);
    }

    /// Remove `name` from the cache, if present.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned by a prior panic in another
    /// thread while holding the lock.
    #[allow(clippy::missing_panics_doc, reason = "poisoning panic is an invariant violation, not a documented API contract")]
    pub fn invalidate(&self, name: &str) {
        let index = Table::bucket_index(name);
        let mut table = self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let bucket = &mut table.buckets[index];
        if let Some(position) = bucket.iter().position(|entry| entry.name == name) {
            bucket.remove(position);
            table.len = table.len.saturating_sub(1);
        }
    }

    /// Remove every cached entry whose name starts with `prefix`.
    ///
    /// Used when a group wildcard is written through, or a table is
    /// replaced, and the cache cannot know which individual children are
    /// now stale.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned by a prior panic in another
    /// thread while holding the lock.
    #[allow(clippy::missing_panics_doc, reason = "poisoning panic is an invariant violation, not a documented API contract")]
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut table = self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut removed = 0usize;
        for bucket in &mut table.buckets {
            let before = bucket.len();
            bucket.retain(|entry| !entry.name.starts_with(prefix));
            removed += before - bucket.len();
        }
        table.len = table.len.saturating_sub(removed);
    }

    /// Remove every entry whose TTL has elapsed. Intended to run on a
    /// periodic timer at `cleanup_interval_seconds`; `get`
    /// also expires lazily so this is a housekeeping pass, not a
    /// correctness requirement.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned by a prior panic in another
    /// thread while holding the lock.
    #[allow(clippy::missing_panics_doc, reason = "poisoning panic is an invariant violation, not a documented API contract")]
    pub fn expire_sweep(&self) {
        let now = Instant::now();
        let mut table = self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let ttl = self.default_ttl;
        let mut removed = 0usize;
        for bucket in &mut table.buckets {
            let before = bucket.len();
            bucket.retain(|entry| now.saturating_duration_since(entry.created_at) < ttl);
            removed += before - bucket.len();
        }
        table.len = table.len.saturating_sub(removed);
        drop(table);
        if removed > 0 {
            let mut stats = self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            stats.expirations = stats.expirations.saturating_add(removed as u64);
        }
    }

    /// Current cache statistics. Always tracked internally; `enable_stats`
    /// from configuration only gates whether callers choose to surface them.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether this cache was configured to have its statistics surfaced.
    #[must_use]
    pub const fn stats_enabled(&self) -> bool {
        self.enable_stats
    }

    /// Number of entries to evict on an at-capacity insert: `⌈max_entries / 10⌉`.
    fn eviction_batch_size(&self) -> usize {
        self.max_entries.div_ceil(10).max(1)
    }

    /// Evict up to `count` entries in ascending priority order (lowest
    /// priority, i.e. least valuable, evicts first). Ties break by iteration
    /// order, which is deterministic given a fixed snapshot of the table.
    fn evict_batch(table: &mut Table, now: Instant, count: usize) -> usize {
        let mut evicted = 0usize;
        for _ in 0..count {
            let mut lowest: Option<(usize, usize, u64)> = None;
            for (bucket_index, bucket) in table.buckets.iter().enumerate() {
                for (entry_index, entry) in bucket.iter().enumerate() {
                    let priority = entry.priority(now);
                    let replace = lowest.is_none_or(|(_, _, current)| priority < current);
                    if replace {
                        lowest = Some((bucket_index, entry_index, priority));
                    }
                }
            }
            let Some((bucket_index, entry_index, _)) = lowest else {
                break;
            };
            table.buckets[bucket_index].remove(entry_index);
            table.len = table.len.saturating_sub(1);
            evicted += 1;
        }
        evicted
    }

    fn record_hit(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        stats.hits = stats.hits.saturating_add(1);
    }

    fn record_miss(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        stats.misses = stats.misses.saturating_add(1);
    }

    fn record_expiration(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        stats.expirations = stats.expirations.saturating_add(1);
    }

    fn record_evictions(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut stats = self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        stats.evictions = stats.evictions.saturating_add(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use super::*;

    fn value(rendering: &str) -> TypedValue {
        TypedValue {
            rendering: rendering.to_owned(),
            wire_type: WireType::String,
        }
    }

    #[test]
    fn miss_then_hit() {
        let cache = ParameterCache::new(8, Duration::from_secs(60), true);
        assert!(cache.get("Device.Name").is_none());
        cache.put("Device.Name", value("gateway-1"));
        assert_eq!(cache.get("Device.Name").expect("hit"), value("gateway-1"));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn entry_expires_after_ttl() {
        let cache = ParameterCache::new(8, Duration::from_millis(10), true);
        cache.put("Device.Name", value("gateway-1"));
        sleep(Duration::from_millis(20));
        assert!(cache.get("Device.Name").is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn invalidate_prefix_removes_matching_entries_only() {
        let cache = ParameterCache::new(8, Duration::from_secs(60), true);
        cache.put("Device.WiFi.Radio.1.Channel", value("6"));
        cache.put("Device.WiFi.Radio.2.Channel", value("11"));
        cache.put("Device.Name", value("gateway-1"));
        cache.invalidate_prefix("Device.WiFi.Radio.");
        assert!(cache.get("Device.WiFi.Radio.1.Channel").is_none());
        assert!(cache.get("Device.WiFi.Radio.2.Channel").is_none());
        assert_eq!(cache.get("Device.Name").expect("unrelated entry survives"), value("gateway-1"));
    }

    #[test]
    fn eviction_removes_ceil_one_tenth_of_max_entries_at_capacity() {
        let cache = ParameterCache::new(10, Duration::from_secs(60), true);
        for i in 0..10 {
            cache.put(&format!("k{i}"), value(&i.to_string()));
        }
        cache.put("k10", value("10"));
        // ceil(10/10) = 1 entry evicted to make room for the 11th insert.
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.get("k10").is_some());
    }

    #[test]
    fn expire_sweep_removes_stale_entries_without_a_read() {
        let cache = ParameterCache::new(8, Duration::from_millis(10), true);
        cache.put("Device.Name", value("gateway-1"));
        sleep(Duration::from_millis(20));
        cache.expire_sweep();
        assert_eq!(cache.stats().expirations, 1);
    }
}
