//! Keyed reading cache with TTL expiry, stale lookup and LRU eviction.

use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::data_source::TimeWindow;
use crate::error::CacheError;
use crate::{Location, NormalizedReading, ProviderId, UtcDateTime, VariableSet};

const SNAPSHOT_VERSION: u32 = 1;
const DEFAULT_CAPACITY: usize = 1024;

/// Identity of one cached payload.
///
/// The forecast horizon is folded into `kind` (`forecast/7d`) after capping,
/// so requests that cap to the same horizon share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub provider: ProviderId,
    pub location_id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<UtcDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<UtcDateTime>,
    pub variables: String,
}

impl CacheKey {
    pub fn current(provider: ProviderId, location: &Location, variables: VariableSet) -> Self {
        Self::build(provider, location, "current".to_owned(), None, variables)
    }

    pub fn forecast(
        provider: ProviderId,
        location: &Location,
        horizon_days: u16,
        variables: VariableSet,
    ) -> Self {
        Self::build(provider, location, format!("forecast/{horizon_days}d"), None, variables)
    }

    pub fn historical(
        provider: ProviderId,
        location: &Location,
        window: TimeWindow,
        variables: VariableSet,
    ) -> Self {
        Self::build(provider, location, "historical".to_owned(), Some(window), variables)
    }

    fn build(
        provider: ProviderId,
        location: &Location,
        kind: String,
        window: Option<TimeWindow>,
        variables: VariableSet,
    ) -> Self {
        Self {
            provider,
            location_id: location.id().to_owned(),
            kind,
            window_start: window.map(|window| window.start),
            window_end: window.map(|window| window.end),
            variables: variables.hash_token(),
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let bound = |value: Option<UtcDateTime>| {
            value.map_or_else(|| "-".to_owned(), UtcDateTime::format_rfc3339)
        };
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.provider,
            self.location_id,
            self.kind,
            bound(self.window_start),
            bound(self.window_end),
            self.variables
        )
    }
}

/// Immutable cached payload. A refresh replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub readings: Vec<NormalizedReading>,
    pub fetched_at: UtcDateTime,
    #[serde(with = "crate::config::duration_secs")]
    pub ttl: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_horizon_days: Option<u16>,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        readings: Vec<NormalizedReading>,
        fetched_at: UtcDateTime,
        ttl: Duration,
    ) -> Self {
        Self {
            key,
            readings,
            fetched_at,
            ttl,
            served_horizon_days: None,
        }
    }

    pub fn with_served_horizon(mut self, horizon_days: u16) -> Self {
        self.served_horizon_days = Some(horizon_days);
        self
    }

    /// `None` when `fetched_at + ttl` overflows, i.e. the entry never expires.
    pub fn expires_at(&self) -> Option<UtcDateTime> {
        time::Duration::try_from(self.ttl)
            .ok()
            .and_then(|ttl| self.fetched_at.checked_add(ttl))
    }

    pub fn is_fresh_at(&self, now: UtcDateTime) -> bool {
        self.expires_at().map_or(true, |expires_at| now < expires_at)
    }

    pub fn age_at(&self, now: UtcDateTime) -> Duration {
        if now <= self.fetched_at {
            return Duration::ZERO;
        }
        (now - self.fetched_at).unsigned_abs()
    }
}

#[derive(Debug)]
struct Slot {
    entry: Arc<CacheEntry>,
    last_access: AtomicU64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<CacheEntry>,
}

#[derive(Debug)]
struct CacheInner {
    slots: DashMap<CacheKey, Slot>,
    capacity: usize,
    access_tick: AtomicU64,
    clock: Arc<dyn Clock>,
}

/// Thread-safe reading cache shared by the orchestrator.
///
/// Lookups never fetch. Entries are only removed by LRU eviction or
/// [`clear`](CacheStore::clear); an expired entry stays available as stale
/// data until it is replaced.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<CacheInner>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl CacheStore {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                slots: DashMap::new(),
                capacity: capacity.max(1),
                access_tick: AtomicU64::new(0),
                clock,
            }),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, Arc::new(SystemClock))
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn now(&self) -> UtcDateTime {
        self.inner.clock.now()
    }

    /// Returns the entry for `key`, fresh or stale, and marks it recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let slot = self.inner.slots.get(key)?;
        slot.last_access.store(self.next_tick(), Ordering::Relaxed);
        Some(Arc::clone(&slot.entry))
    }

    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.is_fresh_at(self.now())
    }

    /// Stores `readings` under `key`, stamped with the store clock.
    pub fn put(
        &self,
        key: CacheKey,
        readings: Vec<NormalizedReading>,
        ttl: Duration,
    ) -> Arc<CacheEntry> {
        let fetched_at = self.now();
        self.insert(CacheEntry::new(key, readings, fetched_at, ttl))
    }

    /// Stores a prebuilt entry, replacing any previous entry for its key.
    pub fn insert(&self, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        let key = entry.key.clone();
        self.inner.slots.insert(
            key.clone(),
            Slot {
                entry: Arc::clone(&entry),
                last_access: AtomicU64::new(self.next_tick()),
            },
        );
        self.evict_over_capacity(&key);
        entry
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn clear(&self) {
        self.inner.slots.clear();
    }

    /// Writes every entry to `path` as JSON, atomically replacing the file.
    pub fn snapshot_to(&self, path: &Path) -> Result<usize, CacheError> {
        let mut entries: Vec<CacheEntry> = self
            .inner
            .slots
            .iter()
            .map(|slot| CacheEntry::clone(&slot.entry))
            .collect();
        entries.sort_by(|a, b| a.fetched_at.cmp(&b.fetched_at));
        let count = entries.len();

        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(directory)?;
        serde_json::to_writer(
            &mut file,
            &Snapshot {
                version: SNAPSHOT_VERSION,
                entries,
            },
        )?;
        file.flush()?;
        file.persist(path)?;

        tracing::debug!(path = %path.display(), entries = count, "cache snapshot written");
        Ok(count)
    }

    /// Loads entries written by [`snapshot_to`](CacheStore::snapshot_to).
    ///
    /// A missing file restores nothing. Entries keep their original
    /// `fetched_at`, so expired ones come back stale.
    pub fn restore_from(&self, path: &Path) -> Result<usize, CacheError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(error.into()),
        };
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        if snapshot.version != SNAPSHOT_VERSION {
            tracing::warn!(
                version = snapshot.version,
                "ignoring cache snapshot with unknown version"
            );
            return Ok(0);
        }

        let count = snapshot.entries.len();
        for entry in snapshot.entries {
            self.insert(entry);
        }
        tracing::debug!(path = %path.display(), entries = count, "cache snapshot restored");
        Ok(count)
    }

    fn next_tick(&self) -> u64 {
        self.inner.access_tick.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_over_capacity(&self, keep: &CacheKey) {
        let excess = self.inner.slots.len().saturating_sub(self.inner.capacity);
        if excess == 0 {
            return;
        }

        // Collect first; removing while iterating a shard would deadlock.
        let mut candidates: Vec<(u64, UtcDateTime, CacheKey)> = self
            .inner
            .slots
            .iter()
            .filter(|slot| slot.key() != keep)
            .map(|slot| {
                (
                    slot.last_access.load(Ordering::Relaxed),
                    slot.entry.fetched_at,
                    slot.key().clone(),
                )
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        for (_, _, key) in candidates.into_iter().take(excess) {
            if self.inner.slots.remove(&key).is_some() {
                tracing::debug!(key = %key, "evicted least recently used cache entry");
            }
        }
    }
}
