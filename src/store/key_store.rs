//! Generic per-key state table with TTL expiry and capacity eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use super::sweeper::Sweeper;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// Default idle time before a key is purged.
const DEFAULT_TTL: Duration = Duration::from_secs(3600);
/// How long a sweep waits for the table lock before giving up until the next tick.
const SWEEP_LOCK_TIMEOUT: Duration = Duration::from_millis(50);
/// Floor for the sweep period so tiny TTLs don't spin the thread.
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

/// Configuration for a [`KeyStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Idle time after which an entry is purged. Zero disables expiry.
    pub ttl: Duration,
    /// Maximum number of resident keys. Zero means unbounded.
    pub max_keys: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_keys: 0,
        }
    }
}

/// Outcome of an [`KeyStore::update`] closure.
#[derive(Debug, Clone, PartialEq)]
pub enum Update<S> {
    /// Leave the stored state as it is.
    Unchanged,
    /// Insert or overwrite the state for the key.
    Set(S),
}

/// A stored state plus the recency bookkeeping the store keeps for it.
struct StoreEntry<S> {
    state: S,
    /// Nanoseconds since the store's origin instant.
    last_access: AtomicU64,
}

impl<S> StoreEntry<S> {
    fn new(state: S, now: u64) -> Self {
        Self {
            state,
            last_access: AtomicU64::new(now),
        }
    }

    /// Concurrent readers may race; recency only ever moves forward.
    fn touch(&self, now: u64) {
        self.last_access.fetch_max(now, Ordering::Relaxed);
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

/// The shared table. The sweeper thread holds its own `Arc` to this.
struct Table<S> {
    entries: RwLock<HashMap<String, StoreEntry<S>>>,
    clock: Arc<dyn Clock>,
    origin: Instant,
    config: StoreConfig,
}

impl<S> Table<S> {
    fn stamp(&self) -> u64 {
        let since = self.clock.now().saturating_duration_since(self.origin);
        u64::try_from(since.as_nanos()).unwrap_or(u64::MAX)
    }

    fn insert_locked(
        &self,
        entries: &mut HashMap<String, StoreEntry<S>>,
        key: &str,
        state: S,
        now: u64,
    ) {
        if let Some(entry) = entries.get_mut(key) {
            entry.state = state;
            let last_access = entry.last_access.get_mut();
            *last_access = (*last_access).max(now);
            return;
        }

        if self.config.max_keys > 0 && entries.len() >= self.config.max_keys {
            Self::evict_oldest(entries);
        }

        entries.insert(key.to_string(), StoreEntry::new(state, now));
    }

    /// Remove the entry with the oldest last access. Ties go to whichever
    /// entry the scan meets first.
    fn evict_oldest(entries: &mut HashMap<String, StoreEntry<S>>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access())
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            entries.remove(&key);
            debug!(key = %key, "Evicted least recently used key");
        }
    }

    fn purge_locked(&self, entries: &mut HashMap<String, StoreEntry<S>>) -> usize {
        let ttl = u64::try_from(self.config.ttl.as_nanos()).unwrap_or(u64::MAX);
        let now = self.stamp();
        let before = entries.len();

        entries.retain(|_, entry| now.saturating_sub(entry.last_access()) <= ttl);

        before - entries.len()
    }

    /// One background sweep. Gives up if the lock is contended.
    fn sweep(&self) {
        let Some(mut entries) = self.entries.try_write_for(SWEEP_LOCK_TIMEOUT) else {
            warn!("Key store sweep skipped: table lock busy, retrying next tick");
            return;
        };

        let removed = self.purge_locked(&mut entries);
        if removed > 0 {
            debug!(removed = removed, remaining = entries.len(), "Purged expired keys");
        } else {
            trace!(resident = entries.len(), "Sweep found no expired keys");
        }
    }
}

/// Thread-safe map from key to per-key state `S`.
///
/// Every access refreshes the key's recency. Entries idle for longer than the
/// configured TTL are removed by a background sweeper that runs every
/// `ttl / 4`. When `max_keys` is set, inserting a new key into a full store
/// first evicts the least recently accessed key.
///
/// The store is generic over the state type, so each algorithm instance owns a
/// store of its own state shape.
pub struct KeyStore<S> {
    table: Arc<Table<S>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<S> std::fmt::Debug for KeyStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("config", &self.table.config)
            .field("len", &self.len())
            .finish()
    }
}

impl<S> KeyStore<S>
where
    S: Send + Sync + 'static,
{
    /// Create a store driven by the system clock.
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store whose recency bookkeeping reads `clock`.
    ///
    /// The sweeper thread itself always ticks on real time; only the expiry
    /// comparison uses `clock`.
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let origin = clock.now();
        let table = Arc::new(Table {
            entries: RwLock::new(HashMap::new()),
            clock,
            origin,
            config,
        });

        let sweeper = if config.ttl.is_zero() {
            None
        } else {
            let period = (config.ttl / 4).max(MIN_SWEEP_PERIOD);
            let worker = Arc::clone(&table);
            Some(Sweeper::spawn("ratewarden-sweeper", period, move || {
                worker.sweep()
            })?)
        };

        info!(
            ttl = ?config.ttl,
            max_keys = config.max_keys,
            "Key store initialized"
        );

        Ok(Self {
            table,
            sweeper: Mutex::new(sweeper),
        })
    }
}

impl<S> KeyStore<S> {
    /// Insert or overwrite the state for `key`.
    pub fn set(&self, key: &str, state: S) {
        let mut entries = self.table.entries.write();
        let now = self.table.stamp();
        self.table.insert_locked(&mut entries, key, state, now);
    }

    /// Atomically read, decide and optionally write the state for `key`.
    ///
    /// `f` receives the current state (refreshing its recency if present) and
    /// returns whether to write plus a value handed back to the caller. The
    /// table's write lock is held throughout, so concurrent updates of one
    /// key are totally ordered.
    pub fn update<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(Option<&S>) -> (Update<S>, R),
    {
        let mut entries = self.table.entries.write();
        let now = self.table.stamp();

        let (update, out) = match entries.get(key) {
            Some(entry) => {
                entry.touch(now);
                f(Some(&entry.state))
            }
            None => f(None),
        };

        if let Update::Set(state) = update {
            self.table.insert_locked(&mut entries, key, state, now);
        }

        out
    }

    /// Remove every entry idle for longer than the TTL, returning how many
    /// were removed. A zero TTL never expires anything.
    pub fn purge_expired(&self) -> usize {
        if self.table.config.ttl.is_zero() {
            return 0;
        }
        let mut entries = self.table.entries.write();
        self.table.purge_locked(&mut entries)
    }

    /// Whether `key` is resident. Does not count as an access.
    pub fn contains_key(&self, key: &str) -> bool {
        self.table.entries.read().contains_key(key)
    }

    /// Number of resident keys.
    pub fn len(&self) -> usize {
        self.table.entries.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured idle expiry.
    pub fn ttl(&self) -> Duration {
        self.table.config.ttl
    }

    /// Configured key bound (zero for unbounded).
    pub fn max_keys(&self) -> usize {
        self.table.config.max_keys
    }

    /// Stop background maintenance. Safe to call more than once.
    pub fn close(&self) {
        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
            info!("Key store maintenance stopped");
        }
    }
}

impl<S: Clone> KeyStore<S> {
    /// Return a copy of the state for `key`, refreshing its recency.
    pub fn get(&self, key: &str) -> Option<S> {
        let entries = self.table.entries.read();
        let now = self.table.stamp();
        entries.get(key).map(|entry| {
            entry.touch(now);
            entry.state.clone()
        })
    }
}

impl<S> Drop for KeyStore<S> {
    fn drop(&mut self) {
        self.close();
    }
}
