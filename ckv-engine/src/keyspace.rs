//! # Keyspace
//!
//! Purpose: Map keys to typed entries with per-key reader/writer locking,
//! TTL tracking, and eviction bookkeeping.
//!
//! ## Design Principles
//! 1. **Per-Key Locks**: Each entry lives behind its own `Arc<RwLock>`;
//!    owned (`*_arc`) guards travel with handler code and release on every
//!    exit path. Deleting a key reclaims its lock with it.
//! 2. **Creation Lock**: A single mutex serializes first insertion so two
//!    writers cannot race a key into existence twice. It is released
//!    before the caller waits on the per-key lock.
//! 3. **No Map-Then-Key Waits**: The outer map guard is dropped before any
//!    per-key lock is taken, so lock acquisition cannot cycle.
//! 4. **Identity Re-Check**: After winning a per-key lock the slot is
//!    verified to still be the mapped one; a slot removed while the caller
//!    was blocked is treated as absent, never mutated as an orphan.
//!
//! Lock order where two internal locks meet: entry guard, entries map,
//! LRU, LFU, TTL index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ckv_common::{now_ms, KvError, KvResult};

use crate::eviction::{EvictionPolicy, LfuCache, LruCache};
use crate::value::Value;

type Slot = Arc<RwLock<Entry>>;
type EntryReadGuard = ArcRwLockReadGuard<RawRwLock, Entry>;
type EntryWriteGuard = ArcRwLockWriteGuard<RawRwLock, Entry>;

/// One keyed record: the typed value and its optional deadline.
///
/// `value` stays `None` between creation and the first `set_value`; such
/// half-born entries read as absent so no other actor observes them.
#[derive(Debug, Default)]
struct Entry {
    value: Option<Value>,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.map_or(false, |deadline| deadline <= now)
    }

    fn is_live(&self, now: i64) -> bool {
        self.value.is_some() && !self.is_expired(now)
    }
}

static UNSET_VALUE: Value = Value::Str(String::new());

/// Exported (key, value, expiry) triple for snapshots, the AOF preamble,
/// and FSM state transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key: String,
    pub value: Value,
    pub expires_at: Option<i64>,
}

/// Keyspace construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct KeyspaceConfig {
    /// Eviction policy applied at the capacity budget.
    pub policy: EvictionPolicy,
    /// Key-count budget; zero means unlimited.
    pub max_keys: usize,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        KeyspaceConfig {
            policy: EvictionPolicy::NoEviction,
            max_keys: 0,
        }
    }
}

/// The key-to-entry map plus TTL index and eviction caches.
pub struct Keyspace {
    entries: RwLock<HashMap<String, Slot, RandomState>>,
    creation: Mutex<()>,
    ttl_index: Mutex<HashMap<String, i64, RandomState>>,
    lru: Mutex<LruCache>,
    lfu: Mutex<LfuCache>,
    policy: EvictionPolicy,
    max_keys: usize,
    state_copy: AtomicBool,
    state_mutation: AtomicBool,
}

impl Keyspace {
    pub fn new(config: KeyspaceConfig) -> Self {
        Keyspace {
            entries: RwLock::new(HashMap::with_hasher(RandomState::new())),
            creation: Mutex::new(()),
            ttl_index: Mutex::new(HashMap::with_hasher(RandomState::new())),
            lru: Mutex::new(LruCache::new()),
            lfu: Mutex::new(LfuCache::new()),
            policy: config.policy,
            max_keys: config.max_keys,
            state_copy: AtomicBool::new(false),
            state_mutation: AtomicBool::new(false),
        }
    }

    /// Number of resident keys; logically expired entries count until
    /// the reaper or an access removes them.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// True when `key` exists and its deadline has not passed.
    pub fn contains_key(&self, key: &str) -> bool {
        match self.slot(key) {
            Some(slot) => slot.read().is_live(now_ms()),
            None => false,
        }
    }

    /// Write-locks `key`, creating an empty entry when absent.
    ///
    /// The creation lock covers only the existence check and insertion;
    /// waiting on the per-key lock happens after it is released. A
    /// logically expired entry is reset in place.
    pub fn create_key(&self, key: &str) -> WriteHandle<'_> {
        loop {
            let (slot, created) = {
                let _creation = self.creation.lock();
                match self.slot(key) {
                    Some(slot) => (slot, false),
                    None => {
                        let fresh: Slot = Arc::new(RwLock::new(Entry::default()));
                        self.entries
                            .write()
                            .insert(key.to_string(), Arc::clone(&fresh));
                        (fresh, true)
                    }
                }
            };
            if created {
                self.enforce_capacity(key);
            }

            let mut guard = slot.write_arc();
            if !self.is_mapped(key, &guard) {
                // The slot was deleted while we waited; start over.
                continue;
            }
            if guard.is_expired(now_ms()) {
                guard.value = None;
                guard.expires_at = None;
                self.ttl_index.lock().remove(key);
            }
            self.record_access(key);
            return WriteHandle {
                keyspace: self,
                key: key.to_string(),
                guard,
            };
        }
    }

    /// Write-locks an existing key; absent or expired keys are `NotFound`.
    pub fn write_key(&self, key: &str) -> KvResult<WriteHandle<'_>> {
        let slot = self
            .slot(key)
            .ok_or_else(|| KvError::NotFound(key.to_string()))?;
        let guard = slot.write_arc();
        if !self.is_mapped(key, &guard) {
            return Err(KvError::NotFound(key.to_string()));
        }
        if guard.is_expired(now_ms()) {
            self.remove_locked(key, guard);
            return Err(KvError::NotFound(key.to_string()));
        }
        if guard.value.is_none() {
            return Err(KvError::NotFound(key.to_string()));
        }
        Ok(WriteHandle {
            keyspace: self,
            key: key.to_string(),
            guard,
        })
    }

    /// Read-locks an existing key; absent or expired keys are `NotFound`.
    pub fn read_key(&self, key: &str) -> KvResult<ReadHandle<'_>> {
        let slot = self
            .slot(key)
            .ok_or_else(|| KvError::NotFound(key.to_string()))?;
        let guard = slot.read_arc();
        {
            let map = self.entries.read();
            match map.get(key) {
                Some(mapped) if Arc::ptr_eq(mapped, ArcRwLockReadGuard::rwlock(&guard)) => {}
                _ => return Err(KvError::NotFound(key.to_string())),
            }
        }
        if guard.is_expired(now_ms()) {
            drop(guard);
            self.remove_if_expired(key, now_ms());
            return Err(KvError::NotFound(key.to_string()));
        }
        if guard.value.is_none() {
            return Err(KvError::NotFound(key.to_string()));
        }
        Ok(ReadHandle {
            keyspace: self,
            key: key.to_string(),
            guard,
        })
    }

    /// Write-locks and removes `key` everywhere. Returns whether a live
    /// entry was removed.
    pub fn delete_key(&self, key: &str) -> bool {
        let Some(slot) = self.slot(key) else {
            return false;
        };
        let guard = slot.write_arc();
        if !self.is_mapped(key, &guard) {
            return false;
        }
        let live = guard.is_live(now_ms());
        self.remove_locked(key, guard);
        live
    }

    /// Deletes `key` if its deadline passed, skipping on lock contention.
    ///
    /// Used by the reaper so a sweep never blocks behind a busy key.
    pub fn remove_if_expired(&self, key: &str, now: i64) -> bool {
        let Some(slot) = self.slot(key) else {
            return false;
        };
        let Some(guard) = slot.try_write_arc() else {
            return false;
        };
        if !self.is_mapped(key, &guard) || !guard.is_expired(now) {
            return false;
        }
        self.remove_locked(key, guard);
        true
    }

    /// One reaper pass: deletes every indexed key whose deadline passed.
    pub fn remove_expired(&self, now: i64) -> usize {
        let due: Vec<String> = self
            .ttl_index
            .lock()
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for key in due {
            if self.remove_if_expired(&key, now) {
                removed += 1;
            }
        }
        removed
    }

    /// Consistent copy of all live (key, value, expiry) triples, sorted by
    /// key. Guarded by `state_copy_in_progress`.
    pub fn export_state(&self) -> KvResult<Vec<KeyRecord>> {
        if self.state_copy.swap(true, Ordering::AcqRel) {
            return Err(KvError::Transient(
                "state copy already in progress".to_string(),
            ));
        }
        let slots: Vec<(String, Slot)> = self
            .entries
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect();

        let now = now_ms();
        let mut records = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            let guard = slot.read();
            if !guard.is_live(now) {
                continue;
            }
            if let Some(value) = &guard.value {
                records.push(KeyRecord {
                    key,
                    value: value.clone(),
                    expires_at: guard.expires_at,
                });
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        self.state_copy.store(false, Ordering::Release);
        Ok(records)
    }

    /// Re-inserts exported records, skipping those already expired at
    /// `now`. Guarded by `state_mutation_in_progress`.
    pub fn import_state(&self, records: Vec<KeyRecord>, now: i64) -> KvResult<usize> {
        if self.state_mutation.swap(true, Ordering::AcqRel) {
            return Err(KvError::Transient(
                "state mutation already in progress".to_string(),
            ));
        }
        let mut imported = 0;
        for record in records {
            if record.expires_at.map_or(false, |deadline| deadline <= now) {
                continue;
            }
            let mut handle = self.create_key(&record.key);
            handle.set_value(record.value);
            handle.set_expiry(record.expires_at, false);
            imported += 1;
        }
        self.state_mutation.store(false, Ordering::Release);
        Ok(imported)
    }

    /// Drops every key, deadline, and cache entry.
    pub fn flush(&self) {
        let _creation = self.creation.lock();
        self.entries.write().clear();
        self.ttl_index.lock().clear();
        self.lru.lock().clear();
        self.lfu.lock().clear();
    }

    fn slot(&self, key: &str) -> Option<Slot> {
        self.entries.read().get(key).cloned()
    }

    /// True when `key` still maps to the slot behind `guard`.
    fn is_mapped(&self, key: &str, guard: &EntryWriteGuard) -> bool {
        self.entries
            .read()
            .get(key)
            .map_or(false, |slot| Arc::ptr_eq(slot, ArcRwLockWriteGuard::rwlock(guard)))
    }

    /// Removes `key` from the map, TTL index, and caches while its write
    /// guard is held, so waiters observe a completed removal.
    fn remove_locked(&self, key: &str, guard: EntryWriteGuard) {
        self.entries.write().remove(key);
        self.lru.lock().remove(key);
        self.lfu.lock().remove(key);
        self.ttl_index.lock().remove(key);
        drop(guard);
    }

    fn record_access(&self, key: &str) {
        if self.policy.uses_lru() {
            self.lru.lock().touch(key);
        } else if self.policy.uses_lfu() {
            self.lfu.lock().touch(key);
        }
    }

    /// Evicts victims until the key count fits the budget. `exclude`
    /// protects the key being created from evicting itself.
    fn enforce_capacity(&self, exclude: &str) {
        if self.max_keys == 0 {
            return;
        }
        while self.len() > self.max_keys {
            if self.policy == EvictionPolicy::NoEviction {
                warn!(
                    keys = self.len(),
                    budget = self.max_keys,
                    "keyspace over budget with noeviction policy"
                );
                return;
            }
            match self.pick_victim(exclude) {
                Some(victim) => {
                    debug!(key = %victim, policy = %self.policy, "evicting key");
                    self.delete_key(&victim);
                }
                None => return,
            }
        }
    }

    fn pick_victim(&self, exclude: &str) -> Option<String> {
        let ttl_keys: Vec<String> = self
            .ttl_index
            .lock()
            .keys()
            .filter(|key| key.as_str() != exclude)
            .cloned()
            .collect();

        match self.policy {
            EvictionPolicy::NoEviction => None,
            EvictionPolicy::AllkeysLru => self.lru.lock().pop_where(|key| key != exclude),
            EvictionPolicy::VolatileLru => self
                .lru
                .lock()
                .pop_where(|key| ttl_keys.iter().any(|k| k == key)),
            EvictionPolicy::AllkeysLfu => self.lfu.lock().pop_where(|key| key != exclude),
            EvictionPolicy::VolatileLfu => self
                .lfu
                .lock()
                .pop_where(|key| ttl_keys.iter().any(|k| k == key)),
            EvictionPolicy::VolatileTtl => self
                .ttl_index
                .lock()
                .iter()
                .filter(|(key, _)| key.as_str() != exclude)
                .min_by_key(|(_, deadline)| **deadline)
                .map(|(key, _)| key.clone()),
            EvictionPolicy::AllkeysRandom => {
                let keys: Vec<String> = self
                    .entries
                    .read()
                    .keys()
                    .filter(|key| key.as_str() != exclude)
                    .cloned()
                    .collect();
                keys.choose(&mut rand::thread_rng()).cloned()
            }
            EvictionPolicy::VolatileRandom => ttl_keys.choose(&mut rand::thread_rng()).cloned(),
        }
    }
}

/// Shared read access to one key's entry.
pub struct ReadHandle<'a> {
    keyspace: &'a Keyspace,
    key: String,
    guard: EntryReadGuard,
}

impl ReadHandle<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The typed value; the access is recorded for eviction.
    pub fn value(&self) -> &Value {
        self.keyspace.record_access(&self.key);
        self.guard.value.as_ref().unwrap_or(&UNSET_VALUE)
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.guard.expires_at
    }
}

/// Exclusive write access to one key's entry.
pub struct WriteHandle<'a> {
    keyspace: &'a Keyspace,
    key: String,
    guard: EntryWriteGuard,
}

impl WriteHandle<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once the entry holds a value; false only for a key this call
    /// just brought into existence.
    pub fn is_set(&self) -> bool {
        self.guard.value.is_some()
    }

    /// The typed value; the access is recorded for eviction.
    pub fn value(&self) -> &Value {
        self.keyspace.record_access(&self.key);
        self.guard.value.as_ref().unwrap_or(&UNSET_VALUE)
    }

    /// Mutable access for in-place collection updates; an unset entry
    /// materializes as the default value.
    pub fn value_mut(&mut self) -> &mut Value {
        self.keyspace.record_access(&self.key);
        self.guard.value.get_or_insert_with(Value::default)
    }

    /// Replaces the typed value.
    pub fn set_value(&mut self, value: Value) {
        self.keyspace.record_access(&self.key);
        self.guard.value = Some(value);
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.guard.expires_at
    }

    /// Sets or clears the absolute deadline. `touch_only` updates the
    /// entry field without re-indexing, for restore paths that rebuild
    /// the index separately.
    pub fn set_expiry(&mut self, deadline: Option<i64>, touch_only: bool) {
        self.guard.expires_at = deadline;
        if touch_only {
            return;
        }
        let mut index = self.keyspace.ttl_index.lock();
        match deadline {
            Some(deadline) => {
                index.insert(self.key.clone(), deadline);
            }
            None => {
                index.remove(&self.key);
            }
        }
    }
}
