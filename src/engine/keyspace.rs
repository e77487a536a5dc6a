// src/engine/keyspace.rs

//! The keyspace: one owned store split into independently locked shards.
//!
//! A key always hashes to the same shard. A command locks every shard its
//! keys live in, in ascending shard order, before touching any of them, and
//! keeps the locks until it has produced its reply. Two commands that share
//! a key therefore never interleave, and multi-key commands cannot deadlock
//! each other.
//!
//! Liveness is resolved on every access: an entry whose deadline has passed
//! is dropped before the caller sees it (see `crate::expire`).

use std::collections::hash_map::RandomState;
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use rand::seq::IteratorRandom;

use crate::error::CommandError;
use crate::expire;
use crate::types::{Kind, Value};

/// A value plus its optional absolute deadline (unix milliseconds).
#[derive(Debug, Clone)]
pub struct Entry {
    value: Value,
    expire_at: Option<u64>,
}

impl Entry {
    pub fn new(value: Value, expire_at: Option<u64>) -> Self {
        Entry { value, expire_at }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn expire_at(&self) -> Option<u64> {
        self.expire_at
    }

    fn is_expired(&self, now: u64) -> bool {
        expire::is_expired(self.expire_at, now)
    }
}

/// One partition of the keyspace.
#[derive(Debug, Default)]
pub struct Shard {
    entries: HashMap<Bytes, Entry>,
    /// Keys that currently carry a deadline; the active sweep samples from here.
    volatile: HashSet<Bytes>,
    reclaimed: u64,
}

impl Shard {
    /// Drop `key` if its deadline has passed. Returns `true` if it was reclaimed.
    fn reclaim_if_expired(&mut self, key: &[u8], now: u64) -> bool {
        let expired = self.entries.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            self.entries.remove(key);
            self.volatile.remove(key);
            self.reclaimed += 1;
        }
        expired
    }

    fn get(&mut self, key: &[u8], now: u64) -> Option<&Entry> {
        if self.reclaim_if_expired(key, now) {
            return None;
        }
        self.entries.get(key)
    }

    fn get_mut(&mut self, key: &[u8], now: u64) -> Option<&mut Entry> {
        if self.reclaim_if_expired(key, now) {
            return None;
        }
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: Bytes, entry: Entry) {
        if entry.expire_at.is_some() {
            self.volatile.insert(key.clone());
        } else {
            self.volatile.remove(&key);
        }
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &[u8], now: u64) -> Option<Entry> {
        if self.reclaim_if_expired(key, now) {
            return None;
        }
        self.volatile.remove(key);
        self.entries.remove(key)
    }

    fn set_expire_at(&mut self, key: &[u8], expire_at: Option<u64>, now: u64) -> bool {
        let Some(entry) = self.get_mut(key, now) else {
            return false;
        };
        entry.expire_at = expire_at;
        match expire_at {
            Some(_) => {
                self.volatile.insert(Bytes::copy_from_slice(key));
            }
            None => {
                self.volatile.remove(key);
            }
        }
        true
    }

    fn live_len(&self, now: u64) -> usize {
        self.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.volatile.clear();
    }

    /// Check up to `sample` random keys that carry a deadline and reclaim the
    /// expired ones. Returns `(sampled, reclaimed)`.
    fn sweep(&mut self, now: u64, sample: usize) -> (usize, usize) {
        let candidates: Vec<Bytes> = self
            .volatile
            .iter()
            .cloned()
            .choose_multiple(&mut rand::rng(), sample);
        let sampled = candidates.len();
        let reclaimed = candidates
            .iter()
            .filter(|key| self.reclaim_if_expired(key, now))
            .count();
        (sampled, reclaimed)
    }
}

/// The whole store: `shard_count` shards selected by key hash.
#[derive(Debug)]
pub struct Keyspace {
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
}

/// Upper bound on consecutive sweep rounds spent on one shard per tick.
const MAX_SWEEP_ROUNDS: usize = 16;

impl Keyspace {
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        Keyspace {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard_index(&self, key: &[u8]) -> usize {
        (self.hasher.hash_one(key) % self.shards.len() as u64) as usize
    }

    /// Lock the shards owning `keys`, in ascending shard order.
    pub fn lock<K: AsRef<[u8]>>(&self, keys: &[K]) -> KeyLocks<'_> {
        let mut indices: Vec<usize> = keys.iter().map(|k| self.shard_index(k.as_ref())).collect();
        indices.sort_unstable();
        indices.dedup();
        self.lock_indices(indices)
    }

    /// Lock every shard, for whole-keyspace commands.
    pub fn lock_all(&self) -> KeyLocks<'_> {
        self.lock_indices((0..self.shards.len()).collect())
    }

    fn lock_indices(&self, indices: Vec<usize>) -> KeyLocks<'_> {
        let guards = indices.iter().map(|&i| self.shards[i].lock()).collect();
        KeyLocks {
            keyspace: self,
            indices,
            guards,
            now: expire::now_ms(),
        }
    }

    /// One active-expiry pass over all shards. Each shard is locked on its
    /// own, so a pass never holds more than one shard lock at a time.
    pub fn sweep_expired(&self, sample: usize) -> usize {
        let mut total = 0;
        for shard in self.shards.iter() {
            for _ in 0..MAX_SWEEP_ROUNDS {
                let (sampled, reclaimed) = shard.lock().sweep(expire::now_ms(), sample);
                total += reclaimed;
                // Keep going only while the sample was mostly stale.
                if sampled == 0 || reclaimed * 4 <= sampled {
                    break;
                }
            }
        }
        total
    }

    /// Number of entries reclaimed by expiry since start, lazy and active.
    pub fn expired_total(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().reclaimed).sum()
    }

    pub fn len(&self) -> usize {
        self.lock_all().key_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shard guards held by one running command.
///
/// Every accessor resolves expiry against the instant the locks were taken,
/// so a command observes one consistent point in time.
pub struct KeyLocks<'a> {
    keyspace: &'a Keyspace,
    indices: Vec<usize>,
    guards: Vec<MutexGuard<'a, Shard>>,
    now: u64,
}

impl KeyLocks<'_> {
    pub fn now(&self) -> u64 {
        self.now
    }

    fn shard(&mut self, key: &[u8]) -> &mut Shard {
        let index = self.keyspace.shard_index(key);
        let slot = self
            .indices
            .binary_search(&index)
            .expect("command touched a key outside its locked shards");
        &mut self.guards[slot]
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&Entry> {
        let now = self.now;
        self.shard(key).get(key, now)
    }

    pub fn value(&mut self, key: &[u8]) -> Option<&Value> {
        self.get(key).map(Entry::value)
    }

    pub fn value_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        let now = self.now;
        self.shard(key).get_mut(key, now).map(|e| &mut e.value)
    }

    /// The live value at `key`, inserting `make()` without a deadline first if absent.
    pub fn value_or_insert_with(&mut self, key: &[u8], make: impl FnOnce() -> Value) -> &mut Value {
        let now = self.now;
        let shard = self.shard(key);
        shard.reclaim_if_expired(key, now);
        &mut shard
            .entries
            .entry(Bytes::copy_from_slice(key))
            .or_insert_with(|| Entry::new(make(), None))
            .value
    }

    pub fn kind(&mut self, key: &[u8]) -> Option<Kind> {
        self.value(key).map(Value::kind)
    }

    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Overwrite `key` unconditionally with the given deadline.
    pub fn set(&mut self, key: &[u8], value: Value, expire_at: Option<u64>) {
        self.insert_entry(key, Entry::new(value, expire_at));
    }

    /// Replace the value at `key`, carrying a live key's deadline forward.
    pub fn put(&mut self, key: &[u8], value: Value) {
        let expire_at = self.get(key).and_then(Entry::expire_at);
        self.set(key, value, expire_at);
    }

    pub fn insert_entry(&mut self, key: &[u8], entry: Entry) {
        self.shard(key).insert(Bytes::copy_from_slice(key), entry);
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let now = self.now;
        self.shard(key).remove(key, now)
    }

    /// Delete `key` if a removal left its collection empty.
    pub fn remove_if_empty(&mut self, key: &[u8]) {
        if self.value(key).is_some_and(Value::is_empty_collection) {
            self.remove(key);
        }
    }

    /// Replace the deadline of a live key; `false` if the key is absent.
    pub fn set_expire_at(&mut self, key: &[u8], expire_at: Option<u64>) -> bool {
        let now = self.now;
        self.shard(key).set_expire_at(key, expire_at, now)
    }

    /// Live keys across the locked shards.
    pub fn key_count(&self) -> usize {
        self.guards.iter().map(|g| g.live_len(self.now)).sum()
    }

    pub fn clear(&mut self) {
        for guard in self.guards.iter_mut() {
            guard.clear();
        }
    }

    /// DEL: number of keys that were live right before removal.
    pub fn del(&mut self, keys: &[Bytes]) -> usize {
        keys.iter().filter(|k| self.remove(k).is_some()).count()
    }

    /// EXISTS: every occurrence is checked on its own, duplicates included.
    pub fn exists(&mut self, keys: &[Bytes]) -> usize {
        keys.iter().filter(|k| self.contains(k)).count()
    }

    /// RENAME: move value and deadline from `src` to `dst`, overwriting `dst`.
    pub fn rename(&mut self, src: &[u8], dst: &[u8]) -> Result<(), CommandError> {
        if !self.contains(src) {
            return Err(CommandError::NoSuchKey);
        }
        if src == dst {
            return Ok(());
        }
        if let Some(entry) = self.remove(src) {
            self.insert_entry(dst, entry);
        }
        Ok(())
    }

    /// RENAMENX: like `rename` but only when `dst` is absent. A self-rename
    /// counts as "destination exists".
    pub fn rename_nx(&mut self, src: &[u8], dst: &[u8]) -> Result<bool, CommandError> {
        if !self.contains(src) {
            return Err(CommandError::NoSuchKey);
        }
        if src == dst || self.contains(dst) {
            return Ok(false);
        }
        self.rename(src, dst)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Value {
        Value::String(Bytes::copy_from_slice(text.as_bytes()))
    }

    fn string_at(locks: &mut KeyLocks<'_>, key: &[u8]) -> Option<Bytes> {
        locks.value(key).and_then(|v| v.as_string().ok().cloned())
    }

    #[test]
    fn set_get_del_roundtrip() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["a", "b"]);
        locks.set(b"a", s("1"), None);
        assert_eq!(string_at(&mut locks, b"a").as_deref(), Some(&b"1"[..]));
        assert_eq!(locks.del(&[Bytes::from_static(b"a"), Bytes::from_static(b"a"), Bytes::from_static(b"b")]), 1);
        assert_eq!(locks.del(&[Bytes::from_static(b"a")]), 0);
    }

    #[test]
    fn exists_counts_duplicates() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["k", "missing"]);
        locks.set(b"k", s("v"), None);
        let keys = [
            Bytes::from_static(b"k"),
            Bytes::from_static(b"k"),
            Bytes::from_static(b"missing"),
        ];
        assert_eq!(locks.exists(&keys), 2);
    }

    #[test]
    fn expired_entries_are_invisible_and_reclaimed() {
        let ks = Keyspace::new(2);
        let mut locks = ks.lock(&["gone"]);
        let past = locks.now() - 1;
        locks.set(b"gone", s("v"), Some(past));
        assert!(locks.get(b"gone").is_none());
        assert_eq!(locks.key_count(), 0);
        drop(locks);
        assert_eq!(ks.expired_total(), 1);
    }

    #[test]
    fn put_carries_deadline_forward_and_set_clears_it() {
        let ks = Keyspace::new(2);
        let mut locks = ks.lock(&["k"]);
        let later = locks.now() + 60_000;
        locks.set(b"k", s("1"), Some(later));
        locks.put(b"k", s("2"));
        assert_eq!(locks.get(b"k").and_then(Entry::expire_at), Some(later));
        locks.set(b"k", s("3"), None);
        assert_eq!(locks.get(b"k").and_then(Entry::expire_at), None);
    }

    #[test]
    fn rename_moves_value_and_ttl() {
        let ks = Keyspace::new(8);
        let mut locks = ks.lock(&["src", "dst"]);
        assert_eq!(locks.rename(b"src", b"dst"), Err(CommandError::NoSuchKey));
        let later = locks.now() + 10_000;
        locks.set(b"src", s("v"), Some(later));
        locks.set(b"dst", s("old"), None);
        locks.rename(b"src", b"dst").unwrap();
        assert!(!locks.contains(b"src"));
        assert_eq!(locks.get(b"dst").and_then(Entry::expire_at), Some(later));
        assert_eq!(string_at(&mut locks, b"dst").as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn renamenx_self_is_a_noop_failure() {
        let ks = Keyspace::new(8);
        let mut locks = ks.lock(&["old", "new"]);
        locks.set(b"old", s("v"), None);
        assert_eq!(locks.rename_nx(b"old", b"old"), Ok(false));
        assert_eq!(string_at(&mut locks, b"old").as_deref(), Some(&b"v"[..]));
        assert_eq!(locks.rename_nx(b"old", b"new"), Ok(true));
        assert!(!locks.contains(b"old"));
    }

    #[test]
    fn sweep_reclaims_only_expired_keys() {
        let ks = Keyspace::new(1);
        {
            let mut locks = ks.lock_all();
            let now = locks.now();
            for i in 0..50 {
                let key = format!("dead:{i}");
                locks.set(key.as_bytes(), s("x"), Some(now - 1));
            }
            locks.set(b"alive", s("x"), Some(now + 60_000));
            locks.set(b"forever", s("x"), None);
        }
        let reclaimed = ks.sweep_expired(20);
        assert!(reclaimed > 0);
        // Sweeping repeatedly drains every stale key.
        while ks.sweep_expired(20) > 0 {}
        assert_eq!(ks.expired_total(), 50);
        assert_eq!(ks.len(), 2);
    }
}
