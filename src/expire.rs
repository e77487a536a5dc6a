// src/expire.rs

//! Expiration manager.
//!
//! - Lazy: every keyspace access calls `is_expired` and drops stale entries
//!   before the command sees them.
//! - Active: `start_cleaner` runs in the background and samples keys that
//!   carry a deadline, so memory is reclaimed even when nobody reads them.
//!
//! Deadlines are absolute unix milliseconds.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::time::{Duration, interval};
use tracing::debug;

use crate::engine::keyspace::{KeyLocks, Keyspace};
use crate::error::CommandError;

/// Current unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A key with a deadline at or before `now` is dead.
pub fn is_expired(expire_at: Option<u64>, now: u64) -> bool {
    expire_at.is_some_and(|at| at <= now)
}

/// A requested expiry, relative or absolute, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    In(i64),
    At(i64),
}

impl Expiry {
    /// Absolute deadline for a command running at `now`. May lie in the past.
    pub fn deadline(self, now: u64, command: &str) -> Result<i64, CommandError> {
        match self {
            Expiry::In(ms) => (now as i64)
                .checked_add(ms)
                .ok_or_else(|| CommandError::InvalidExpireTime(command.to_string())),
            Expiry::At(ms) => Ok(ms),
        }
    }
}

/// Unit in which TTL is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlUnit {
    Seconds,
    Millis,
}

/// EXPIRE / PEXPIRE / EXPIREAT / PEXPIREAT.
///
/// Returns `false` if the key does not exist. A deadline that is already due
/// deletes the key right away; that still counts as success.
pub fn expire(
    locks: &mut KeyLocks<'_>,
    key: &Bytes,
    when: Expiry,
    command: &str,
) -> Result<bool, CommandError> {
    let deadline = when.deadline(locks.now(), command)?;
    if !locks.contains(key) {
        return Ok(false);
    }
    if deadline <= locks.now() as i64 {
        locks.remove(key);
    } else {
        locks.set_expire_at(key, Some(deadline as u64));
    }
    Ok(true)
}

/// TTL / PTTL: `-2` if absent, `-1` without a deadline, otherwise the
/// remaining time (seconds are rounded to nearest).
pub fn ttl(locks: &mut KeyLocks<'_>, key: &Bytes, unit: TtlUnit) -> i64 {
    let now = locks.now();
    match locks.get(key) {
        None => -2,
        Some(entry) => match entry.expire_at() {
            None => -1,
            Some(at) => {
                let left = at.saturating_sub(now) as i64;
                match unit {
                    TtlUnit::Millis => left,
                    TtlUnit::Seconds => (left + 500) / 1000,
                }
            }
        },
    }
}

/// PERSIST: `true` only if a deadline was actually removed.
pub fn persist(locks: &mut KeyLocks<'_>, key: &Bytes) -> bool {
    let had_deadline = locks.get(key).is_some_and(|e| e.expire_at().is_some());
    if had_deadline {
        locks.set_expire_at(key, None);
    }
    had_deadline
}

/// Background active-expiry task. Never returns.
pub async fn start_cleaner(keyspace: Arc<Keyspace>, interval_ms: u64, sample: usize) {
    let mut iv = interval(Duration::from_millis(interval_ms.max(1)));
    loop {
        iv.tick().await;
        let reclaimed = keyspace.sweep_expired(sample);
        if reclaimed > 0 {
            debug!(reclaimed, "active expiry sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use std::thread::sleep;

    fn key(k: &str) -> Bytes {
        Bytes::copy_from_slice(k.as_bytes())
    }

    fn seed(ks: &Keyspace, k: &str) {
        ks.lock(&[k]).set(k.as_bytes(), Value::String(key("v")), None);
    }

    #[test]
    fn test_expire_and_ttl() {
        let ks = Keyspace::new(4);
        seed(&ks, "k");

        let mut locks = ks.lock(&["k"]);
        assert_eq!(expire(&mut locks, &key("k"), Expiry::In(1_000), "expire"), Ok(true));
        let t1 = ttl(&mut locks, &key("k"), TtlUnit::Seconds);
        assert!((0..=1).contains(&t1));
        drop(locks);

        sleep(std::time::Duration::from_millis(1200));
        let mut locks = ks.lock(&["k"]);
        assert_eq!(ttl(&mut locks, &key("k"), TtlUnit::Seconds), -2);
        assert!(locks.get(b"k").is_none());
    }

    #[test]
    fn missing_keys_and_plain_keys() {
        let ks = Keyspace::new(4);
        seed(&ks, "plain");
        let mut locks = ks.lock(&["plain", "nope"]);
        assert_eq!(ttl(&mut locks, &key("nope"), TtlUnit::Millis), -2);
        assert_eq!(ttl(&mut locks, &key("plain"), TtlUnit::Millis), -1);
        assert_eq!(expire(&mut locks, &key("nope"), Expiry::In(10), "pexpire"), Ok(false));
        assert!(!persist(&mut locks, &key("plain")));
    }

    #[test]
    fn past_deadline_deletes_but_reports_success() {
        let ks = Keyspace::new(4);
        seed(&ks, "k");
        let mut locks = ks.lock(&["k"]);
        assert_eq!(expire(&mut locks, &key("k"), Expiry::At(1), "pexpireat"), Ok(true));
        assert!(!locks.contains(b"k"));
    }

    #[test]
    fn persist_clears_deadline_once() {
        let ks = Keyspace::new(4);
        seed(&ks, "k");
        let mut locks = ks.lock(&["k"]);
        expire(&mut locks, &key("k"), Expiry::In(60_000), "expire").unwrap();
        assert!(persist(&mut locks, &key("k")));
        assert!(!persist(&mut locks, &key("k")));
        assert_eq!(ttl(&mut locks, &key("k"), TtlUnit::Seconds), -1);
    }

    #[test]
    fn overflowing_relative_expiry_is_rejected() {
        let ks = Keyspace::new(1);
        seed(&ks, "k");
        let mut locks = ks.lock(&["k"]);
        assert_eq!(
            expire(&mut locks, &key("k"), Expiry::In(i64::MAX), "pexpire"),
            Err(CommandError::InvalidExpireTime("pexpire".into()))
        );
        assert_eq!(ttl(&mut locks, &key("k"), TtlUnit::Millis), -1);
    }

    #[tokio::test]
    async fn cleaner_reclaims_without_reads() {
        let ks = Arc::new(Keyspace::new(2));
        {
            let mut locks = ks.lock_all();
            let soon = locks.now() + 20;
            for i in 0..10 {
                let k = format!("tmp:{i}");
                locks.set(k.as_bytes(), Value::String(key("v")), Some(soon));
            }
        }
        let task = tokio::spawn(start_cleaner(ks.clone(), 10, 20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        task.abort();
        assert_eq!(ks.expired_total(), 10);
        assert!(ks.is_empty());
    }
}
