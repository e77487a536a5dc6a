// src/types/set.rs

//! # Set Type Support
//!
//! An unordered collection of distinct byte-string members backed by a
//! `HashSet<Bytes>`. Random selection (SPOP, SRANDMEMBER) samples with
//! `rand::seq::IteratorRandom`. A set that becomes empty is removed.
//!
//! Supported commands:
//! - `SADD`, `SREM`, `SCARD`, `SISMEMBER`, `SMEMBERS`
//! - `SMOVE`
//! - `SPOP`, `SRANDMEMBER`
//! - `SDIFF`, `SINTER`, `SUNION`

use std::collections::HashSet;

use bytes::Bytes;
use rand::seq::{IndexedRandom, IteratorRandom};

use crate::engine::keyspace::KeyLocks;
use crate::error::CommandError;
use crate::types::Value;

/// Largest `|count|` accepted by SRANDMEMBER with a negative count.
pub const MAX_RANDOM_SAMPLES: u64 = 1 << 20;

/// Which combination SDIFF / SINTER / SUNION computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Diff,
    Inter,
    Union,
}

fn set_at<'a>(locks: &'a mut KeyLocks<'_>, key: &[u8]) -> Result<Option<&'a HashSet<Bytes>>, CommandError> {
    locks.value(key).map(Value::as_set).transpose()
}

fn set_mut<'a>(locks: &'a mut KeyLocks<'_>, key: &[u8]) -> Result<Option<&'a mut HashSet<Bytes>>, CommandError> {
    locks.value_mut(key).map(Value::as_set_mut).transpose()
}

/// Execute the SADD command.
///
/// # Returns
///
/// The number of members that were not already present.
///
/// # Errors
///
/// `WrongType` if `key` holds another type; nothing is created in that case.
pub fn sadd(locks: &mut KeyLocks<'_>, key: &[u8], members: &[Bytes]) -> Result<usize, CommandError> {
    set_at(locks, key)?;
    let set = locks
        .value_or_insert_with(key, || Value::Set(HashSet::new()))
        .as_set_mut()?;
    Ok(members.iter().filter(|m| set.insert((*m).clone())).count())
}

/// Execute the SREM command.
///
/// # Returns
///
/// The number of members actually removed. Removing the last member deletes the key.
pub fn srem(locks: &mut KeyLocks<'_>, key: &[u8], members: &[Bytes]) -> Result<usize, CommandError> {
    let Some(set) = set_mut(locks, key)? else {
        return Ok(0);
    };
    let removed = members.iter().filter(|m| set.remove(*m)).count();
    locks.remove_if_empty(key);
    Ok(removed)
}

/// SCARD key
pub fn scard(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<usize, CommandError> {
    Ok(set_at(locks, key)?.map_or(0, HashSet::len))
}

/// SISMEMBER key member
pub fn sismember(locks: &mut KeyLocks<'_>, key: &[u8], member: &[u8]) -> Result<bool, CommandError> {
    Ok(set_at(locks, key)?.is_some_and(|s| s.contains(member)))
}

/// SMEMBERS key
pub fn smembers(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<Vec<Bytes>, CommandError> {
    Ok(set_at(locks, key)?.map(|s| s.iter().cloned().collect()).unwrap_or_default())
}

/// Execute the SMOVE command.
///
/// Both keys are type-checked before anything changes, so a WRONGTYPE
/// destination leaves the source intact.
///
/// # Returns
///
/// `true` if `member` was in `src`. Moving within the same set is a no-op.
pub fn smove(locks: &mut KeyLocks<'_>, src: &[u8], dst: &[u8], member: Bytes) -> Result<bool, CommandError> {
    let present = set_at(locks, src)?.is_some_and(|s| s.contains(&member));
    set_at(locks, dst)?;
    if !present {
        return Ok(false);
    }
    if src == dst {
        return Ok(true);
    }
    if let Some(set) = set_mut(locks, src)? {
        set.remove(&member);
    }
    locks.remove_if_empty(src);
    sadd(locks, dst, &[member])?;
    Ok(true)
}

/// SPOP key count: remove and return up to `count` distinct random members.
/// `None` when the key does not exist.
pub fn spop(locks: &mut KeyLocks<'_>, key: &[u8], count: usize) -> Result<Option<Vec<Bytes>>, CommandError> {
    let Some(set) = set_mut(locks, key)? else {
        return Ok(None);
    };
    let count = count.min(set.len());
    let chosen: Vec<Bytes> = set.iter().cloned().choose_multiple(&mut rand::rng(), count);
    for member in &chosen {
        set.remove(member);
    }
    locks.remove_if_empty(key);
    Ok(Some(chosen))
}

/// SRANDMEMBER key count
///
/// A positive `count` returns up to that many distinct members. A negative
/// one returns exactly `|count|` members, possibly repeated; the parser caps
/// it at [`MAX_RANDOM_SAMPLES`]. `None` when the key does not exist.
pub fn srandmember(locks: &mut KeyLocks<'_>, key: &[u8], count: i64) -> Result<Option<Vec<Bytes>>, CommandError> {
    let Some(set) = set_at(locks, key)? else {
        return Ok(None);
    };
    let mut rng = rand::rng();
    let picked = if count >= 0 {
        let count = usize::try_from(count).unwrap_or(usize::MAX).min(set.len());
        set.iter().cloned().choose_multiple(&mut rng, count)
    } else {
        let members: Vec<&Bytes> = set.iter().collect();
        (0..count.unsigned_abs())
            .filter_map(|_| members.choose(&mut rng).map(|m| (*m).clone()))
            .collect()
    };
    Ok(Some(picked))
}

/// SDIFF / SINTER / SUNION. Absent keys count as the empty set.
///
/// # Errors
///
/// `WrongType` if any of `keys` holds another type.
pub fn combine(locks: &mut KeyLocks<'_>, op: SetOp, keys: &[Bytes]) -> Result<Vec<Bytes>, CommandError> {
    let mut operands: Vec<HashSet<Bytes>> = Vec::with_capacity(keys.len());
    for key in keys {
        operands.push(set_at(locks, key)?.cloned().unwrap_or_default());
    }
    let mut iter = operands.into_iter();
    let Some(first) = iter.next() else {
        return Ok(Vec::new());
    };
    let result = iter.fold(first, |acc, next| match op {
        SetOp::Diff => acc.difference(&next).cloned().collect(),
        SetOp::Inter => acc.intersection(&next).cloned().collect(),
        SetOp::Union => acc.union(&next).cloned().collect(),
    });
    Ok(result.into_iter().collect())
}
