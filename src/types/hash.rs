// src/types/hash.rs

//! Hash 类型：field -> value，字段无序。
//! A hash whose last field is deleted disappears from the keyspace.

use std::collections::HashMap;

use bytes::Bytes;

use crate::engine::keyspace::KeyLocks;
use crate::error::CommandError;
use crate::types::{Value, parse_i64};

fn hash_at<'a>(locks: &'a mut KeyLocks<'_>, key: &[u8]) -> Result<Option<&'a HashMap<Bytes, Bytes>>, CommandError> {
    locks.value(key).map(Value::as_hash).transpose()
}

/// Type-check first so a failed write never leaves an empty hash behind.
fn hash_mut<'a>(locks: &'a mut KeyLocks<'_>, key: &[u8]) -> Result<&'a mut HashMap<Bytes, Bytes>, CommandError> {
    hash_at(locks, key)?;
    locks
        .value_or_insert_with(key, || Value::Hash(HashMap::new()))
        .as_hash_mut()
}

/// HSET key field value [field value ...]
/// 返回新建 field 的个数，覆盖旧值不计数
pub fn hset(locks: &mut KeyLocks<'_>, key: &[u8], pairs: &[(Bytes, Bytes)]) -> Result<usize, CommandError> {
    let hash = hash_mut(locks, key)?;
    Ok(pairs
        .iter()
        .filter(|(field, value)| hash.insert(field.clone(), value.clone()).is_none())
        .count())
}

/// HSETNX key field value
pub fn hsetnx(locks: &mut KeyLocks<'_>, key: &[u8], field: Bytes, value: Bytes) -> Result<bool, CommandError> {
    let hash = hash_mut(locks, key)?;
    if hash.contains_key(&field) {
        return Ok(false);
    }
    hash.insert(field, value);
    Ok(true)
}

/// HGET key field
pub fn hget(locks: &mut KeyLocks<'_>, key: &[u8], field: &[u8]) -> Result<Option<Bytes>, CommandError> {
    Ok(hash_at(locks, key)?.and_then(|h| h.get(field).cloned()))
}

/// HMGET key field [field ...]
pub fn hmget(locks: &mut KeyLocks<'_>, key: &[u8], fields: &[Bytes]) -> Result<Vec<Option<Bytes>>, CommandError> {
    let hash = hash_at(locks, key)?;
    Ok(fields
        .iter()
        .map(|f| hash.and_then(|h| h.get(f).cloned()))
        .collect())
}

/// HDEL key field [field ...]
/// 返回实际删除的 field 个数
pub fn hdel(locks: &mut KeyLocks<'_>, key: &[u8], fields: &[Bytes]) -> Result<usize, CommandError> {
    let Some(value) = locks.value_mut(key) else {
        return Ok(0);
    };
    let hash = value.as_hash_mut()?;
    let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
    locks.remove_if_empty(key);
    Ok(removed)
}

/// HEXISTS key field
pub fn hexists(locks: &mut KeyLocks<'_>, key: &[u8], field: &[u8]) -> Result<bool, CommandError> {
    Ok(hash_at(locks, key)?.is_some_and(|h| h.contains_key(field)))
}

/// HLEN key
pub fn hlen(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<usize, CommandError> {
    Ok(hash_at(locks, key)?.map_or(0, HashMap::len))
}

/// HKEYS key
pub fn hkeys(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<Vec<Bytes>, CommandError> {
    Ok(hash_at(locks, key)?.map(|h| h.keys().cloned().collect()).unwrap_or_default())
}

/// HVALS key
pub fn hvals(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<Vec<Bytes>, CommandError> {
    Ok(hash_at(locks, key)?.map(|h| h.values().cloned().collect()).unwrap_or_default())
}

/// HGETALL key
/// field, value 交替排列
pub fn hgetall(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<Vec<Bytes>, CommandError> {
    Ok(hash_at(locks, key)?
        .map(|h| {
            h.iter()
                .flat_map(|(f, v)| [f.clone(), v.clone()])
                .collect()
        })
        .unwrap_or_default())
}

/// HINCRBY key field delta
///
/// # Errors
/// - `HashNotInteger` when the field holds something other than an integer
/// - `Overflow` when the sum leaves the `i64` range
pub fn hincrby(locks: &mut KeyLocks<'_>, key: &[u8], field: Bytes, delta: i64) -> Result<i64, CommandError> {
    let current = match hash_at(locks, key)?.and_then(|h| h.get(&field)) {
        Some(raw) => parse_i64(raw).map_err(|_| CommandError::HashNotInteger)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
    hash_mut(locks, key)?.insert(field, Bytes::from(next.to_string()));
    Ok(next)
}
