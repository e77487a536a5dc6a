// src/types/string.rs

//! String 类型
//!
//! A string value is an immutable byte sequence. Numeric commands parse it
//! as a base-10 `i64` (INCR family) or `f64` (INCRBYFLOAT) and store the
//! textual result back, keeping any deadline the key already had.

use bytes::Bytes;

use crate::engine::keyspace::KeyLocks;
use crate::error::CommandError;
use crate::expire::Expiry;
use crate::types::{Value, format_f64, normalize_range, parse_f64, parse_i64};

/// Largest string SETRANGE / APPEND may produce (512 MiB).
pub const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

/// Existence guard for SET.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetCondition {
    #[default]
    Always,
    /// NX
    IfAbsent,
    /// XX
    IfPresent,
}

/// Options accepted by SET, already validated by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub condition: SetCondition,
    pub expiry: Option<Expiry>,
    pub keep_ttl: bool,
    /// Return the old value instead of OK.
    pub get: bool,
}

/// What SET did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    pub written: bool,
    pub previous: Option<Bytes>,
}

fn string_at(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
    locks
        .value(key)
        .map(|v| v.as_string().cloned())
        .transpose()
}

/// GET key
pub fn get(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
    string_at(locks, key)
}

/// SET key value [NX|XX] [EX|PX|EXAT|PXAT|KEEPTTL] [GET]
///
/// The value and its deadline are written together. Without KEEPTTL any
/// previous deadline is dropped.
///
/// # Errors
/// - `WrongType` when GET is requested and the old value is not a string
/// - `InvalidExpireTime` when the deadline overflows
pub fn set(
    locks: &mut KeyLocks<'_>,
    key: &[u8],
    value: Bytes,
    opts: &SetOptions,
) -> Result<SetOutcome, CommandError> {
    let previous = if opts.get { string_at(locks, key)? } else { None };
    let exists = locks.contains(key);
    let allowed = match opts.condition {
        SetCondition::Always => true,
        SetCondition::IfAbsent => !exists,
        SetCondition::IfPresent => exists,
    };
    if !allowed {
        return Ok(SetOutcome { written: false, previous });
    }

    let now = locks.now();
    let expire_at = match opts.expiry {
        Some(when) => Some(when.deadline(now, "set")?),
        None if opts.keep_ttl => locks.get(key).and_then(|e| e.expire_at()).map(|at| at as i64),
        None => None,
    };
    match expire_at {
        // An absolute deadline that already passed leaves nothing behind.
        Some(at) if at <= now as i64 => {
            locks.remove(key);
        }
        _ => locks.set(key, Value::String(value), expire_at.map(|at| at as u64)),
    }
    Ok(SetOutcome { written: true, previous })
}

/// GETSET key value: swap in a new value (dropping the deadline), return the old one.
pub fn getset(locks: &mut KeyLocks<'_>, key: &[u8], value: Bytes) -> Result<Option<Bytes>, CommandError> {
    let previous = string_at(locks, key)?;
    locks.set(key, Value::String(value), None);
    Ok(previous)
}

/// MGET: keys that are absent or hold another type yield `None`.
pub fn mget(locks: &mut KeyLocks<'_>, keys: &[Bytes]) -> Vec<Option<Bytes>> {
    keys.iter()
        .map(|k| locks.value(k).and_then(|v| v.as_string().ok().cloned()))
        .collect()
}

/// MSET: plain SET for every pair.
pub fn mset(locks: &mut KeyLocks<'_>, pairs: &[(Bytes, Bytes)]) {
    for (key, value) in pairs {
        locks.set(key, Value::String(value.clone()), None);
    }
}

/// APPEND key value -> new length. An absent key behaves as SET.
pub fn append(locks: &mut KeyLocks<'_>, key: &[u8], suffix: &[u8]) -> Result<usize, CommandError> {
    let current = string_at(locks, key)?.unwrap_or_default();
    let len = current.len() + suffix.len();
    if len > MAX_STRING_LEN {
        return Err(CommandError::StringTooLong);
    }
    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&current);
    buf.extend_from_slice(suffix);
    locks.put(key, Value::String(Bytes::from(buf)));
    Ok(len)
}

/// STRLEN key, 0 if absent.
pub fn strlen(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<usize, CommandError> {
    Ok(string_at(locks, key)?.map_or(0, |s| s.len()))
}

/// GETRANGE key start end, with list-style clamping. Empty when absent.
pub fn getrange(locks: &mut KeyLocks<'_>, key: &[u8], start: i64, end: i64) -> Result<Bytes, CommandError> {
    let Some(current) = string_at(locks, key)? else {
        return Ok(Bytes::new());
    };
    Ok(match normalize_range(start, end, current.len()) {
        Some((s, e)) => current.slice(s..=e),
        None => Bytes::new(),
    })
}

/// SETRANGE key offset value -> new length.
///
/// A gap between the current end and `offset` is filled with zero bytes.
/// An empty `value` never creates the key.
pub fn setrange(locks: &mut KeyLocks<'_>, key: &[u8], offset: usize, value: &[u8]) -> Result<usize, CommandError> {
    let current = string_at(locks, key)?;
    if value.is_empty() {
        return Ok(current.map_or(0, |s| s.len()));
    }
    let end = offset.checked_add(value.len()).ok_or(CommandError::StringTooLong)?;
    if end > MAX_STRING_LEN {
        return Err(CommandError::StringTooLong);
    }
    let mut buf = current.map(|s| s.to_vec()).unwrap_or_default();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[offset..end].copy_from_slice(value);
    let len = buf.len();
    locks.put(key, Value::String(Bytes::from(buf)));
    Ok(len)
}

/// INCR / DECR / INCRBY / DECRBY. Absent counts as 0.
pub fn incr_by(locks: &mut KeyLocks<'_>, key: &[u8], delta: i64) -> Result<i64, CommandError> {
    let current = match string_at(locks, key)? {
        Some(raw) => parse_i64(&raw)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
    locks.put(key, Value::String(Bytes::from(next.to_string())));
    Ok(next)
}

/// INCRBYFLOAT. Returns the stored text of the result.
pub fn incr_by_float(locks: &mut KeyLocks<'_>, key: &[u8], delta: f64) -> Result<Bytes, CommandError> {
    let current = match string_at(locks, key)? {
        Some(raw) => parse_f64(&raw)?,
        None => 0.0,
    };
    let next = current + delta;
    if !next.is_finite() {
        return Err(CommandError::NonFiniteResult);
    }
    let text = Bytes::from(format_f64(next));
    locks.put(key, Value::String(text.clone()));
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::keyspace::Keyspace;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_set_get_overwrite() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["foo", "nope"]);
        let opts = SetOptions::default();
        assert!(set(&mut locks, b"foo", b("bar"), &opts).unwrap().written);
        assert_eq!(get(&mut locks, b"foo").unwrap(), Some(b("bar")));
        set(&mut locks, b"foo", b("baz"), &opts).unwrap();
        assert_eq!(get(&mut locks, b"foo").unwrap(), Some(b("baz")));
        assert_eq!(get(&mut locks, b"nope").unwrap(), None);
    }

    #[test]
    fn nx_and_xx_guards() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["k"]);
        let nx = SetOptions { condition: SetCondition::IfAbsent, ..Default::default() };
        let xx = SetOptions { condition: SetCondition::IfPresent, ..Default::default() };
        assert!(!set(&mut locks, b"k", b("1"), &xx).unwrap().written);
        assert!(set(&mut locks, b"k", b("1"), &nx).unwrap().written);
        assert!(!set(&mut locks, b"k", b("2"), &nx).unwrap().written);
        assert!(set(&mut locks, b"k", b("3"), &xx).unwrap().written);
        assert_eq!(get(&mut locks, b"k").unwrap(), Some(b("3")));
    }

    #[test]
    fn set_with_expiry_and_keepttl() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["k"]);
        let ex = SetOptions { expiry: Some(Expiry::In(2_000)), ..Default::default() };
        set(&mut locks, b"k", b("v"), &ex).unwrap();
        let deadline = locks.get(b"k").and_then(|e| e.expire_at());
        assert!(deadline.is_some());

        let keep = SetOptions { keep_ttl: true, ..Default::default() };
        set(&mut locks, b"k", b("w"), &keep).unwrap();
        assert_eq!(locks.get(b"k").and_then(|e| e.expire_at()), deadline);

        set(&mut locks, b"k", b("x"), &SetOptions::default()).unwrap();
        assert_eq!(locks.get(b"k").and_then(|e| e.expire_at()), None);
    }

    #[test]
    fn set_get_option_returns_previous() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["k"]);
        let opts = SetOptions { get: true, ..Default::default() };
        assert_eq!(set(&mut locks, b"k", b("1"), &opts).unwrap().previous, None);
        assert_eq!(set(&mut locks, b"k", b("2"), &opts).unwrap().previous, Some(b("1")));
    }

    #[test]
    fn test_incr_and_decr_basic() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["counter"]);
        assert_eq!(incr_by(&mut locks, b"counter", 1), Ok(1));
        assert_eq!(incr_by(&mut locks, b"counter", 1), Ok(2));
        assert_eq!(incr_by(&mut locks, b"counter", -3), Ok(-1));
        assert_eq!(get(&mut locks, b"counter").unwrap(), Some(b("-1")));
    }

    #[test]
    fn test_incr_overflow() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["overflow", "text"]);
        set(&mut locks, b"overflow", b(&i64::MAX.to_string()), &SetOptions::default()).unwrap();
        assert_eq!(incr_by(&mut locks, b"overflow", 1), Err(CommandError::Overflow));
        // unchanged after the failure
        assert_eq!(get(&mut locks, b"overflow").unwrap(), Some(b(&i64::MAX.to_string())));

        set(&mut locks, b"text", b("abc"), &SetOptions::default()).unwrap();
        assert_eq!(incr_by(&mut locks, b"text", 1), Err(CommandError::NotInteger));
    }

    #[test]
    fn incr_by_float_accumulates() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["f"]);
        assert_eq!(incr_by_float(&mut locks, b"f", 1.5).unwrap(), b("1.5"));
        set(&mut locks, b"f", b("10.5"), &SetOptions::default()).unwrap();
        assert_eq!(incr_by_float(&mut locks, b"f", 1.25).unwrap(), b("11.75"));
        assert_eq!(incr_by_float(&mut locks, b"f", -3.75).unwrap(), b("8"));
    }

    #[test]
    fn append_and_strlen() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["s", "missing"]);
        assert_eq!(append(&mut locks, b"s", b"Hello"), Ok(5));
        assert_eq!(append(&mut locks, b"s", b" World"), Ok(11));
        assert_eq!(strlen(&mut locks, b"s"), Ok(11));
        assert_eq!(strlen(&mut locks, b"missing"), Ok(0));
    }

    #[test]
    fn getrange_clamps() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["s", "none"]);
        set(&mut locks, b"s", b("Hello World"), &SetOptions::default()).unwrap();
        assert_eq!(getrange(&mut locks, b"s", 0, 4).unwrap(), b("Hello"));
        assert_eq!(getrange(&mut locks, b"s", -5, -1).unwrap(), b("World"));
        assert_eq!(getrange(&mut locks, b"s", 0, -1).unwrap(), b("Hello World"));
        assert_eq!(getrange(&mut locks, b"s", 20, 30).unwrap(), b(""));
        assert_eq!(getrange(&mut locks, b"s", 5, 2).unwrap(), b(""));
        assert_eq!(getrange(&mut locks, b"none", 0, -1).unwrap(), b(""));
    }

    #[test]
    fn setrange_overwrites_and_pads() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["s", "pad", "pad2"]);
        set(&mut locks, b"s", b("Hello World"), &SetOptions::default()).unwrap();
        assert_eq!(setrange(&mut locks, b"s", 6, b"Redis"), Ok(11));
        assert_eq!(get(&mut locks, b"s").unwrap(), Some(b("Hello Redis")));

        assert_eq!(setrange(&mut locks, b"pad", 3, b"x"), Ok(4));
        assert_eq!(get(&mut locks, b"pad").unwrap(), Some(Bytes::from_static(b"\0\0\0x")));

        assert_eq!(setrange(&mut locks, b"pad2", 5, b""), Ok(0));
        assert!(!locks.contains(b"pad2"));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["l"]);
        locks.set(b"l", Value::List(Default::default()), None);
        assert_eq!(get(&mut locks, b"l"), Err(CommandError::WrongType));
        assert_eq!(append(&mut locks, b"l", b"x"), Err(CommandError::WrongType));
        assert_eq!(mget(&mut locks, &[b("l")]), vec![None]);
    }
}
