// src/types/list.rs

//! # List Type Support
//!
//! A list is a `VecDeque<Bytes>`, so pushes and pops at either end are O(1).
//! Indices may be negative and count from the tail (`-1` is the last element).
//! A list that becomes empty is removed from the keyspace.
//!
//! Supported commands:
//! - `LPUSH` / `RPUSH`
//! - `LPOP` / `RPOP` (optionally with a count)
//! - `LRANGE`, `LINDEX`, `LLEN`
//! - `LSET`, `LINSERT`, `LTRIM`

use std::collections::VecDeque;

use bytes::Bytes;

use crate::engine::keyspace::KeyLocks;
use crate::error::CommandError;
use crate::types::{Value, normalize_index, normalize_range};

/// Which end of the list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
    Left,
    Right,
}

/// LINSERT placement relative to the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Before,
    After,
}

fn list_at<'a>(locks: &'a mut KeyLocks<'_>, key: &[u8]) -> Result<Option<&'a VecDeque<Bytes>>, CommandError> {
    locks.value(key).map(Value::as_list).transpose()
}

fn list_mut<'a>(locks: &'a mut KeyLocks<'_>, key: &[u8]) -> Result<Option<&'a mut VecDeque<Bytes>>, CommandError> {
    locks.value_mut(key).map(Value::as_list_mut).transpose()
}

/// Execute LPUSH / RPUSH:
/// Push every value, in argument order, onto the chosen end.
///
/// # Arguments
///
/// * `locks`  – Shard locks of the running command.
/// * `key`    – Name of the list.
/// * `values` – Values to push. `LPUSH k a b` leaves `b` at the head.
///
/// # Returns
///
/// The length of the list after the push.
///
/// # Errors
///
/// `WrongType` if `key` holds something other than a list.
pub fn push(locks: &mut KeyLocks<'_>, key: &[u8], end: End, values: &[Bytes]) -> Result<usize, CommandError> {
    list_at(locks, key)?;
    let list = locks
        .value_or_insert_with(key, || Value::List(VecDeque::new()))
        .as_list_mut()?;
    for value in values {
        match end {
            End::Left => list.push_front(value.clone()),
            End::Right => list.push_back(value.clone()),
        }
    }
    Ok(list.len())
}

/// Execute LPOP / RPOP without a count.
///
/// # Returns
///
/// The removed element, or `None` if the list does not exist.
pub fn pop(locks: &mut KeyLocks<'_>, key: &[u8], end: End) -> Result<Option<Bytes>, CommandError> {
    Ok(pop_many(locks, key, end, 1)?.and_then(|mut v| v.pop()))
}

/// Execute LPOP / RPOP with a count.
///
/// # Returns
///
/// Up to `count` elements in removal order, or `None` if the list does not exist.
pub fn pop_many(
    locks: &mut KeyLocks<'_>,
    key: &[u8],
    end: End,
    count: usize,
) -> Result<Option<Vec<Bytes>>, CommandError> {
    let Some(list) = list_mut(locks, key)? else {
        return Ok(None);
    };
    let take = count.min(list.len());
    let popped = match end {
        End::Left => list.drain(..take).collect(),
        End::Right => (0..take).filter_map(|_| list.pop_back()).collect(),
    };
    locks.remove_if_empty(key);
    Ok(Some(popped))
}

/// Execute LRANGE:
/// Return the elements between `start` and `stop` inclusive, after clamping.
pub fn range(locks: &mut KeyLocks<'_>, key: &[u8], start: i64, stop: i64) -> Result<Vec<Bytes>, CommandError> {
    let Some(list) = list_at(locks, key)? else {
        return Ok(Vec::new());
    };
    Ok(match normalize_range(start, stop, list.len()) {
        Some((s, e)) => list.range(s..=e).cloned().collect(),
        None => Vec::new(),
    })
}

/// LINDEX key index
pub fn index(locks: &mut KeyLocks<'_>, key: &[u8], index: i64) -> Result<Option<Bytes>, CommandError> {
    Ok(list_at(locks, key)?
        .and_then(|list| normalize_index(index, list.len()).and_then(|i| list.get(i)).cloned()))
}

/// Execute LSET.
///
/// # Errors
///
/// - `NoSuchKey` if the list does not exist
/// - `IndexOutOfRange` if `index` does not address an element
pub fn set(locks: &mut KeyLocks<'_>, key: &[u8], index: i64, value: Bytes) -> Result<(), CommandError> {
    let list = list_mut(locks, key)?.ok_or(CommandError::NoSuchKey)?;
    let slot = normalize_index(index, list.len()).ok_or(CommandError::IndexOutOfRange)?;
    list[slot] = value;
    Ok(())
}

/// Execute LINSERT.
///
/// # Returns
///
/// The new length, `0` if the list does not exist, `-1` if `pivot` was not found.
pub fn insert(
    locks: &mut KeyLocks<'_>,
    key: &[u8],
    position: Position,
    pivot: &[u8],
    value: Bytes,
) -> Result<i64, CommandError> {
    let Some(list) = list_mut(locks, key)? else {
        return Ok(0);
    };
    let Some(at) = list.iter().position(|item| item.as_ref() == pivot) else {
        return Ok(-1);
    };
    let at = match position {
        Position::Before => at,
        Position::After => at + 1,
    };
    list.insert(at, value);
    Ok(list.len() as i64)
}

/// Execute LTRIM: keep only `[start, stop]`. An empty result deletes the key.
pub fn trim(locks: &mut KeyLocks<'_>, key: &[u8], start: i64, stop: i64) -> Result<(), CommandError> {
    let Some(list) = list_mut(locks, key)? else {
        return Ok(());
    };
    match normalize_range(start, stop, list.len()) {
        Some((s, e)) => {
            list.truncate(e + 1);
            list.drain(..s);
        }
        None => list.clear(),
    }
    locks.remove_if_empty(key);
    Ok(())
}

/// LLEN key
pub fn len(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<usize, CommandError> {
    Ok(list_at(locks, key)?.map_or(0, VecDeque::len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::keyspace::Keyspace;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn bs(items: &[&str]) -> Vec<Bytes> {
        items.iter().map(|s| b(s)).collect()
    }

    #[test]
    fn test_lpush_rpush_and_lrange() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["mylist"]);

        assert_eq!(push(&mut locks, b"mylist", End::Left, &bs(&["a"])), Ok(1));
        assert_eq!(push(&mut locks, b"mylist", End::Left, &bs(&["b"])), Ok(2));
        assert_eq!(push(&mut locks, b"mylist", End::Right, &bs(&["c", "d"])), Ok(4));

        assert_eq!(range(&mut locks, b"mylist", 0, -1), Ok(bs(&["b", "a", "c", "d"])));
        assert_eq!(range(&mut locks, b"mylist", 1, 2), Ok(bs(&["a", "c"])));
        assert_eq!(range(&mut locks, b"mylist", -2, -1), Ok(bs(&["c", "d"])));
        assert_eq!(range(&mut locks, b"mylist", 5, 10), Ok(vec![]));
    }

    #[test]
    fn lpush_multiple_reverses_argument_order() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["l"]);
        push(&mut locks, b"l", End::Left, &bs(&["a", "b", "c"])).unwrap();
        assert_eq!(range(&mut locks, b"l", 0, -1), Ok(bs(&["c", "b", "a"])));
    }

    #[test]
    fn test_lpop_rpop_and_empty() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["lst"]);
        push(&mut locks, b"lst", End::Right, &bs(&["x", "y", "z"])).unwrap();

        assert_eq!(pop(&mut locks, b"lst", End::Left), Ok(Some(b("x"))));
        assert_eq!(pop(&mut locks, b"lst", End::Right), Ok(Some(b("z"))));
        assert_eq!(pop(&mut locks, b"lst", End::Left), Ok(Some(b("y"))));
        assert_eq!(pop(&mut locks, b"lst", End::Right), Ok(None));
        assert!(!locks.contains(b"lst"));
    }

    #[test]
    fn pop_with_count() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["l", "absent"]);
        push(&mut locks, b"l", End::Right, &bs(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(pop_many(&mut locks, b"l", End::Left, 2), Ok(Some(bs(&["a", "b"]))));
        assert_eq!(pop_many(&mut locks, b"l", End::Right, 5), Ok(Some(bs(&["d", "c"]))));
        assert!(!locks.contains(b"l"));
        assert_eq!(pop_many(&mut locks, b"absent", End::Left, 3), Ok(None));
    }

    #[test]
    fn lindex_and_lset() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["l", "none"]);
        push(&mut locks, b"l", End::Right, &bs(&["a", "b", "c"])).unwrap();
        assert_eq!(index(&mut locks, b"l", -1), Ok(Some(b("c"))));
        assert_eq!(index(&mut locks, b"l", 3), Ok(None));

        assert_eq!(set(&mut locks, b"l", 1, b("B")), Ok(()));
        assert_eq!(index(&mut locks, b"l", 1), Ok(Some(b("B"))));
        assert_eq!(set(&mut locks, b"l", 10, b("x")), Err(CommandError::IndexOutOfRange));
        assert_eq!(set(&mut locks, b"none", 0, b("x")), Err(CommandError::NoSuchKey));
    }

    #[test]
    fn linsert_reports_missing_pivot_and_key() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["l", "none"]);
        push(&mut locks, b"l", End::Right, &bs(&["a", "c", "a"])).unwrap();
        assert_eq!(insert(&mut locks, b"l", Position::Before, b"c", b("b")), Ok(4));
        assert_eq!(insert(&mut locks, b"l", Position::After, b"a", b("a2")), Ok(5));
        assert_eq!(range(&mut locks, b"l", 0, -1), Ok(bs(&["a", "a2", "b", "c", "a"])));
        assert_eq!(insert(&mut locks, b"l", Position::After, b"zz", b("x")), Ok(-1));
        assert_eq!(insert(&mut locks, b"none", Position::After, b"a", b("x")), Ok(0));
        assert!(!locks.contains(b"none"));
    }

    #[test]
    fn ltrim_keeps_range_and_deletes_when_empty() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["l"]);
        push(&mut locks, b"l", End::Right, &bs(&["a", "b", "c", "d", "e"])).unwrap();
        trim(&mut locks, b"l", 1, -2).unwrap();
        assert_eq!(range(&mut locks, b"l", 0, -1), Ok(bs(&["b", "c", "d"])));
        assert_eq!(len(&mut locks, b"l"), Ok(3));
        trim(&mut locks, b"l", 5, 10).unwrap();
        assert!(!locks.contains(b"l"));
    }

    #[test]
    fn wrong_type() {
        let ks = Keyspace::new(4);
        let mut locks = ks.lock(&["s"]);
        locks.set(b"s", Value::String(b("v")), None);
        assert_eq!(push(&mut locks, b"s", End::Left, &bs(&["x"])), Err(CommandError::WrongType));
        assert_eq!(len(&mut locks, b"s"), Err(CommandError::WrongType));
    }
}
