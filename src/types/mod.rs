// src/types/mod.rs

//! Value representations and the per-type command engines.
//!
//! Every engine function takes the `KeyLocks` of the running command, so it
//! can only see keys whose shards the dispatcher already locked.

pub mod hash;
pub mod list;
pub mod set;
pub mod string;
pub mod zset;

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;

use crate::error::CommandError;
pub use zset::SortedSet;

/// Type tag of a stored value, as reported by `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    List,
    Hash,
    Set,
    ZSet,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::List => "list",
            Kind::Hash => "hash",
            Kind::Set => "set",
            Kind::ZSet => "zset",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    Set(HashSet<Bytes>),
    ZSet(SortedSet),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::String(_) => Kind::String,
            Value::List(_) => Kind::List,
            Value::Hash(_) => Kind::Hash,
            Value::Set(_) => Kind::Set,
            Value::ZSet(_) => Kind::ZSet,
        }
    }

    /// An empty collection is never kept around; strings are never "empty" in this sense.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::String(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
        }
    }

    pub fn as_string(&self) -> Result<&Bytes, CommandError> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_list(&self) -> Result<&VecDeque<Bytes>, CommandError> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_list_mut(&mut self) -> Result<&mut VecDeque<Bytes>, CommandError> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_hash(&self) -> Result<&HashMap<Bytes, Bytes>, CommandError> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_hash_mut(&mut self) -> Result<&mut HashMap<Bytes, Bytes>, CommandError> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_set(&self) -> Result<&HashSet<Bytes>, CommandError> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_set_mut(&mut self) -> Result<&mut HashSet<Bytes>, CommandError> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_zset(&self) -> Result<&SortedSet, CommandError> {
        match self {
            Value::ZSet(z) => Ok(z),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_zset_mut(&mut self) -> Result<&mut SortedSet, CommandError> {
        match self {
            Value::ZSet(z) => Ok(z),
            _ => Err(CommandError::WrongType),
        }
    }
}

/// Resolve an inclusive `[start, stop]` request against a sequence of `len`
/// items. Negative indices count from the end (-1 is the last item). Both
/// ends are clamped; `None` means the resulting range is empty.
pub fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let start = if start < 0 { len.saturating_add(start).max(0) } else { start };
    let stop = if stop < 0 { len.saturating_add(stop) } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Resolve a single possibly-negative index, `None` when out of range.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let index = if index < 0 { len.saturating_add(index) } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Strict base-10 `i64`, as stored by the INCR family.
pub fn parse_i64(raw: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .filter(|s| !s.is_empty() && !s.starts_with('+'))
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::NotInteger)
}

/// A finite-or-infinite float; NaN is rejected.
pub fn parse_f64(raw: &[u8]) -> Result<f64, CommandError> {
    let text = std::str::from_utf8(raw).map_err(|_| CommandError::NotFloat)?;
    let value = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => f64::INFINITY,
        "-inf" | "-infinity" => f64::NEG_INFINITY,
        other if other.contains("inf") || other.contains("nan") => {
            return Err(CommandError::NotFloat);
        }
        other => other.trim().parse::<f64>().map_err(|_| CommandError::NotFloat)?,
    };
    if text.trim() != text || value.is_nan() {
        return Err(CommandError::NotFloat);
    }
    Ok(value)
}

/// Text form used when a float goes back into a reply or a stored string.
pub fn format_f64(value: f64) -> String {
    if value == f64::INFINITY {
        "inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        // `Display` prints the shortest text that round-trips and never an exponent.
        format!("{}", value + 0.0)
    }
}
