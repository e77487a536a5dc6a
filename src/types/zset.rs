// src/types/zset.rs

//! Sorted set 类型
//!
//! Members are unique byte strings, each with an `f64` score. Order is by
//! score ascending, ties broken by member bytes. Two indexes are kept in
//! step: a `HashMap` for score lookup and a `BTreeSet` for ordered access.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;

use crate::engine::keyspace::KeyLocks;
use crate::error::CommandError;
use crate::types::string::SetCondition;
use crate::types::{Value, normalize_range, parse_f64};

#[derive(Debug, Clone)]
struct ScoredMember {
    score: f64,
    member: Bytes,
}

impl PartialEq for ScoredMember {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredMember {}

impl PartialOrd for ScoredMember {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredMember {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.member.cmp(&other.member))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    scores: HashMap<Bytes, f64>,
    order: BTreeSet<ScoredMember>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Insert or update `member`, returning the previous score.
    pub fn insert(&mut self, member: Bytes, score: f64) -> Option<f64> {
        // -0.0 and 0.0 must sort as one score.
        let score = score + 0.0;
        let previous = self.scores.insert(member.clone(), score);
        if let Some(old) = previous {
            self.order.remove(&ScoredMember { score: old, member: member.clone() });
        }
        self.order.insert(ScoredMember { score, member });
        previous
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove_entry(member) {
            Some((member, score)) => {
                self.order.remove(&ScoredMember { score, member });
                true
            }
            None => false,
        }
    }

    /// 0-based position in ascending order.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let (member, score) = self.scores.get_key_value(member)?;
        let probe = ScoredMember { score: *score, member: member.clone() };
        Some(self.order.range(..probe).count())
    }

    /// Members in ascending order together with their scores.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&Bytes, f64)> {
        self.order.iter().map(|m| (&m.member, m.score))
    }

    fn by_score<'a>(&'a self, min: &'a ScoreBound, max: &'a ScoreBound) -> impl Iterator<Item = &'a ScoredMember> + 'a {
        let start = ScoredMember { score: min.value, member: Bytes::new() };
        self.order
            .range(start..)
            .skip_while(move |m| !min.admits_from_below(m.score))
            .take_while(move |m| max.admits_from_above(m.score))
    }
}

/// One end of a score interval: `1.5`, `(1.5`, `-inf`, `+inf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    pub fn parse(raw: &[u8]) -> Result<Self, CommandError> {
        let (exclusive, body) = match raw.split_first() {
            Some((b'(', rest)) => (true, rest),
            _ => (false, raw),
        };
        let value = parse_f64(body).map_err(|_| CommandError::InvalidScoreBound)?;
        Ok(ScoreBound { value, exclusive })
    }

    fn admits_from_below(&self, score: f64) -> bool {
        if self.exclusive { score > self.value } else { score >= self.value }
    }

    fn admits_from_above(&self, score: f64) -> bool {
        if self.exclusive { score < self.value } else { score <= self.value }
    }
}

/// ZADD flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZAddOptions {
    pub condition: SetCondition,
    /// CH: also count members whose score changed.
    pub changed: bool,
}

/// Which slice of a sorted set ZRANGE selects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeBy {
    Index { start: i64, stop: i64 },
    Score { min: ScoreBound, max: ScoreBound },
}

/// Normalised ZRANGE / ZRANGEBYSCORE / ZREVRANGE request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZRangeOptions {
    pub by: RangeBy,
    pub rev: bool,
    /// `(offset, count)`; only meaningful with `RangeBy::Score`. Negative count means all.
    pub limit: Option<(i64, i64)>,
    pub with_scores: bool,
}

fn zset_at<'a>(locks: &'a mut KeyLocks<'_>, key: &[u8]) -> Result<Option<&'a SortedSet>, CommandError> {
    locks.value(key).map(Value::as_zset).transpose()
}

fn zset_or_insert<'a>(locks: &'a mut KeyLocks<'_>, key: &[u8]) -> Result<&'a mut SortedSet, CommandError> {
    zset_at(locks, key)?;
    locks
        .value_or_insert_with(key, || Value::ZSet(SortedSet::new()))
        .as_zset_mut()
}

/// ZADD key [NX|XX] [CH] score member [score member ...]
///
/// Returns how many members were added, plus how many changed score when CH is set.
/// With XX on an absent key nothing is created.
pub fn zadd(
    locks: &mut KeyLocks<'_>,
    key: &[u8],
    opts: ZAddOptions,
    pairs: &[(f64, Bytes)],
) -> Result<usize, CommandError> {
    if opts.condition == SetCondition::IfPresent && zset_at(locks, key)?.is_none() {
        return Ok(0);
    }
    let zset = zset_or_insert(locks, key)?;
    let mut added = 0;
    let mut changed = 0;
    for (score, member) in pairs {
        let existing = zset.score(member);
        match (opts.condition, existing) {
            (SetCondition::IfAbsent, Some(_)) | (SetCondition::IfPresent, None) => continue,
            _ => {}
        }
        match zset.insert(member.clone(), *score) {
            None => added += 1,
            Some(old) if old != *score + 0.0 => changed += 1,
            Some(_) => {}
        }
    }
    locks.remove_if_empty(key);
    Ok(if opts.changed { added + changed } else { added })
}

/// ZSCORE key member
pub fn zscore(locks: &mut KeyLocks<'_>, key: &[u8], member: &[u8]) -> Result<Option<f64>, CommandError> {
    Ok(zset_at(locks, key)?.and_then(|z| z.score(member)))
}

/// ZINCRBY key delta member. A member that is absent starts from 0.
///
/// # Errors
/// `NanScore` when the sum is NaN (`+inf` plus `-inf`).
pub fn zincrby(locks: &mut KeyLocks<'_>, key: &[u8], delta: f64, member: Bytes) -> Result<f64, CommandError> {
    let current = zset_at(locks, key)?.and_then(|z| z.score(&member)).unwrap_or(0.0);
    let next = current + delta;
    if next.is_nan() {
        return Err(CommandError::NanScore);
    }
    zset_or_insert(locks, key)?.insert(member, next);
    Ok(next + 0.0)
}

/// ZCARD key
pub fn zcard(locks: &mut KeyLocks<'_>, key: &[u8]) -> Result<usize, CommandError> {
    Ok(zset_at(locks, key)?.map_or(0, SortedSet::len))
}

/// ZCOUNT key min max
pub fn zcount(locks: &mut KeyLocks<'_>, key: &[u8], min: ScoreBound, max: ScoreBound) -> Result<usize, CommandError> {
    Ok(zset_at(locks, key)?.map_or(0, |z| z.by_score(&min, &max).count()))
}

/// ZRANGE and its aliases. Returns `(member, score)` pairs in reply order.
pub fn zrange(locks: &mut KeyLocks<'_>, key: &[u8], opts: &ZRangeOptions) -> Result<Vec<(Bytes, f64)>, CommandError> {
    let Some(zset) = zset_at(locks, key)? else {
        return Ok(Vec::new());
    };
    let picked: Vec<(Bytes, f64)> = match opts.by {
        RangeBy::Index { start, stop } => match normalize_range(start, stop, zset.len()) {
            None => Vec::new(),
            Some((s, e)) => {
                let take = e - s + 1;
                let owned = |(m, score): (&Bytes, f64)| (m.clone(), score);
                if opts.rev {
                    zset.iter().rev().skip(s).take(take).map(owned).collect()
                } else {
                    zset.iter().skip(s).take(take).map(owned).collect()
                }
            }
        },
        RangeBy::Score { min, max } => {
            let mut hits: Vec<(Bytes, f64)> = zset
                .by_score(&min, &max)
                .map(|m| (m.member.clone(), m.score))
                .collect();
            if opts.rev {
                hits.reverse();
            }
            match opts.limit {
                Some((offset, _)) if offset < 0 => Vec::new(),
                Some((offset, count)) => {
                    let count = usize::try_from(count).unwrap_or(usize::MAX);
                    hits.into_iter().skip(offset as usize).take(count).collect()
                }
                None => hits,
            }
        }
    };
    Ok(picked)
}

/// ZRANK / ZREVRANK
pub fn zrank(locks: &mut KeyLocks<'_>, key: &[u8], member: &[u8], rev: bool) -> Result<Option<usize>, CommandError> {
    let Some(zset) = zset_at(locks, key)? else {
        return Ok(None);
    };
    Ok(zset
        .rank(member)
        .map(|rank| if rev { zset.len() - 1 - rank } else { rank }))
}

/// ZREM key member [member ...]
pub fn zrem(locks: &mut KeyLocks<'_>, key: &[u8], members: &[Bytes]) -> Result<usize, CommandError> {
    let Some(value) = locks.value_mut(key) else {
        return Ok(0);
    };
    let zset = value.as_zset_mut()?;
    let removed = members.iter().filter(|m| zset.remove(m)).count();
    locks.remove_if_empty(key);
    Ok(removed)
}
