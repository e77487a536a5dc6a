// src/engine/command.rs

//! Command parsing.
//!
//! A raw `(name, args)` pair becomes a tagged [`Command`] with every option
//! resolved to an explicit field. Arity, numeric arguments and option syntax
//! are all checked here, so a command that reaches the keyspace is well formed
//! and nothing is locked for a request that was going to fail anyway.

use bytes::Bytes;

use crate::error::CommandError;
use crate::expire::{Expiry, TtlUnit};
use crate::types::list::{End, Position};
use crate::types::set::{MAX_RANDOM_SAMPLES, SetOp};
use crate::types::string::{MAX_STRING_LEN, SetCondition, SetOptions};
use crate::types::zset::{RangeBy, ScoreBound, ZAddOptions, ZRangeOptions};
use crate::types::{parse_f64, parse_i64};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // connection
    Ping(Option<Bytes>),
    Echo(Bytes),

    // keys
    Del(Vec<Bytes>),
    Exists(Vec<Bytes>),
    Type(Bytes),
    Rename { src: Bytes, dst: Bytes },
    RenameNx { src: Bytes, dst: Bytes },
    Expire { key: Bytes, when: Expiry, name: &'static str },
    Ttl { key: Bytes, unit: TtlUnit },
    Persist(Bytes),
    DbSize,
    FlushDb,

    // strings
    Get(Bytes),
    Set { key: Bytes, value: Bytes, opts: SetOptions },
    GetSet { key: Bytes, value: Bytes },
    MGet(Vec<Bytes>),
    MSet(Vec<(Bytes, Bytes)>),
    Append { key: Bytes, value: Bytes },
    Strlen(Bytes),
    GetRange { key: Bytes, start: i64, end: i64 },
    SetRange { key: Bytes, offset: usize, value: Bytes },
    IncrBy { key: Bytes, delta: i64 },
    IncrByFloat { key: Bytes, delta: f64 },

    // hashes
    HSet { key: Bytes, pairs: Vec<(Bytes, Bytes)>, reply_ok: bool },
    HSetNx { key: Bytes, field: Bytes, value: Bytes },
    HGet { key: Bytes, field: Bytes },
    HMGet { key: Bytes, fields: Vec<Bytes> },
    HDel { key: Bytes, fields: Vec<Bytes> },
    HExists { key: Bytes, field: Bytes },
    HLen(Bytes),
    HKeys(Bytes),
    HVals(Bytes),
    HGetAll(Bytes),
    HIncrBy { key: Bytes, field: Bytes, delta: i64 },

    // lists
    Push { key: Bytes, end: End, values: Vec<Bytes> },
    Pop { key: Bytes, end: End, count: Option<usize> },
    LRange { key: Bytes, start: i64, stop: i64 },
    LIndex { key: Bytes, index: i64 },
    LSet { key: Bytes, index: i64, value: Bytes },
    LInsert { key: Bytes, position: Position, pivot: Bytes, value: Bytes },
    LTrim { key: Bytes, start: i64, stop: i64 },
    LLen(Bytes),

    // sets
    SAdd { key: Bytes, members: Vec<Bytes> },
    SRem { key: Bytes, members: Vec<Bytes> },
    SCard(Bytes),
    SIsMember { key: Bytes, member: Bytes },
    SMembers(Bytes),
    SMove { src: Bytes, dst: Bytes, member: Bytes },
    SPop { key: Bytes, count: Option<usize> },
    SRandMember { key: Bytes, count: Option<i64> },
    SetAlgebra { op: SetOp, keys: Vec<Bytes> },

    // sorted sets
    ZAdd { key: Bytes, opts: ZAddOptions, pairs: Vec<(f64, Bytes)> },
    ZScore { key: Bytes, member: Bytes },
    ZIncrBy { key: Bytes, delta: f64, member: Bytes },
    ZCard(Bytes),
    ZCount { key: Bytes, min: ScoreBound, max: ScoreBound },
    ZRange { key: Bytes, opts: ZRangeOptions },
    ZRank { key: Bytes, member: Bytes, rev: bool },
    ZRem { key: Bytes, members: Vec<Bytes> },
}

/// The shards a command needs locked.
#[derive(Debug, PartialEq, Eq)]
pub enum KeySet<'a> {
    Keys(Vec<&'a [u8]>),
    All,
}

/// Check `args.len()` against `min..=max` (`max = None` means unbounded).
fn arity(name: &str, args: &[Bytes], min: usize, max: Option<usize>) -> Result<(), CommandError> {
    if args.len() < min || max.is_some_and(|m| args.len() > m) {
        return Err(CommandError::WrongArity(name.to_ascii_lowercase()));
    }
    Ok(())
}

fn exact(name: &str, args: &[Bytes], n: usize) -> Result<(), CommandError> {
    arity(name, args, n, Some(n))
}

fn upper(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_uppercase()
}

/// A strictly positive expiry amount, scaled to milliseconds.
fn expiry_amount(raw: &[u8], scale: i64, command: &str) -> Result<i64, CommandError> {
    let n = parse_i64(raw)?;
    if n <= 0 {
        return Err(CommandError::InvalidExpireTime(command.to_string()));
    }
    n.checked_mul(scale)
        .ok_or_else(|| CommandError::InvalidExpireTime(command.to_string()))
}

fn non_negative(raw: &[u8]) -> Result<usize, CommandError> {
    let n = parse_i64(raw)?;
    usize::try_from(n).map_err(|_| CommandError::NotPositive)
}

fn pairs(args: &[Bytes]) -> Vec<(Bytes, Bytes)> {
    args.chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

impl Command {
    /// Parse a command name (any case) and its arguments.
    pub fn parse(name: &str, args: Vec<Bytes>) -> Result<Command, CommandError> {
        if name.is_empty() {
            return Err(CommandError::EmptyCommand);
        }
        let upper_name = name.to_ascii_uppercase();
        let a = args.as_slice();
        let cmd = match upper_name.as_str() {
            "PING" => {
                arity(name, a, 0, Some(1))?;
                Command::Ping(a.first().cloned())
            }
            "ECHO" => {
                exact(name, a, 1)?;
                Command::Echo(a[0].clone())
            }

            "DEL" | "UNLINK" => {
                arity(name, a, 1, None)?;
                Command::Del(args)
            }
            "EXISTS" => {
                arity(name, a, 1, None)?;
                Command::Exists(args)
            }
            "TYPE" => {
                exact(name, a, 1)?;
                Command::Type(a[0].clone())
            }
            "RENAME" | "RENAMENX" => {
                exact(name, a, 2)?;
                let (src, dst) = (a[0].clone(), a[1].clone());
                if upper_name == "RENAME" {
                    Command::Rename { src, dst }
                } else {
                    Command::RenameNx { src, dst }
                }
            }
            "EXPIRE" | "PEXPIRE" | "EXPIREAT" | "PEXPIREAT" => {
                exact(name, a, 2)?;
                let (when, command): (fn(i64) -> Expiry, &'static str) = match upper_name.as_str() {
                    "EXPIRE" => (Expiry::In, "expire"),
                    "PEXPIRE" => (Expiry::In, "pexpire"),
                    "EXPIREAT" => (Expiry::At, "expireat"),
                    _ => (Expiry::At, "pexpireat"),
                };
                let scale = if command.starts_with('p') { 1 } else { 1000 };
                let amount = parse_i64(&a[1])?
                    .checked_mul(scale)
                    .ok_or_else(|| CommandError::InvalidExpireTime(command.to_string()))?;
                Command::Expire { key: a[0].clone(), when: when(amount), name: command }
            }
            "TTL" | "PTTL" => {
                exact(name, a, 1)?;
                let unit = if upper_name == "TTL" { TtlUnit::Seconds } else { TtlUnit::Millis };
                Command::Ttl { key: a[0].clone(), unit }
            }
            "PERSIST" => {
                exact(name, a, 1)?;
                Command::Persist(a[0].clone())
            }
            "DBSIZE" => {
                exact(name, a, 0)?;
                Command::DbSize
            }
            "FLUSHDB" | "FLUSHALL" => {
                arity(name, a, 0, Some(1))?;
                if let Some(mode) = a.first() {
                    if !matches!(upper(mode).as_str(), "ASYNC" | "SYNC") {
                        return Err(CommandError::Syntax);
                    }
                }
                Command::FlushDb
            }

            "GET" => {
                exact(name, a, 1)?;
                Command::Get(a[0].clone())
            }
            "SET" => {
                arity(name, a, 2, None)?;
                Command::Set { key: a[0].clone(), value: a[1].clone(), opts: parse_set_options(&a[2..])? }
            }
            "GETSET" => {
                exact(name, a, 2)?;
                Command::GetSet { key: a[0].clone(), value: a[1].clone() }
            }
            "MGET" => {
                arity(name, a, 1, None)?;
                Command::MGet(args)
            }
            "MSET" => {
                if a.is_empty() || a.len() % 2 != 0 {
                    return Err(CommandError::WrongArity(name.to_ascii_lowercase()));
                }
                Command::MSet(pairs(a))
            }
            "APPEND" => {
                exact(name, a, 2)?;
                Command::Append { key: a[0].clone(), value: a[1].clone() }
            }
            "STRLEN" => {
                exact(name, a, 1)?;
                Command::Strlen(a[0].clone())
            }
            "GETRANGE" | "SUBSTR" => {
                exact(name, a, 3)?;
                Command::GetRange { key: a[0].clone(), start: parse_i64(&a[1])?, end: parse_i64(&a[2])? }
            }
            "SETRANGE" => {
                exact(name, a, 3)?;
                let offset = parse_i64(&a[1])?;
                let offset = usize::try_from(offset).map_err(|_| CommandError::OffsetOutOfRange)?;
                if offset > MAX_STRING_LEN {
                    return Err(CommandError::StringTooLong);
                }
                Command::SetRange { key: a[0].clone(), offset, value: a[2].clone() }
            }
            "INCR" | "DECR" => {
                exact(name, a, 1)?;
                let delta = if upper_name == "INCR" { 1 } else { -1 };
                Command::IncrBy { key: a[0].clone(), delta }
            }
            "INCRBY" | "DECRBY" => {
                exact(name, a, 2)?;
                let by = parse_i64(&a[1])?;
                let delta = if upper_name == "INCRBY" {
                    by
                } else {
                    by.checked_neg().ok_or(CommandError::Overflow)?
                };
                Command::IncrBy { key: a[0].clone(), delta }
            }
            "INCRBYFLOAT" => {
                exact(name, a, 2)?;
                Command::IncrByFloat { key: a[0].clone(), delta: parse_f64(&a[1])? }
            }

            "HSET" | "HMSET" => {
                if a.len() < 3 || a.len() % 2 == 0 {
                    return Err(CommandError::WrongArity(name.to_ascii_lowercase()));
                }
                Command::HSet { key: a[0].clone(), pairs: pairs(&a[1..]), reply_ok: upper_name == "HMSET" }
            }
            "HSETNX" => {
                exact(name, a, 3)?;
                Command::HSetNx { key: a[0].clone(), field: a[1].clone(), value: a[2].clone() }
            }
            "HGET" => {
                exact(name, a, 2)?;
                Command::HGet { key: a[0].clone(), field: a[1].clone() }
            }
            "HMGET" => {
                arity(name, a, 2, None)?;
                Command::HMGet { key: a[0].clone(), fields: a[1..].to_vec() }
            }
            "HDEL" => {
                arity(name, a, 2, None)?;
                Command::HDel { key: a[0].clone(), fields: a[1..].to_vec() }
            }
            "HEXISTS" => {
                exact(name, a, 2)?;
                Command::HExists { key: a[0].clone(), field: a[1].clone() }
            }
            "HLEN" | "HKEYS" | "HVALS" | "HGETALL" => {
                exact(name, a, 1)?;
                let key = a[0].clone();
                match upper_name.as_str() {
                    "HLEN" => Command::HLen(key),
                    "HKEYS" => Command::HKeys(key),
                    "HVALS" => Command::HVals(key),
                    _ => Command::HGetAll(key),
                }
            }
            "HINCRBY" => {
                exact(name, a, 3)?;
                Command::HIncrBy { key: a[0].clone(), field: a[1].clone(), delta: parse_i64(&a[2])? }
            }

            "LPUSH" | "RPUSH" => {
                arity(name, a, 2, None)?;
                let end = if upper_name == "LPUSH" { End::Left } else { End::Right };
                Command::Push { key: a[0].clone(), end, values: a[1..].to_vec() }
            }
            "LPOP" | "RPOP" => {
                arity(name, a, 1, Some(2))?;
                let end = if upper_name == "LPOP" { End::Left } else { End::Right };
                let count = a.get(1).map(|raw| non_negative(raw)).transpose()?;
                Command::Pop { key: a[0].clone(), end, count }
            }
            "LRANGE" => {
                exact(name, a, 3)?;
                Command::LRange { key: a[0].clone(), start: parse_i64(&a[1])?, stop: parse_i64(&a[2])? }
            }
            "LINDEX" => {
                exact(name, a, 2)?;
                Command::LIndex { key: a[0].clone(), index: parse_i64(&a[1])? }
            }
            "LSET" => {
                exact(name, a, 3)?;
                Command::LSet { key: a[0].clone(), index: parse_i64(&a[1])?, value: a[2].clone() }
            }
            "LINSERT" => {
                exact(name, a, 4)?;
                let position = match upper(&a[1]).as_str() {
                    "BEFORE" => Position::Before,
                    "AFTER" => Position::After,
                    _ => return Err(CommandError::Syntax),
                };
                Command::LInsert { key: a[0].clone(), position, pivot: a[2].clone(), value: a[3].clone() }
            }
            "LTRIM" => {
                exact(name, a, 3)?;
                Command::LTrim { key: a[0].clone(), start: parse_i64(&a[1])?, stop: parse_i64(&a[2])? }
            }
            "LLEN" => {
                exact(name, a, 1)?;
                Command::LLen(a[0].clone())
            }

            "SADD" | "SREM" => {
                arity(name, a, 2, None)?;
                let (key, members) = (a[0].clone(), a[1..].to_vec());
                if upper_name == "SADD" {
                    Command::SAdd { key, members }
                } else {
                    Command::SRem { key, members }
                }
            }
            "SCARD" => {
                exact(name, a, 1)?;
                Command::SCard(a[0].clone())
            }
            "SISMEMBER" => {
                exact(name, a, 2)?;
                Command::SIsMember { key: a[0].clone(), member: a[1].clone() }
            }
            "SMEMBERS" => {
                exact(name, a, 1)?;
                Command::SMembers(a[0].clone())
            }
            "SMOVE" => {
                exact(name, a, 3)?;
                Command::SMove { src: a[0].clone(), dst: a[1].clone(), member: a[2].clone() }
            }
            "SPOP" => {
                arity(name, a, 1, Some(2))?;
                let count = a.get(1).map(|raw| non_negative(raw)).transpose()?;
                Command::SPop { key: a[0].clone(), count }
            }
            "SRANDMEMBER" => {
                arity(name, a, 1, Some(2))?;
                let count = a.get(1).map(|raw| parse_i64(raw)).transpose()?;
                if count.is_some_and(|n| n < 0 && n.unsigned_abs() > MAX_RANDOM_SAMPLES) {
                    return Err(CommandError::ValueOutOfRange);
                }
                Command::SRandMember { key: a[0].clone(), count }
            }
            "SDIFF" | "SINTER" | "SUNION" => {
                arity(name, a, 1, None)?;
                let op = match upper_name.as_str() {
                    "SDIFF" => SetOp::Diff,
                    "SINTER" => SetOp::Inter,
                    _ => SetOp::Union,
                };
                Command::SetAlgebra { op, keys: args }
            }

            "ZADD" => {
                arity(name, a, 3, None)?;
                let (opts, rest) = parse_zadd_options(&a[1..])?;
                if rest.is_empty() || rest.len() % 2 != 0 {
                    return Err(CommandError::Syntax);
                }
                let pairs = rest
                    .chunks_exact(2)
                    .map(|pair| Ok((parse_f64(&pair[0])?, pair[1].clone())))
                    .collect::<Result<Vec<_>, CommandError>>()?;
                Command::ZAdd { key: a[0].clone(), opts, pairs }
            }
            "ZSCORE" => {
                exact(name, a, 2)?;
                Command::ZScore { key: a[0].clone(), member: a[1].clone() }
            }
            "ZINCRBY" => {
                exact(name, a, 3)?;
                Command::ZIncrBy { key: a[0].clone(), delta: parse_f64(&a[1])?, member: a[2].clone() }
            }
            "ZCARD" => {
                exact(name, a, 1)?;
                Command::ZCard(a[0].clone())
            }
            "ZCOUNT" => {
                exact(name, a, 3)?;
                Command::ZCount { key: a[0].clone(), min: ScoreBound::parse(&a[1])?, max: ScoreBound::parse(&a[2])? }
            }
            "ZRANGE" => {
                arity(name, a, 3, None)?;
                Command::ZRange { key: a[0].clone(), opts: parse_zrange(&a[1], &a[2], &a[3..])? }
            }
            "ZRANGEBYSCORE" => {
                arity(name, a, 3, None)?;
                let mut opts = parse_zrange_flags(&a[3..], false)?;
                opts.by = RangeBy::Score { min: ScoreBound::parse(&a[1])?, max: ScoreBound::parse(&a[2])? };
                Command::ZRange { key: a[0].clone(), opts }
            }
            "ZREVRANGE" => {
                arity(name, a, 3, Some(4))?;
                let mut opts = parse_zrange_flags(&a[3..], false)?;
                if opts.limit.is_some() {
                    return Err(CommandError::Syntax);
                }
                opts.by = RangeBy::Index { start: parse_i64(&a[1])?, stop: parse_i64(&a[2])? };
                opts.rev = true;
                Command::ZRange { key: a[0].clone(), opts }
            }
            "ZRANK" | "ZREVRANK" => {
                exact(name, a, 2)?;
                Command::ZRank { key: a[0].clone(), member: a[1].clone(), rev: upper_name == "ZREVRANK" }
            }
            "ZREM" => {
                arity(name, a, 2, None)?;
                Command::ZRem { key: a[0].clone(), members: a[1..].to_vec() }
            }

            _ => return Err(CommandError::UnknownCommand(name.to_string())),
        };
        Ok(cmd)
    }

    /// Keys this command touches, so the dispatcher can lock their shards.
    pub fn keys(&self) -> KeySet<'_> {
        use Command::*;
        let keys: Vec<&[u8]> = match self {
            Ping(_) | Echo(_) => Vec::new(),
            DbSize | FlushDb => return KeySet::All,
            Del(keys) | Exists(keys) | MGet(keys) => keys.iter().map(|k| &k[..]).collect(),
            SetAlgebra { keys, .. } => keys.iter().map(|k| &k[..]).collect(),
            MSet(pairs) => pairs.iter().map(|(k, _)| &k[..]).collect(),
            Rename { src, dst } | RenameNx { src, dst } | SMove { src, dst, .. } => vec![&src[..], &dst[..]],
            Type(key) | Persist(key) | Get(key) | Strlen(key) | HLen(key) | HKeys(key) | HVals(key)
            | HGetAll(key) | LLen(key) | SCard(key) | SMembers(key) | ZCard(key) => vec![&key[..]],
            Expire { key, .. }
            | Ttl { key, .. }
            | Set { key, .. }
            | GetSet { key, .. }
            | Append { key, .. }
            | GetRange { key, .. }
            | SetRange { key, .. }
            | IncrBy { key, .. }
            | IncrByFloat { key, .. }
            | HSet { key, .. }
            | HSetNx { key, .. }
            | HGet { key, .. }
            | HMGet { key, .. }
            | HDel { key, .. }
            | HExists { key, .. }
            | HIncrBy { key, .. }
            | Push { key, .. }
            | Pop { key, .. }
            | LRange { key, .. }
            | LIndex { key, .. }
            | LSet { key, .. }
            | LInsert { key, .. }
            | LTrim { key, .. }
            | SAdd { key, .. }
            | SRem { key, .. }
            | SIsMember { key, .. }
            | SPop { key, .. }
            | SRandMember { key, .. }
            | ZAdd { key, .. }
            | ZScore { key, .. }
            | ZIncrBy { key, .. }
            | ZCount { key, .. }
            | ZRange { key, .. }
            | ZRank { key, .. }
            | ZRem { key, .. } => vec![&key[..]],
        };
        KeySet::Keys(keys)
    }
}

fn parse_set_options(args: &[Bytes]) -> Result<SetOptions, CommandError> {
    let mut opts = SetOptions::default();
    let mut iter = args.iter();
    while let Some(raw) = iter.next() {
        let flag = upper(raw);
        match flag.as_str() {
            "NX" | "XX" => {
                if opts.condition != SetCondition::Always {
                    return Err(CommandError::Syntax);
                }
                opts.condition = if flag == "NX" { SetCondition::IfAbsent } else { SetCondition::IfPresent };
            }
            "GET" => opts.get = true,
            "KEEPTTL" => {
                if opts.expiry.is_some() || opts.keep_ttl {
                    return Err(CommandError::Syntax);
                }
                opts.keep_ttl = true;
            }
            "EX" | "PX" | "EXAT" | "PXAT" => {
                if opts.expiry.is_some() || opts.keep_ttl {
                    return Err(CommandError::Syntax);
                }
                let amount = iter.next().ok_or(CommandError::Syntax)?;
                let scale = if flag.starts_with('P') { 1 } else { 1000 };
                let ms = expiry_amount(amount, scale, "set")?;
                opts.expiry = Some(if flag.ends_with("AT") { Expiry::At(ms) } else { Expiry::In(ms) });
            }
            _ => return Err(CommandError::Syntax),
        }
    }
    Ok(opts)
}

/// Leading ZADD flags; returns the options and the `score member` tail.
fn parse_zadd_options(args: &[Bytes]) -> Result<(ZAddOptions, &[Bytes]), CommandError> {
    let mut opts = ZAddOptions::default();
    let mut nx = false;
    let mut xx = false;
    let mut consumed = 0;
    for raw in args {
        match upper(raw).as_str() {
            "NX" => nx = true,
            "XX" => xx = true,
            "CH" => opts.changed = true,
            _ => break,
        }
        consumed += 1;
    }
    opts.condition = match (nx, xx) {
        (true, true) => return Err(CommandError::ConflictingConditions),
        (true, false) => SetCondition::IfAbsent,
        (false, true) => SetCondition::IfPresent,
        (false, false) => SetCondition::Always,
    };
    Ok((opts, &args[consumed..]))
}

/// Trailing ZRANGE-family flags. `by` is filled in by the caller.
fn parse_zrange_flags(args: &[Bytes], allow_mode_flags: bool) -> Result<ZRangeOptions, CommandError> {
    let mut opts = ZRangeOptions {
        by: RangeBy::Index { start: 0, stop: -1 },
        rev: false,
        limit: None,
        with_scores: false,
    };
    let mut by_score = false;
    let mut i = 0;
    while i < args.len() {
        match upper(&args[i]).as_str() {
            "WITHSCORES" => opts.with_scores = true,
            "LIMIT" => {
                let (offset, count) = match (args.get(i + 1), args.get(i + 2)) {
                    (Some(o), Some(c)) => (parse_i64(o)?, parse_i64(c)?),
                    _ => return Err(CommandError::Syntax),
                };
                opts.limit = Some((offset, count));
                i += 2;
            }
            "BYSCORE" if allow_mode_flags => by_score = true,
            "REV" if allow_mode_flags => opts.rev = true,
            _ => return Err(CommandError::Syntax),
        }
        i += 1;
    }
    if by_score {
        // Placeholder bounds; the caller replaces them.
        let all = ScoreBound { value: f64::NEG_INFINITY, exclusive: false };
        opts.by = RangeBy::Score { min: all, max: all };
    }
    Ok(opts)
}

/// ZRANGE key start stop [BYSCORE] [REV] [LIMIT offset count] [WITHSCORES]
fn parse_zrange(start: &[u8], stop: &[u8], flags: &[Bytes]) -> Result<ZRangeOptions, CommandError> {
    let mut opts = parse_zrange_flags(flags, true)?;
    match opts.by {
        RangeBy::Score { .. } => {
            let (first, second) = (ScoreBound::parse(start)?, ScoreBound::parse(stop)?);
            let (min, max) = if opts.rev { (second, first) } else { (first, second) };
            opts.by = RangeBy::Score { min, max };
        }
        RangeBy::Index { .. } => {
            if opts.limit.is_some() {
                return Err(CommandError::Syntax);
            }
            opts.by = RangeBy::Index { start: parse_i64(start)?, stop: parse_i64(stop)? };
        }
    }
    Ok(opts)
}
