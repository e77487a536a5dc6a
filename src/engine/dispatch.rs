// src/engine/dispatch.rs

//! Runs a parsed [`Command`] against the shards its caller already locked
//! and shapes the result into a [`Reply`].

use bytes::Bytes;

use crate::engine::command::Command;
use crate::engine::keyspace::KeyLocks;
use crate::engine::reply::Reply;
use crate::error::CommandError;
use crate::expire;
use crate::types::{hash, list, set, string, zset};

pub fn apply(cmd: Command, locks: &mut KeyLocks<'_>) -> Result<Reply, CommandError> {
    let reply: Reply = match cmd {
        // --- connection ---
        Command::Ping(None) => Reply::Status("PONG"),
        Command::Ping(Some(msg)) | Command::Echo(msg) => Reply::bulk(msg),

        // --- keys ---
        Command::Del(keys) => Reply::int(locks.del(&keys)),
        Command::Exists(keys) => Reply::int(locks.exists(&keys)),
        Command::Type(key) => Reply::Status(locks.kind(&key).map_or("none", |k| k.as_str())),
        Command::Rename { src, dst } => {
            locks.rename(&src, &dst)?;
            Reply::ok()
        }
        Command::RenameNx { src, dst } => Reply::flag(locks.rename_nx(&src, &dst)?),
        Command::Expire { key, when, name } => Reply::flag(expire::expire(locks, &key, when, name)?),
        Command::Ttl { key, unit } => Reply::Integer(expire::ttl(locks, &key, unit)),
        Command::Persist(key) => Reply::flag(expire::persist(locks, &key)),
        Command::DbSize => Reply::int(locks.key_count()),
        Command::FlushDb => {
            locks.clear();
            Reply::ok()
        }

        // --- strings ---
        Command::Get(key) => string::get(locks, &key)?.into(),
        Command::Set { key, value, opts } => {
            let outcome = string::set(locks, &key, value, &opts)?;
            if opts.get {
                outcome.previous.into()
            } else if outcome.written {
                Reply::ok()
            } else {
                Reply::null()
            }
        }
        Command::GetSet { key, value } => string::getset(locks, &key, value)?.into(),
        Command::MGet(keys) => Reply::nullable_array(string::mget(locks, &keys)),
        Command::MSet(pairs) => {
            string::mset(locks, &pairs);
            Reply::ok()
        }
        Command::Append { key, value } => Reply::int(string::append(locks, &key, &value)?),
        Command::Strlen(key) => Reply::int(string::strlen(locks, &key)?),
        Command::GetRange { key, start, end } => Reply::bulk(string::getrange(locks, &key, start, end)?),
        Command::SetRange { key, offset, value } => Reply::int(string::setrange(locks, &key, offset, &value)?),
        Command::IncrBy { key, delta } => Reply::Integer(string::incr_by(locks, &key, delta)?),
        Command::IncrByFloat { key, delta } => Reply::bulk(string::incr_by_float(locks, &key, delta)?),

        // --- hashes ---
        Command::HSet { key, pairs, reply_ok } => {
            let created = hash::hset(locks, &key, &pairs)?;
            if reply_ok { Reply::ok() } else { Reply::int(created) }
        }
        Command::HSetNx { key, field, value } => Reply::flag(hash::hsetnx(locks, &key, field, value)?),
        Command::HGet { key, field } => hash::hget(locks, &key, &field)?.into(),
        Command::HMGet { key, fields } => Reply::nullable_array(hash::hmget(locks, &key, &fields)?),
        Command::HDel { key, fields } => Reply::int(hash::hdel(locks, &key, &fields)?),
        Command::HExists { key, field } => Reply::flag(hash::hexists(locks, &key, &field)?),
        Command::HLen(key) => Reply::int(hash::hlen(locks, &key)?),
        Command::HKeys(key) => Reply::array(hash::hkeys(locks, &key)?),
        Command::HVals(key) => Reply::array(hash::hvals(locks, &key)?),
        Command::HGetAll(key) => Reply::array(hash::hgetall(locks, &key)?),
        Command::HIncrBy { key, field, delta } => Reply::Integer(hash::hincrby(locks, &key, field, delta)?),

        // --- lists ---
        Command::Push { key, end, values } => Reply::int(list::push(locks, &key, end, &values)?),
        Command::Pop { key, end, count: None } => list::pop(locks, &key, end)?.into(),
        Command::Pop { key, end, count: Some(n) } => match list::pop_many(locks, &key, end, n)? {
            Some(values) => Reply::array(values),
            None => Reply::null(),
        },
        Command::LRange { key, start, stop } => Reply::array(list::range(locks, &key, start, stop)?),
        Command::LIndex { key, index } => list::index(locks, &key, index)?.into(),
        Command::LSet { key, index, value } => {
            list::set(locks, &key, index, value)?;
            Reply::ok()
        }
        Command::LInsert { key, position, pivot, value } => {
            Reply::Integer(list::insert(locks, &key, position, &pivot, value)?)
        }
        Command::LTrim { key, start, stop } => {
            list::trim(locks, &key, start, stop)?;
            Reply::ok()
        }
        Command::LLen(key) => Reply::int(list::len(locks, &key)?),

        // --- sets ---
        Command::SAdd { key, members } => Reply::int(set::sadd(locks, &key, &members)?),
        Command::SRem { key, members } => Reply::int(set::srem(locks, &key, &members)?),
        Command::SCard(key) => Reply::int(set::scard(locks, &key)?),
        Command::SIsMember { key, member } => Reply::flag(set::sismember(locks, &key, &member)?),
        Command::SMembers(key) => Reply::array(set::smembers(locks, &key)?),
        Command::SMove { src, dst, member } => Reply::flag(set::smove(locks, &src, &dst, member)?),
        Command::SPop { key, count: None } => {
            set::spop(locks, &key, 1)?.and_then(|mut v| v.pop()).into()
        }
        Command::SPop { key, count: Some(n) } => Reply::array(set::spop(locks, &key, n)?.unwrap_or_default()),
        Command::SRandMember { key, count: None } => {
            set::srandmember(locks, &key, 1)?.and_then(|mut v| v.pop()).into()
        }
        Command::SRandMember { key, count: Some(n) } => {
            Reply::array(set::srandmember(locks, &key, n)?.unwrap_or_default())
        }
        Command::SetAlgebra { op, keys } => Reply::array(set::combine(locks, op, &keys)?),

        // --- sorted sets ---
        Command::ZAdd { key, opts, pairs } => Reply::int(zset::zadd(locks, &key, opts, &pairs)?),
        Command::ZScore { key, member } => Reply::opt_score(zset::zscore(locks, &key, &member)?),
        Command::ZIncrBy { key, delta, member } => Reply::score(zset::zincrby(locks, &key, delta, member)?),
        Command::ZCard(key) => Reply::int(zset::zcard(locks, &key)?),
        Command::ZCount { key, min, max } => Reply::int(zset::zcount(locks, &key, min, max)?),
        Command::ZRange { key, opts } => {
            let hits = zset::zrange(locks, &key, &opts)?;
            if opts.with_scores {
                Reply::Array(
                    hits.into_iter()
                        .flat_map(|(member, score)| [Reply::bulk(member), Reply::score(score)])
                        .collect(),
                )
            } else {
                Reply::array(hits.into_iter().map(|(member, _)| member))
            }
        }
        Command::ZRank { key, member, rev } => match zset::zrank(locks, &key, &member, rev)? {
            Some(rank) => Reply::int(rank),
            None => Reply::null(),
        },
        Command::ZRem { key, members } => Reply::int(zset::zrem(locks, &key, &members)?),
    };
    Ok(reply)
}

/// Convenience for tests and callers that already hold raw byte arguments.
pub fn bytes_args<I, S>(args: I) -> Vec<Bytes>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    args.into_iter()
        .map(|a| Bytes::copy_from_slice(a.as_ref()))
        .collect()
}
