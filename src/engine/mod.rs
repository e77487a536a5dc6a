// src/engine/mod.rs

//! # 引擎模块
//!
//! `engine` 是整个服务的核心。它：
//! - 从传输层接收命令名和参数（`&str` + `Vec<Bytes>`）。
//! - 通过 `AuthGate` 校验凭证。
//! - 把命令解析成 `Command`，锁住涉及的分片，再交给 `types` 下的各类型模块执行。
//! - 返回与传输无关的 `Reply`；展示格式由传输层决定。
pub mod command;
pub mod dispatch;
pub mod keyspace;
pub mod reply;

pub use command::{Command, KeySet};
pub use keyspace::Keyspace;
pub use reply::Reply;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::auth::AuthGate;
use crate::config::Config;
use crate::error::{AuthError, CommandError, EngineError};
use crate::monitor::Metrics;

/// Shared handle to the store. Cloning is cheap; clones see the same data.
#[derive(Clone, Debug)]
pub struct Engine {
    keyspace: Arc<Keyspace>,
    auth: AuthGate,
    metrics: Arc<Metrics>,
    slow_threshold: Duration,
}

impl Engine {
    pub fn new(cfg: &Config) -> Self {
        Engine {
            keyspace: Arc::new(Keyspace::new(cfg.shards)),
            auth: AuthGate::new(&cfg.token),
            metrics: Arc::new(Metrics::new()),
            slow_threshold: Duration::from_millis(cfg.slowlog_threshold_ms),
        }
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Check a bearer credential. Rejections are counted in the metrics.
    pub fn authenticate(&self, credential: Option<&str>) -> Result<(), AuthError> {
        self.auth.verify(credential).inspect_err(|_| self.metrics.record_auth_failure())
    }

    /// Authenticate, then run one command.
    pub fn execute(&self, name: &str, args: Vec<Bytes>, credential: Option<&str>) -> Result<Reply, EngineError> {
        self.authenticate(credential)?;
        Ok(self.dispatch(name, args)?)
    }

    /// Run one command that the caller has already authenticated.
    ///
    /// The command's shards stay locked from the first read to the reply, so
    /// each command is atomic with respect to every other command.
    pub fn dispatch(&self, name: &str, args: Vec<Bytes>) -> Result<Reply, CommandError> {
        let started = Instant::now();
        let label = name.to_ascii_uppercase();

        let result = Command::parse(name, args).and_then(|cmd| {
            let mut locks = match cmd.keys() {
                KeySet::Keys(keys) => self.keyspace.lock(&keys),
                KeySet::All => self.keyspace.lock_all(),
            };
            dispatch::apply(cmd, &mut locks)
        });

        let elapsed = started.elapsed();
        self.metrics.record_command(&label, result.is_ok());
        match &result {
            Ok(_) => debug!(command = %label, ?elapsed, "command executed"),
            Err(err) => debug!(command = %label, ?elapsed, error = %err, "command failed"),
        }
        if elapsed >= self.slow_threshold {
            warn!(command = %label, elapsed_ms = elapsed.as_millis() as u64, "slow command");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dispatch::bytes_args;

    fn engine() -> Engine {
        Engine::new(&Config { token: "secret".into(), shards: 4, ..Config::default() })
    }

    fn run(engine: &Engine, parts: &[&str]) -> Result<Reply, CommandError> {
        engine.dispatch(parts[0], bytes_args(&parts[1..]))
    }

    fn bulk(s: &str) -> Reply {
        Reply::Bulk(Some(Bytes::copy_from_slice(s.as_bytes())))
    }

    #[test]
    fn test_string_commands() {
        let engine = engine();
        assert_eq!(run(&engine, &["SET", "foo", "bar"]), Ok(Reply::ok()));
        assert_eq!(run(&engine, &["GET", "foo"]), Ok(bulk("bar")));
        assert_eq!(run(&engine, &["DEL", "foo"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["GET", "foo"]), Ok(Reply::null()));
    }

    #[test]
    fn test_hash_commands() {
        let engine = engine();
        assert_eq!(run(&engine, &["HSET", "h", "f1", "v1"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["HGET", "h", "f1"]), Ok(bulk("v1")));
        assert_eq!(run(&engine, &["HMSET", "h", "f2", "v2"]), Ok(Reply::ok()));
        assert_eq!(run(&engine, &["HLEN", "h"]), Ok(Reply::Integer(2)));
        assert_eq!(run(&engine, &["HDEL", "h", "f1"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["HGET", "h", "f1"]), Ok(Reply::null()));
    }

    #[test]
    fn test_list_commands() {
        let engine = engine();
        assert_eq!(run(&engine, &["LPUSH", "l", "a"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["RPUSH", "l", "b"]), Ok(Reply::Integer(2)));
        assert_eq!(run(&engine, &["LRANGE", "l", "0", "-1"]), Ok(Reply::Array(vec![bulk("a"), bulk("b")])));
        assert_eq!(run(&engine, &["LPOP", "l"]), Ok(bulk("a")));
        assert_eq!(run(&engine, &["RPOP", "l"]), Ok(bulk("b")));
        assert_eq!(run(&engine, &["RPOP", "l"]), Ok(Reply::null()));
        assert_eq!(run(&engine, &["LPOP", "l", "2"]), Ok(Reply::null()));
    }

    #[test]
    fn test_set_commands() {
        let engine = engine();
        assert_eq!(run(&engine, &["SADD", "s", "x", "y"]), Ok(Reply::Integer(2)));
        assert_eq!(run(&engine, &["SISMEMBER", "s", "x"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["SREM", "s", "x"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["SISMEMBER", "s", "x"]), Ok(Reply::Integer(0)));
        assert_eq!(run(&engine, &["SPOP", "none"]), Ok(Reply::null()));
        assert_eq!(run(&engine, &["SPOP", "none", "3"]), Ok(Reply::Array(vec![])));
    }

    #[test]
    fn test_zset_commands() {
        let engine = engine();
        assert_eq!(run(&engine, &["ZADD", "z", "1", "a", "2", "b"]), Ok(Reply::Integer(2)));
        assert_eq!(run(&engine, &["ZSCORE", "z", "b"]), Ok(bulk("2")));
        assert_eq!(run(&engine, &["ZINCRBY", "z", "0.5", "a"]), Ok(bulk("1.5")));
        assert_eq!(
            run(&engine, &["ZRANGE", "z", "0", "-1", "WITHSCORES"]),
            Ok(Reply::Array(vec![bulk("a"), bulk("1.5"), bulk("b"), bulk("2")]))
        );
        assert_eq!(run(&engine, &["ZREVRANK", "z", "a"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["ZRANK", "z", "nope"]), Ok(Reply::null()));
    }

    #[test]
    fn test_key_commands() {
        let engine = engine();
        run(&engine, &["SET", "k", "v"]).unwrap();
        assert_eq!(run(&engine, &["TYPE", "k"]), Ok(Reply::Status("string")));
        assert_eq!(run(&engine, &["TYPE", "nope"]), Ok(Reply::Status("none")));
        assert_eq!(run(&engine, &["EXISTS", "k", "k", "nope"]), Ok(Reply::Integer(2)));
        assert_eq!(run(&engine, &["TTL", "k"]), Ok(Reply::Integer(-1)));
        assert_eq!(run(&engine, &["EXPIRE", "k", "100"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["TTL", "k"]), Ok(Reply::Integer(100)));
        assert_eq!(run(&engine, &["RENAME", "k", "k2"]), Ok(Reply::ok()));
        assert_eq!(run(&engine, &["PERSIST", "k2"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["DBSIZE"]), Ok(Reply::Integer(1)));
        assert_eq!(run(&engine, &["FLUSHDB"]), Ok(Reply::ok()));
        assert_eq!(run(&engine, &["DBSIZE"]), Ok(Reply::Integer(0)));
        assert_eq!(run(&engine, &["RENAME", "k2", "k3"]), Err(CommandError::NoSuchKey));
    }

    #[test]
    fn test_ping_echo_and_unknown() {
        let engine = engine();
        assert_eq!(run(&engine, &["PING"]), Ok(Reply::Status("PONG")));
        assert_eq!(run(&engine, &["echo", "hi"]), Ok(bulk("hi")));
        assert_eq!(
            run(&engine, &["FOO"]),
            Err(CommandError::UnknownCommand("FOO".into()))
        );
    }

    #[test]
    fn wrong_type_is_a_hard_error_and_changes_nothing() {
        let engine = engine();
        run(&engine, &["RPUSH", "l", "a"]).unwrap();
        assert_eq!(run(&engine, &["GET", "l"]), Err(CommandError::WrongType));
        assert_eq!(run(&engine, &["INCR", "l"]), Err(CommandError::WrongType));
        assert_eq!(run(&engine, &["LLEN", "l"]), Ok(Reply::Integer(1)));
    }

    #[test]
    fn execute_checks_credentials_first() {
        let engine = engine();
        let args = bytes_args(["k", "v"]);
        assert_eq!(
            engine.execute("SET", args.clone(), Some("wrong")),
            Err(EngineError::Auth(AuthError))
        );
        assert_eq!(engine.execute("SET", args.clone(), None), Err(EngineError::Auth(AuthError)));
        assert_eq!(engine.execute("GET", bytes_args(["k"]), Some("secret")), Ok(Reply::null()));
        assert_eq!(engine.execute("SET", args, Some("secret")), Ok(Reply::ok()));
        assert_eq!(engine.metrics().auth_failures.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[test]
    fn metrics_track_dispatch() {
        let engine = engine();
        run(&engine, &["set", "a", "1"]).unwrap();
        run(&engine, &["SET", "b", "2"]).unwrap();
        let _ = run(&engine, &["INCR", "nope", "x"]);
        assert_eq!(engine.metrics().command_total("SET"), 2);
        assert_eq!(engine.metrics().failed_commands.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
