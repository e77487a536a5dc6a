// src/lib.rs
//! crab-stash 库：engine / types / expire / auth / server / monitor / config

pub mod auth;      // Bearer token 校验
pub mod config;    // JSON 配置 + 命令行
pub mod engine;    // 分片 keyspace、命令解析与分发
pub mod error;     // 错误类型
pub mod expire;    // 过期策略
pub mod monitor;   // 监控
pub mod server;    // HTTP 层
pub mod types;     // String / Hash / List / Set / ZSet 数据结构

pub use engine::{Engine, Reply};
pub use error::{AuthError, CommandError, EngineError, ErrorKind};
