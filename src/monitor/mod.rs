// src/monitor/mod.rs
//! 监控与诊断模块
mod metrics;

use std::sync::atomic::{AtomicU64, Ordering};
use dashmap::DashMap;

pub use metrics::Metrics;
