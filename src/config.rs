// src/config.rs

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::warn;

/// 进程启动后读到的全局配置
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// 监听地址
    pub host: String,
    pub port: u16,
    /// Bearer token required on every command request
    pub token: String,
    /// Keyspace 分片数
    pub shards: usize,
    /// 主动过期的扫描周期（毫秒）
    pub sweep_interval_ms: u64,
    /// 每轮每个分片最多抽样的带 TTL 键数
    pub sweep_sample_size: usize,
    // 监控配置
    pub metrics_enabled: bool,
    pub slowlog_threshold_ms: u64,
    /// 请求体上限（字节）
    pub max_body_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 3000,
            token: String::new(),
            shards: 16,
            sweep_interval_ms: 100,
            sweep_sample_size: 20,
            metrics_enabled: true,
            slowlog_threshold_ms: 10,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.token.is_empty() {
            bail!("token cannot be empty (set it in the config file, --token or CRAB_STASH_TOKEN)");
        }
        if self.shards == 0 {
            bail!("shards must be greater than 0");
        }
        if self.sweep_interval_ms == 0 || self.sweep_sample_size == 0 {
            bail!("sweep_interval_ms and sweep_sample_size must be greater than 0");
        }
        if self.max_body_bytes == 0 {
            bail!("max_body_bytes must be greater than 0");
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The token with everything after its first few characters hidden, for logs.
    pub fn masked_token(&self) -> String {
        let visible = if self.token.chars().count() <= 8 { 1 } else { 8 };
        let head: String = self.token.chars().take(visible).collect();
        format!("{head}***")
    }
}

/// 从指定路径读取并反序列化 JSON 配置
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();

    // 如果配置文件不存在，创建默认配置
    if !path_ref.exists() {
        warn!(path = %path_ref.display(), "config file not found, writing defaults");

        let default_cfg = Config::default();
        let default_json = serde_json::to_string_pretty(&default_cfg)?;
        fs::write(path_ref, default_json)
            .with_context(|| format!("Failed to write default config {:?}", path_ref))?;

        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read config file {:?}", path_ref))?;
    let cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse {:?}", path_ref))?;
    Ok(cfg)
}

/// Command line. Flags override the file.
#[derive(Parser, Debug, Clone)]
#[command(name = "crab-stash", version, about = "In-memory Redis-style store over HTTP")]
pub struct Cli {
    /// Path of the JSON config file
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(short, long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub shards: Option<usize>,

    #[arg(long, env = "CRAB_STASH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl Cli {
    /// Load the config file named by `--config` and apply the overrides.
    pub fn load_config(&self) -> Result<Config> {
        let mut cfg = load(&self.config)?;
        self.apply(&mut cfg);
        Ok(cfg)
    }

    pub fn apply(&self, cfg: &mut Config) {
        if let Some(host) = &self.host {
            cfg.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(shards) = self.shards {
            cfg.shards = shards;
        }
        if let Some(token) = &self.token {
            cfg.token = token.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_writes_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        let cfg = load(&path)?;
        assert_eq!(cfg, Config::default());
        assert!(path.exists());
        // 再读一次得到同样的配置
        assert_eq!(load(&path)?, cfg);
        Ok(())
    }

    #[test]
    fn partial_file_falls_back_to_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"token":"abc","port":4000}"#)?;
        let cfg = load(&path)?;
        assert_eq!(cfg.token, "abc");
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.shards, 16);
        Ok(())
    }

    #[test]
    fn malformed_file_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json")?;
        assert!(load(&path).is_err());
        Ok(())
    }

    #[test]
    fn validation_rules() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_err());
        cfg.token = "t".into();
        assert!(cfg.validate().is_ok());
        cfg.shards = 0;
        assert!(cfg.validate().is_err());
        cfg.shards = 4;
        cfg.sweep_sample_size = 0;
        assert!(cfg.validate().is_err());
        cfg.sweep_sample_size = 1;
        cfg.max_body_bytes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cli_overrides_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("c.json");
        let path_arg = path.to_string_lossy().to_string();
        let cli = Cli::try_parse_from([
            "crab-stash", "--config", &path_arg, "--port", "7000", "--shards", "2", "--token", "tok",
        ])?;
        let cfg = cli.load_config()?;
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.shards, 2);
        assert_eq!(cfg.token, "tok");
        assert_eq!(cfg.server_address(), "0.0.0.0:7000");
        Ok(())
    }

    #[test]
    fn token_masking() {
        let mut cfg = Config { token: "abcdefghijkl".into(), ..Config::default() };
        assert_eq!(cfg.masked_token(), "abcdefgh***");
        cfg.token = "short".into();
        assert_eq!(cfg.masked_token(), "s***");
    }
}
