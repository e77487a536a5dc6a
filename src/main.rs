// src/main.rs
use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crab_stash::{config::Cli, engine::Engine, expire, server};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = cli.load_config()?;
    cfg.validate()?;
    info!(
        config = %cli.config.display(),
        shards = cfg.shards,
        token = %cfg.masked_token(),
        "starting crab-stash"
    );

    let engine = Engine::new(&cfg);

    // 后台主动过期
    tokio::spawn(expire::start_cleaner(
        engine.keyspace().clone(),
        cfg.sweep_interval_ms,
        cfg.sweep_sample_size,
    ));

    server::start(engine, &cfg)
        .await
        .inspect_err(|e| error!(error = %e, "server stopped"))
}
