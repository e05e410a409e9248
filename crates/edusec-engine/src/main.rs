//! edusecd - EduSec role-security daemon

use anyhow::Context;
use edusec_common::InMemoryRecordStore;
use edusec_engine::{ConfigError, EngineConfig, SecurityEngine, DEFAULT_CONFIG_PATH};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("edusecd v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("EDUSEC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let config = match EngineConfig::load(&config_path) {
        Ok(config) => config,
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %config_path, "config not found, using defaults");
            EngineConfig::default()
        }
        Err(e) => return Err(e).with_context(|| format!("loading {config_path}")),
    };

    let store = Arc::new(InMemoryRecordStore::new());
    let engine = SecurityEngine::new(store, config)?;
    engine.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    let flushed = engine.shutdown().await?;
    tracing::info!(flushed, "edusecd stopped");
    Ok(())
}
