//! vncached — the VNCache node daemon binary.

use anyhow::{Context, Result};

use vncache_core::config::NodeConfig;
use vncached::KeyMaterial;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = NodeConfig::load().context("failed to load node configuration")?;

    let keys = KeyMaterial {
        own_private_pem: std::fs::read_to_string(&config.auth.cache_private_key_path)
            .with_context(|| {
                format!(
                    "failed to read cache_private_key_path {:?}",
                    config.auth.cache_private_key_path
                )
            })?,
        client_public_pem: std::fs::read_to_string(&config.auth.client_public_key_path)
            .with_context(|| {
                format!(
                    "failed to read client_public_key_path {:?}",
                    config.auth.client_public_key_path
                )
            })?,
        peer_public_pem: std::fs::read_to_string(&config.auth.peer_public_key_path)
            .with_context(|| {
                format!(
                    "failed to read peer_public_key_path {:?}",
                    config.auth.peer_public_key_path
                )
            })?,
    };

    vncached::serve(config, keys).await
}
