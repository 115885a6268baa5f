//! `advertisement`/`discover`: read-only views onto a node's membership
//! endpoints, independent of the wire protocol connection.

use anyhow::{Context, Result};

use vncache_core::crypto::generate_nonce;
use vncache_core::wire::{DiscoveryRequestClaims, DiscoveryResponseClaims, PeerAdvertisement};

use super::config::Config;

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn print_advertisement(ad: &PeerAdvertisement) {
    println!("┌─ {}", ad.iss);
    println!("│  url   : {}", ad.url);
    println!("│  dis   : {}", if ad.dis.is_empty() { "(none)" } else { &ad.dis });
    println!("└─ iat   : {}", ad.iat);
}

pub async fn cmd_advertisement(config: &Config) -> Result<()> {
    let path = config
        .well_known_path
        .as_deref()
        .context("--well-known-path is required for this command")?;
    let identity = config.identity()?;

    let token = reqwest::get(format!("{}{path}", config.url))
        .await
        .with_context(|| format!("failed to connect to {} — is the node running?", config.url))?
        .error_for_status()?
        .text()
        .await?;
    let ad: PeerAdvertisement = identity
        .server_key
        .verify_jwt(&token)
        .context("advertisement failed signature verification")?;

    print_advertisement(&ad);
    Ok(())
}

pub async fn cmd_discover(config: &Config) -> Result<()> {
    let path = config
        .discovery_path
        .as_deref()
        .context("--discovery-path is required for this command")?;
    let identity = config.identity()?;

    let request = DiscoveryRequestClaims {
        iat: unix_now(),
        nonce: generate_nonce(),
    };
    let request_token = identity.signing.sign_jwt(&request)?;

    let response_token = reqwest::Client::new()
        .post(format!("{}{path}", config.url))
        .bearer_auth(request_token)
        .send()
        .await
        .with_context(|| format!("failed to connect to {} — is the node running?", config.url))?
        .error_for_status()?
        .text()
        .await?;
    let response: DiscoveryResponseClaims = identity
        .server_key
        .verify_jwt(&response_token)
        .context("discovery response failed signature verification")?;

    println!("{} peer(s) known to this node:", response.peers.len());
    for ad in &response.peers {
        print_advertisement(ad);
    }
    Ok(())
}
