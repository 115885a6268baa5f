//! Shared connection configuration parsed from CLI flags.

use std::fs;

use anyhow::{Context, Result};

use vncache_core::crypto::{KeyAlgorithm, SigningKey, VerifyingKey};
use vncache_client::ClientIdentity;

/// Everything every command needs to reach one node: where it is, which
/// paths it serves, and the key material to prove this caller's identity
/// and verify the node's own signatures.
pub struct Config {
    pub url: String,
    pub connect_path: String,
    pub well_known_path: Option<String>,
    pub discovery_path: Option<String>,
    pub key_path: String,
    pub server_key_path: String,
    pub alg: String,
    pub peer_id: Option<String>,
}

impl Config {
    pub fn identity(&self) -> Result<ClientIdentity> {
        let alg = KeyAlgorithm::parse(&self.alg)
            .with_context(|| format!("unrecognized --alg {:?}", self.alg))?;
        let private_pem = fs::read_to_string(&self.key_path)
            .with_context(|| format!("failed to read --key {:?}", self.key_path))?;
        let server_pem = fs::read_to_string(&self.server_key_path)
            .with_context(|| format!("failed to read --server-key {:?}", self.server_key_path))?;

        let signing = SigningKey::from_pkcs8_pem(&private_pem, alg)
            .context("--key is not a valid PKCS#8 private key for --alg")?;
        let server_key = VerifyingKey::from_public_pem(&server_pem, alg)
            .context("--server-key is not a valid public key for --alg")?;
        Ok(ClientIdentity::new(signing, server_key))
    }
}
