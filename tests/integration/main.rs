//! End-to-end tests against a real running node: `vncached::serve_with_listener`
//! bound to an ephemeral localhost port, driven through `vncache-client`.
//! Each test gets its own node and its own generated key material so tests
//! can run concurrently without interfering.

mod cache_ops;
mod events;
mod handshake;

use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair};
use tokio::net::TcpListener;

use vncache_client::ClientIdentity;
use vncache_core::config::NodeConfig;
use vncache_core::crypto::{KeyAlgorithm, SigningKey, VerifyingKey};
use vncached::KeyMaterial;

/// An ECDSA P-256 PKCS#8 keypair, PEM-encoded both ways.
pub struct TestKeypair {
    pub private_pem: String,
    pub public_pem: String,
}

pub fn generate_keypair() -> TestKeypair {
    let rng = SystemRandom::new();
    let doc =
        EcdsaKeyPair::generate_pkcs8(&ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .unwrap();
    let private_pem = pem_wrap("PRIVATE KEY", doc.as_ref());

    let pair = EcdsaKeyPair::from_pkcs8(
        &ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING,
        doc.as_ref(),
        &rng,
    )
    .unwrap();
    let public_pem = pem_wrap("PUBLIC KEY", &ec_point_to_spki_der(pair.public_key().as_ref()));

    TestKeypair { private_pem, public_pem }
}

fn pem_wrap(label: &str, der: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap());
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

/// Wraps a raw EC point as an SPKI `SubjectPublicKeyInfo` DER document, the
/// shape `jsonwebtoken`'s `from_ec_pem` and `ring`'s DER parsing both expect
/// for a public key PEM.
fn ec_point_to_spki_der(point: &[u8]) -> Vec<u8> {
    const ALG_ID: &[u8] = &[
        0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a, 0x86,
        0x48, 0xce, 0x3d, 0x03, 0x01, 0x07,
    ];
    let mut bitstring = vec![0x03, (point.len() + 1) as u8, 0x00];
    bitstring.extend_from_slice(point);
    let mut body = Vec::new();
    body.extend_from_slice(ALG_ID);
    body.extend_from_slice(&bitstring);
    let mut der = vec![0x30, body.len() as u8];
    der.extend_from_slice(&body);
    der
}

/// A node running in the background, plus the key material its clients
/// need to talk to it.
pub struct TestNode {
    pub base_url: String,
    pub connect_path: String,
    pub client_key: TestKeypair,
    pub peer_key: TestKeypair,
    pub node_key: TestKeypair,
}

impl TestNode {
    pub fn client_identity(&self) -> ClientIdentity {
        let signing = SigningKey::from_pkcs8_pem(
            &self.client_key.private_pem,
            KeyAlgorithm::EcdsaP256Sha256,
        )
        .unwrap();
        let server_key =
            VerifyingKey::from_public_pem(&self.node_key.public_pem, KeyAlgorithm::EcdsaP256Sha256)
                .unwrap();
        ClientIdentity::new(signing, server_key)
    }
}

pub async fn spawn_node() -> TestNode {
    let node_key = generate_keypair();
    let client_key = generate_keypair();
    let peer_key = generate_keypair();

    let mut config = NodeConfig::default();
    config.identity.node_id = "test-node".to_string();
    config.network.connect_path = "/connect".to_string();
    config.network.well_known_path = "/.well-known/vncache".to_string();
    config.network.discovery_path = String::new();
    config.network.recv_buffer_size = 64 * 1024;
    config.network.max_header_buffer_size = 8 * 1024;
    config.network.max_message_size = 1 << 20;
    config.store.bucket_count = 4;
    config.store.max_cache_entries = 1024;
    config.auth.key_algorithm = "ecdsa-p256-sha256".to_string();

    let keys = KeyMaterial {
        own_private_pem: node_key.private_pem.clone(),
        client_public_pem: client_key.public_pem.clone(),
        peer_public_pem: peer_key.public_pem.clone(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(vncached::serve_with_listener(listener, config, keys));

    // The accept loop starts inside the spawned task; give it a moment to
    // be scheduled before the first connection attempt.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    TestNode {
        base_url: format!("http://{addr}"),
        connect_path: "/connect".to_string(),
        client_key,
        peer_key,
        node_key,
    }
}
