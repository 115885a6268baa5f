//! Shared state handed to every axum handler and session task.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use vncache_core::config::NetworkConfig;
use vncache_core::crypto::AuthenticationManager;
use vncache_store::{CacheTable, ChangeEventFanOut};

use crate::discovery::{DiscoveryManager, NodeCollection};

/// A negotiation in flight between step 1 (challenge/negotiation JWT) and
/// step 2 (upgrade signature) of the handshake.
pub struct PendingNegotiation {
    pub negotiation_jwt: String,
    pub is_peer: bool,
    /// The client's self-asserted `sub` claim, if it set one. Used to key
    /// this session's change-event subscription so a reconnect resumes
    /// the same queue instead of starting a fresh one.
    pub subscriber_key: Option<String>,
    pub remote_addr: std::net::SocketAddr,
    pub issued_at: Instant,
}

pub struct AppState {
    pub node_id: String,
    pub network: NetworkConfig,
    pub auth: Arc<AuthenticationManager>,
    pub table: Arc<CacheTable>,
    pub fanout: Arc<ChangeEventFanOut>,
    pub collection: Arc<NodeCollection>,
    pub discovery: Arc<DiscoveryManager>,
    /// Keyed by the client's `chl` challenge.
    pub pending: DashMap<String, PendingNegotiation>,
}

impl AppState {
    /// Drops pending negotiations older than this so a client that never
    /// completes the handshake doesn't leak an entry forever.
    pub fn sweep_stale_pending(&self, max_age: std::time::Duration) {
        self.pending
            .retain(|_, p| p.issued_at.elapsed() < max_age);
    }
}
