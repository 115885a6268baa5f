//! Node discovery collection and peer discovery manager.
//!
//! Advertisements travel as the claims of a JWT signed with the cluster's
//! shared peer key. A `DiscoveryResponseClaims` envelope carries the whole
//! `peers` array inside one signed token rather than one signature per
//! entry — tampering a single byte of any embedded advertisement breaks the
//! envelope's own signature, so verification fails without a separate
//! per-item signature scheme. This mirrors the single signed-blob
//! convention `NegotiationClaims` already uses elsewhere in the handshake.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode as HttpStatusCode};
use axum::response::IntoResponse;
use rand::Rng;

use vncache_core::crypto::{generate_nonce, AuthenticationManager};
use vncache_core::wire::{DiscoveryRequestClaims, DiscoveryResponseClaims, PeerAdvertisement};

use crate::error::DiscoveryError;
use crate::state::AppState;

/// The cluster's known peers: a discovered set (replaced atomically by each
/// completed crawl) plus a manually-added set that discovery never evicts.
pub struct NodeCollection {
    discovered: RwLock<Arc<HashMap<String, PeerAdvertisement>>>,
    manual: RwLock<HashMap<String, PeerAdvertisement>>,
}

impl NodeCollection {
    pub fn new() -> Self {
        Self {
            discovered: RwLock::new(Arc::new(HashMap::new())),
            manual: RwLock::new(HashMap::new()),
        }
    }

    /// Atomically swaps in the result of a completed crawl. Readers that
    /// already hold a snapshot via `snapshot()` keep seeing the pre-crawl
    /// set; new callers see the post-crawl set — never a partial one.
    pub fn replace_discovered(&self, set: HashMap<String, PeerAdvertisement>) {
        *self.discovered.write().unwrap() = Arc::new(set);
    }

    pub fn snapshot_discovered(&self) -> Arc<HashMap<String, PeerAdvertisement>> {
        self.discovered.read().unwrap().clone()
    }

    pub fn add_manual(&self, ad: PeerAdvertisement) {
        self.manual
            .write()
            .unwrap()
            .insert(ad.iss.to_lowercase(), ad);
    }

    /// Enumeration is the union of both sets; a manually-added peer wins on
    /// key collision since it reflects explicit operator intent.
    pub fn enumerate(&self) -> Vec<PeerAdvertisement> {
        let discovered = self.snapshot_discovered();
        let manual = self.manual.read().unwrap();
        let mut out: HashMap<String, PeerAdvertisement> = discovered.as_ref().clone();
        for (k, v) in manual.iter() {
            out.insert(k.clone(), v.clone());
        }
        out.into_values().collect()
    }
}

impl Default for NodeCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// Component 13: the BFS crawl plus its periodic/on-demand scheduling.
pub struct DiscoveryManager {
    node_id: String,
    auth: Arc<AuthenticationManager>,
    http: reqwest::Client,
    collection: Arc<NodeCollection>,
    crawling: AtomicBool,
}

impl DiscoveryManager {
    pub fn new(node_id: String, auth: Arc<AuthenticationManager>, collection: Arc<NodeCollection>) -> Self {
        Self {
            node_id,
            auth,
            http: reqwest::Client::new(),
            collection,
            crawling: AtomicBool::new(false),
        }
    }

    /// Resolves one seed's well-known endpoint into its self-advertisement.
    async fn fetch_self_advertisement(&self, well_known_url: &str) -> Result<PeerAdvertisement, DiscoveryError> {
        let token = self
            .http
            .get(well_known_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        self.auth
            .verify_jwt::<PeerAdvertisement>(&token, true)
            .map_err(|_| DiscoveryError::InvalidAdvertisement)
    }

    /// Posts a signed discovery request to one peer's discovery endpoint
    /// and returns its view of the cluster.
    async fn query_discovery(&self, ad: &PeerAdvertisement) -> Result<Vec<PeerAdvertisement>, DiscoveryError> {
        if ad.dis.is_empty() {
            return Ok(Vec::new());
        }
        let request = DiscoveryRequestClaims {
            iat: unix_now(),
            nonce: generate_nonce(),
        };
        let request_token = self
            .auth
            .sign_jwt(&request)
            .map_err(|_| DiscoveryError::MalformedResponse)?;
        let response_token = self
            .http
            .post(&ad.dis)
            .bearer_auth(request_token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let claims: DiscoveryResponseClaims = self
            .auth
            .verify_jwt(&response_token, true)
            .map_err(|_| DiscoveryError::InvalidAdvertisement)?;
        Ok(claims.peers)
    }

    /// Runs one crawl to completion unless another is already in flight,
    /// in which case this call is a no-op.
    pub async fn crawl_once(&self, seeds: &[String]) {
        if self.crawling.swap(true, Ordering::AcqRel) {
            tracing::debug!("discovery crawl already in progress, skipping");
            return;
        }
        let working = self.crawl_inner(seeds).await;
        self.crawling.store(false, Ordering::Release);
        let count = working.len();
        self.collection.replace_discovered(working);
        tracing::info!(peers = count, "discovery crawl complete");
    }

    async fn crawl_inner(&self, seeds: &[String]) -> HashMap<String, PeerAdvertisement> {
        let mut handles = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let seed = seed.clone();
            let this = self.clone_refs();
            handles.push(tokio::spawn(async move { this.fetch_self_advertisement(&seed).await }));
        }

        let mut queue: VecDeque<PeerAdvertisement> = VecDeque::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(ad)) => queue.push_back(ad),
                Ok(Err(e)) => tracing::warn!(error = %e, "seed peer unreachable during discovery"),
                Err(e) => tracing::warn!(error = %e, "seed resolution task panicked"),
            }
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut working: HashMap<String, PeerAdvertisement> = HashMap::new();

        while let Some(ad) = queue.pop_front() {
            let key = ad.iss.to_lowercase();
            if visited.contains(&key) {
                continue;
            }
            visited.insert(key.clone());
            working.insert(key, ad.clone());

            match self.query_discovery(&ad).await {
                Ok(peers) => {
                    for peer in peers {
                        if !visited.contains(&peer.iss.to_lowercase()) {
                            queue.push_back(peer);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %ad.iss, error = %e, "discovery request to peer failed");
                }
            }

            let delay_ms = rand::thread_rng().gen_range(100..=500);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if !self.node_id.is_empty() {
            let self_key = self.node_id.to_lowercase();
            working.retain(|k, _| *k != self_key);
        }

        working
    }

    /// Cheap clone of just what `crawl_inner`'s spawned tasks need.
    fn clone_refs(&self) -> Arc<SelfFetcher> {
        Arc::new(SelfFetcher {
            http: self.http.clone(),
            auth: self.auth.clone(),
        })
    }

    pub async fn run_periodic(self: Arc<Self>, interval: Duration, seeds: Vec<String>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.crawl_once(&seeds).await;
        }
    }
}

/// The subset of `DiscoveryManager` a spawned seed-resolution task needs,
/// split out so `crawl_inner` doesn't have to hold `&self` across `tokio::spawn`.
struct SelfFetcher {
    http: reqwest::Client,
    auth: Arc<AuthenticationManager>,
}

impl SelfFetcher {
    async fn fetch_self_advertisement(&self, well_known_url: &str) -> Result<PeerAdvertisement, DiscoveryError> {
        let token = self
            .http
            .get(well_known_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        self.auth
            .verify_jwt::<PeerAdvertisement>(&token, true)
            .map_err(|_| DiscoveryError::InvalidAdvertisement)
    }
}

/// `GET {well_known_path}`: this node's own signed self-advertisement.
pub async fn well_known(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ad = PeerAdvertisement {
        iss: state.node_id.clone(),
        url: format!("http://{}{}", state.network.bind_addr, state.network.connect_path),
        dis: if state.network.discovery_path.is_empty() {
            String::new()
        } else {
            format!("http://{}{}", state.network.bind_addr, state.network.discovery_path)
        },
        iat: unix_now(),
        nonce: generate_nonce(),
    };
    match state.auth.sign_jwt(&ad) {
        Ok(token) => (HttpStatusCode::OK, token).into_response(),
        Err(_) => HttpStatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// `POST {discovery_path}`: answers a signed `DiscoveryRequestClaims` with
/// this node's current view of the cluster.
pub async fn discovery(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
    else {
        return HttpStatusCode::FORBIDDEN.into_response();
    };

    if state
        .auth
        .verify_jwt::<DiscoveryRequestClaims>(token, true)
        .is_err()
    {
        return HttpStatusCode::FORBIDDEN.into_response();
    }

    let response = DiscoveryResponseClaims {
        iat: unix_now(),
        nonce: generate_nonce(),
        peers: state.collection.enumerate(),
    };
    match state.auth.sign_jwt(&response) {
        Ok(signed) => (HttpStatusCode::OK, signed).into_response(),
        Err(_) => HttpStatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad(iss: &str) -> PeerAdvertisement {
        PeerAdvertisement {
            iss: iss.to_string(),
            url: format!("https://{iss}/connect"),
            dis: String::new(),
            iat: unix_now(),
            nonce: generate_nonce(),
        }
    }

    #[test]
    fn enumerate_is_union_of_discovered_and_manual() {
        let collection = NodeCollection::new();
        let mut discovered = HashMap::new();
        discovered.insert("node-a".to_string(), ad("node-a"));
        collection.replace_discovered(discovered);
        collection.add_manual(ad("node-b"));

        let mut ids: Vec<String> = collection.enumerate().into_iter().map(|a| a.iss).collect();
        ids.sort();
        assert_eq!(ids, vec!["node-a".to_string(), "node-b".to_string()]);
    }

    #[test]
    fn manual_entry_overrides_discovered_entry_with_same_id() {
        let collection = NodeCollection::new();
        let mut discovered = HashMap::new();
        discovered.insert("node-a".to_string(), ad("node-a"));
        collection.replace_discovered(discovered);

        let mut overridden = ad("node-a");
        overridden.url = "https://overridden/connect".to_string();
        collection.add_manual(overridden);

        let entries = collection.enumerate();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://overridden/connect");
    }

    #[test]
    fn replace_discovered_is_visible_to_new_snapshots() {
        let collection = NodeCollection::new();
        let snapshot_before = collection.snapshot_discovered();
        assert!(snapshot_before.is_empty());

        let mut set = HashMap::new();
        set.insert("node-a".to_string(), ad("node-a"));
        collection.replace_discovered(set);

        let snapshot_after = collection.snapshot_discovered();
        assert_eq!(snapshot_after.len(), 1);
        // the earlier snapshot is untouched -- it's a distinct Arc
        assert!(snapshot_before.is_empty());
    }
}
