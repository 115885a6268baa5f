//! Connection handshake: a JWT challenge/response exchange followed by a
//! detached signature proving possession of the requester's private key.
//! Each phase is a small free function consuming the request and producing
//! either the next phase's input or a terminal error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use base64::Engine;

use vncache_core::crypto::sha256;
use vncache_core::wire::{NegotiationClaims, PeerAdvertisement, UpgradeClaims};

use crate::error::HandshakeError;
use crate::session;
use crate::state::{AppState, PendingNegotiation};

/// Base32 (Rfc4648, no padding) encodes 5 bits per character; 16 bytes of
/// entropy is therefore at least this many characters.
const MIN_CHALLENGE_CHARS: usize = 26;

fn bearer_token(headers: &HeaderMap, name: &'static str) -> Result<String, HandshakeError> {
    let value = headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(HandshakeError::MissingHeader(name))?;
    Ok(value.strip_prefix("Bearer ").unwrap_or(value).to_string())
}

/// Reads a JWT's claims without verifying its signature. Used only to learn
/// which trusted key to verify *with* (client vs. peer), or to read `chl`
/// back off a token this node itself issued moments earlier — never to make
/// an authorization decision. The subsequent signature/exact-match check is
/// what actually authorizes the request.
fn peek_claims<T: serde::de::DeserializeOwned>(token: &str) -> Result<T, HandshakeError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or(HandshakeError::InvalidClientJwt)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| HandshakeError::InvalidClientJwt)?;
    serde_json::from_slice(&bytes).map_err(|_| HandshakeError::InvalidClientJwt)
}

/// `GET {connect_path}`, serving both handshake steps: a plain request is
/// step 1 (challenge/response JWT), a WebSocket upgrade request is step 2
/// (detached signature, switch to the framed stream).
pub async fn connect(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    match ws {
        None => step_one(&state, remote_addr, &headers)
            .map(IntoResponse::into_response)
            .unwrap_or_else(|e| e.into_response()),
        Some(upgrade) => step_two(state, remote_addr, &headers, upgrade),
    }
}

fn step_one(
    state: &Arc<AppState>,
    remote_addr: SocketAddr,
    headers: &HeaderMap,
) -> Result<String, HandshakeError> {
    let token = bearer_token(headers, "authorization")?;
    let unverified: UpgradeClaims = peek_claims(&token)?;
    let is_peer = unverified.sub.is_some();

    let claims: UpgradeClaims = state
        .auth
        .verify_jwt(&token, is_peer)
        .map_err(|_| HandshakeError::InvalidClientJwt)?;

    if claims.chl.len() < MIN_CHALLENGE_CHARS {
        return Err(HandshakeError::ChallengeTooShort);
    }

    let negotiation = NegotiationClaims {
        chl: claims.chl.clone(),
        recv_buf_size: state.network.recv_buffer_size,
        header_buf_size: state.network.max_header_buffer_size,
        max_message_size: state.network.max_message_size,
        iss: state.node_id.clone(),
    };
    let negotiation_jwt = state
        .auth
        .sign_jwt(&negotiation)
        .map_err(|_| HandshakeError::InvalidClientJwt)?;

    state.pending.insert(
        claims.chl,
        PendingNegotiation {
            negotiation_jwt: negotiation_jwt.clone(),
            is_peer,
            subscriber_key: claims.sub,
            remote_addr,
            issued_at: Instant::now(),
        },
    );

    Ok(negotiation_jwt)
}

fn step_two(
    state: Arc<AppState>,
    remote_addr: SocketAddr,
    headers: &HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    match validate_step_two(&state, remote_addr, headers) {
        Ok((chl, is_peer, subscriber_key)) => {
            if let Some(raw) = headers
                .get("x-cache-node-discovery")
                .and_then(|v| v.to_str().ok())
            {
                if let Ok(ad) = state.auth.verify_jwt::<PeerAdvertisement>(raw, true) {
                    state.collection.add_manual(ad);
                }
            }
            state.pending.remove(&chl);
            let max_message_size = state.network.max_message_size as usize;
            let state_for_session = state.clone();
            upgrade.max_message_size(max_message_size).on_upgrade(move |socket| {
                session::run(state_for_session, socket, is_peer, subscriber_key)
            })
        }
        Err(e) => e.into_response(),
    }
}

fn validate_step_two(
    state: &AppState,
    remote_addr: SocketAddr,
    headers: &HeaderMap,
) -> Result<(String, bool, Option<String>), HandshakeError> {
    let token = bearer_token(headers, "authorization")?;
    let sig_b64 = headers
        .get("x-cache-upgrade-sig")
        .and_then(|v| v.to_str().ok())
        .ok_or(HandshakeError::MissingHeader("x-cache-upgrade-sig"))?;
    let signature = base64::engine::general_purpose::STANDARD
        .decode(sig_b64)
        .map_err(|_| HandshakeError::InvalidDetachedSignature)?;

    let claims: NegotiationClaims = peek_claims(&token)?;

    let (stored_jwt, is_peer, subscriber_key, original_addr) = {
        let entry = state
            .pending
            .get(&claims.chl)
            .ok_or(HandshakeError::UnknownChallenge)?;
        (
            entry.negotiation_jwt.clone(),
            entry.is_peer,
            entry.subscriber_key.clone(),
            entry.remote_addr,
        )
    };

    if stored_jwt != token {
        return Err(HandshakeError::UnknownChallenge);
    }

    let digest = sha256(token.as_bytes());
    if !state.auth.verify_message_hash(&digest, &signature, is_peer) {
        return Err(HandshakeError::InvalidDetachedSignature);
    }

    if state.network.verify_ip && original_addr.ip() != remote_addr.ip() {
        return Err(HandshakeError::IpMismatch);
    }

    Ok((claims.chl, is_peer, subscriber_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers, "authorization").unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_accepts_bare_value() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers, "authorization").unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_missing_header_is_an_error() {
        let headers = HeaderMap::new();
        assert!(matches!(
            bearer_token(&headers, "authorization"),
            Err(HandshakeError::MissingHeader("authorization"))
        ));
    }

    #[test]
    fn peek_claims_reads_payload_without_verifying_signature() {
        let claims = UpgradeClaims {
            chl: "ABCDEFGHIJKLMNOPQRSTUVWXYZAB".to_string(),
            sub: None,
        };
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);
        let token = jsonwebtoken::encode(
            &header,
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(b"unrelated-key"),
        )
        .unwrap();

        let peeked: UpgradeClaims = peek_claims(&token).unwrap();
        assert_eq!(peeked.chl, claims.chl);
    }
}
