//! Client side of the connection handshake: the same two-step exchange
//! `vncached`'s `handshake` module serves, run in reverse. Step 1 asks for
//! a negotiation JWT over plain HTTP; step 2 proves possession of this
//! client's private key with a detached signature and upgrades to
//! WebSocket.

use base64::Engine;
use reqwest::Client as HttpClient;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use vncache_core::crypto::{generate_challenge, sha256, SigningKey, VerifyingKey};
use vncache_core::wire::{NegotiationClaims, UpgradeClaims};

use crate::error::ClientError;

/// This client's own signing identity plus the server public key it
/// verifies negotiation responses against.
pub struct ClientIdentity {
    pub signing: SigningKey,
    pub server_key: VerifyingKey,
}

impl ClientIdentity {
    pub fn new(signing: SigningKey, server_key: VerifyingKey) -> Self {
        Self { signing, server_key }
    }
}

/// Buffer-size floors this client requires of the negotiated connection.
/// A server advertising smaller buffers than these is rejected before the
/// WebSocket upgrade is attempted.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimumBuffers {
    pub recv_buf_size: u32,
    pub header_buf_size: u32,
    pub max_message_size: u32,
}

pub struct Negotiated {
    pub socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub max_message_size: u32,
}

/// Swaps an `http(s)://` base URL for its `ws(s)://` counterpart.
fn to_ws_scheme(http_base: &str) -> String {
    if let Some(rest) = http_base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = http_base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        http_base.to_string()
    }
}

/// Runs both handshake steps against `http_base` (e.g. `http://host:port`)
/// and `connect_path`, returning an upgraded WebSocket stream plus the
/// server's negotiated `max_message_size`.
///
/// `sub` is this client's own node id if it wants to identify as a peer
/// rather than an ordinary client (see `UpgradeClaims::sub`); `discovery_jwt`,
/// if set, is sent as `X-Cache-Node-Discovery` so the server learns this
/// client's advertisement in the same round trip.
pub async fn connect(
    http_base: &str,
    connect_path: &str,
    identity: &ClientIdentity,
    sub: Option<String>,
    discovery_jwt: Option<&str>,
    minimums: &MinimumBuffers,
) -> Result<Negotiated, ClientError> {
    let chl = generate_challenge();
    let upgrade_claims = UpgradeClaims { chl: chl.clone(), sub };
    let upgrade_jwt = identity.signing.sign_jwt(&upgrade_claims)?;

    let http = HttpClient::new();
    let negotiation_jwt = http
        .get(format!("{http_base}{connect_path}"))
        .bearer_auth(&upgrade_jwt)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let negotiation: NegotiationClaims = identity.server_key.verify_jwt(&negotiation_jwt)?;
    if negotiation.chl != chl {
        return Err(ClientError::ChallengeMismatch);
    }
    if negotiation.recv_buf_size < minimums.recv_buf_size
        || negotiation.header_buf_size < minimums.header_buf_size
        || negotiation.max_message_size < minimums.max_message_size
    {
        return Err(ClientError::BuffersTooSmall);
    }

    let digest = sha256(negotiation_jwt.as_bytes());
    let signature = identity.signing.sign_message_hash(&digest)?;
    let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature);

    let ws_url = format!("{}{connect_path}", to_ws_scheme(http_base));
    let mut request = ws_url.into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        "authorization",
        header_value(&format!("Bearer {negotiation_jwt}"))?,
    );
    headers.insert("x-cache-upgrade-sig", header_value(&sig_b64)?);
    if let Some(jwt) = discovery_jwt {
        headers.insert("x-cache-node-discovery", header_value(jwt)?);
    }

    let (socket, _response) = connect_async(request).await?;
    Ok(Negotiated {
        socket,
        max_message_size: negotiation.max_message_size,
    })
}

fn header_value(s: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(s)
        .map_err(|_| ClientError::Protocol(format!("{s:?} is not a valid header value")))
}
