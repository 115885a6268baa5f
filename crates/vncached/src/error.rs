use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failure modes for the connection handshake. Each variant maps to
/// exactly one of the `Unauthenticated` / `NegotiationFailed` /
/// `InvalidArgument` HTTP outcomes below.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("challenge entropy below the required 16 bytes")]
    ChallengeTooShort,
    #[error("client JWT failed signature verification")]
    InvalidClientJwt,
    #[error("no pending negotiation for this challenge")]
    UnknownChallenge,
    #[error("detached signature did not verify against the negotiation JWT")]
    InvalidDetachedSignature,
    #[error("client address did not match the negotiated identity under verify_ip")]
    IpMismatch,
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        // Both the JWT-signature and upgrade-signature failure cases
        // respond 403, not 401 -- there is no unauthenticated-but-identified
        // state in this handshake, only "proved" or "rejected".
        let status = match self {
            HandshakeError::ChallengeTooShort | HandshakeError::MissingHeader(_) => {
                StatusCode::BAD_REQUEST
            }
            HandshakeError::UnknownChallenge
            | HandshakeError::InvalidClientJwt
            | HandshakeError::InvalidDetachedSignature
            | HandshakeError::IpMismatch => StatusCode::FORBIDDEN,
        };
        (status, self.to_string()).into_response()
    }
}

/// Failure modes for the peer discovery crawl.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("http request to peer failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("peer advertisement failed signature verification")]
    InvalidAdvertisement,
    #[error("peer returned a malformed discovery response")]
    MalformedResponse,
}
