use thiserror::Error;

use vncache_core::crypto::CryptoError;
use vncache_core::wire::{StatusCode, WireError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("wire framing error: {0}")]
    Wire(#[from] WireError),
    #[error("negotiated challenge did not match the one this client sent")]
    ChallengeMismatch,
    #[error("server's negotiated buffer sizes are below this client's minimums")]
    BuffersTooSmall,
    #[error("encoded message exceeds the negotiated max_message_size")]
    MessageTooLarge,
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    #[error("server rejected the request: {0:?}")]
    Rejected(Option<StatusCode>),
    #[error("{0}")]
    Protocol(String),
}
