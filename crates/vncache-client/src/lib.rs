//! A thin client for VNCache nodes: the handshake in `handshake` gets you
//! an upgraded WebSocket connection, and `Client` in `client` speaks the
//! framed wire protocol over it.

pub mod client;
pub mod error;
pub mod handshake;

pub use client::{ChangeEventNotice, Client};
pub use error::ClientError;
pub use handshake::{connect, ClientIdentity, MinimumBuffers, Negotiated};
