//! Wire protocol operations (`Get`/`AddOrUpdate`/`Delete`/`Dequeue`) over an
//! already-upgraded WebSocket connection. Requests are matched to responses
//! by `correlation_id` through a background reader task, so a `Dequeue`
//! call that blocks waiting on a change event never stalls a concurrent
//! `Get` on the same connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use vncache_core::wire::{Action, FrameHeader, StatusCode};

use crate::error::ClientError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<(FrameHeader, Vec<u8>)>>>>;

/// The outcome of a `Dequeue` call: the next change event delivered to this
/// connection's subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEventNotice {
    Deleted { id: String },
    Modified { id: String, previous_id: Option<String> },
}

/// A single connection's worth of wire protocol access.
pub struct Client {
    next_correlation: AtomicU64,
    pending: PendingMap,
    outbound: Mutex<SplitSink<Socket, Message>>,
    max_message_size: u32,
}

impl Client {
    pub fn new(socket: Socket, max_message_size: u32) -> Self {
        let (sink, mut stream) = socket.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();

        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let bytes = match msg {
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let Ok((header, body)) = FrameHeader::decode(&bytes, u32::MAX) else {
                    break;
                };
                if let Some(tx) = reader_pending.lock().await.remove(&header.correlation_id) {
                    let _ = tx.send((header, body.to_vec()));
                }
            }
            reader_pending.lock().await.clear();
        });

        Self {
            next_correlation: AtomicU64::new(1),
            pending,
            outbound: Mutex::new(sink),
            max_message_size,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_correlation.fetch_add(1, Ordering::Relaxed)
    }

    async fn roundtrip(
        &self,
        header: FrameHeader,
        body: &[u8],
    ) -> Result<(FrameHeader, Vec<u8>), ClientError> {
        let encoded = header.encode(body)?;
        if encoded.len() > self.max_message_size as usize {
            return Err(ClientError::MessageTooLarge);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(header.correlation_id, tx);

        if let Err(e) = self.outbound.lock().await.send(Message::Binary(encoded.into())).await {
            self.pending.lock().await.remove(&header.correlation_id);
            return Err(e.into());
        }

        rx.await.map_err(|_| ClientError::ConnectionClosed)
    }

    /// `Get(id) -> payload?`.
    pub async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, ClientError> {
        let header = FrameHeader::request(self.next_id(), Action::Get, id);
        let (response, body) = self.roundtrip(header, &[]).await?;
        match response.status_code {
            Some(StatusCode::Okay) => Ok(Some(body)),
            Some(StatusCode::NotFound) => Ok(None),
            other => Err(ClientError::Rejected(other)),
        }
    }

    /// `AddOrUpdate(id, payload)`, creating or in-place updating `id`.
    pub async fn add_or_update(&self, id: &str, payload: &[u8]) -> Result<(), ClientError> {
        let header = FrameHeader::request(self.next_id(), Action::AddOrUpdate, id);
        let (response, _) = self.roundtrip(header, payload).await?;
        match response.status_code {
            Some(StatusCode::Okay) => Ok(()),
            other => Err(ClientError::Rejected(other)),
        }
    }

    /// `AddOrUpdate(id, new_id, payload)`: renames `id` to `new_id` if `id`
    /// exists (a non-empty `payload` also updates the data in the same
    /// call), otherwise creates `new_id` fresh with `payload`.
    pub async fn rename_or_create(
        &self,
        id: &str,
        new_id: &str,
        payload: &[u8],
    ) -> Result<(), ClientError> {
        let mut header = FrameHeader::request(self.next_id(), Action::AddOrUpdate, id);
        header.alternate_object_id = Some(new_id.to_string());
        let (response, _) = self.roundtrip(header, payload).await?;
        match response.status_code {
            Some(StatusCode::Okay) => Ok(()),
            other => Err(ClientError::Rejected(other)),
        }
    }

    /// `Delete(id) -> existed`.
    pub async fn delete(&self, id: &str) -> Result<bool, ClientError> {
        let header = FrameHeader::request(self.next_id(), Action::Delete, id);
        let (response, _) = self.roundtrip(header, &[]).await?;
        match response.status_code {
            Some(StatusCode::Okay) => Ok(true),
            Some(StatusCode::NotFound) => Ok(false),
            other => Err(ClientError::Rejected(other)),
        }
    }

    /// Blocks until this connection's subscription delivers its next
    /// change event. The `object_id` on the request frame is ignored by
    /// the server and left empty here.
    pub async fn dequeue(&self) -> Result<ChangeEventNotice, ClientError> {
        let header = FrameHeader::request(self.next_id(), Action::Dequeue, "");
        let (response, _) = self.roundtrip(header, &[]).await?;
        match response.status_code {
            Some(StatusCode::Deleted) => Ok(ChangeEventNotice::Deleted {
                id: response.object_id.unwrap_or_default(),
            }),
            Some(StatusCode::Modified) => Ok(ChangeEventNotice::Modified {
                id: response.object_id.unwrap_or_default(),
                previous_id: response.new_object_id,
            }),
            other => Err(ClientError::Rejected(other)),
        }
    }
}
