//! The framed message server and cache listener: a task-per-peer loop
//! running over a single long-lived WebSocket binary-message stream.
//!
//! Each connection is handled by one task running a strictly serial
//! read-dispatch-respond loop: a request is read, dispatched against the
//! Cache Table (or, for `Dequeue`, against this session's own fan-out
//! subscription), and exactly one response is written before the next
//! frame is read. `Dequeue` can therefore block a connection's own next
//! request until a change event arrives (or the connection is idle
//! forever) — other connections are unaffected, each running in its own
//! task. A client that wants request/response and event consumption
//! interleaved opens two connections, one per purpose.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};

use vncache_core::wire::{Action, FrameHeader, StatusCode};
use vncache_store::{bucket_index, ChangeEvent, ChangeKind, EntryView, TableError};

use crate::state::AppState;

fn now_ticks() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn status_for_table_error(err: &TableError) -> StatusCode {
    match err {
        TableError::InvalidKey | TableError::InvalidBucketCount => StatusCode::InvalidArgument,
        TableError::Cache(_) | TableError::Entry(_) => StatusCode::Error,
    }
}

/// Drives one upgraded connection until the client closes it or the
/// transport errors. `subscriber_key` is the client's self-asserted `sub`
/// claim, if any -- passing the same key on reconnect resumes this
/// session's change-event queue instead of starting an empty one.
pub async fn run(
    state: Arc<AppState>,
    mut socket: WebSocket,
    is_peer: bool,
    subscriber_key: Option<String>,
) {
    let (sub_id, mut events) = state.fanout.subscribe(subscriber_key);
    tracing::debug!(is_peer, subscriber = %sub_id, "session started");

    loop {
        let frame = match socket.recv().await {
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "websocket transport error, closing session");
                break;
            }
        };

        let (header, body) = match FrameHeader::decode(&frame, state.network.max_message_size) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "malformed frame, closing session");
                break;
            }
        };

        let (response, response_body) = dispatch(&state, &header, body, &mut events).await;
        let encoded = match response.encode(&response_body) {
            Ok(bytes) => bytes,
            Err(_) => break,
        };
        if socket.send(Message::Binary(encoded.into())).await.is_err() {
            break;
        }
    }

    state.fanout.unsubscribe(&sub_id);
    tracing::debug!(subscriber = %sub_id, "session ended");
}

async fn dispatch(
    state: &Arc<AppState>,
    header: &FrameHeader,
    body: &[u8],
    events: &mut vncache_store::DropOldestReceiver,
) -> (FrameHeader, Vec<u8>) {
    match header.action {
        Action::Get => dispatch_get(state, header).await,
        Action::AddOrUpdate => (dispatch_add_or_update(state, header, body).await, Vec::new()),
        Action::Delete => (dispatch_delete(state, header).await, Vec::new()),
        Action::Dequeue => (dispatch_dequeue(header, events).await, Vec::new()),
    }
}

async fn dispatch_get(state: &Arc<AppState>, header: &FrameHeader) -> (FrameHeader, Vec<u8>) {
    let Some(id) = header.object_id.as_deref() else {
        return (
            FrameHeader::response(header.correlation_id, Action::Get, StatusCode::InvalidArgument),
            Vec::new(),
        );
    };
    match state.table.get(id).await {
        Ok(Some(EntryView { data, .. })) => (
            FrameHeader::response(header.correlation_id, Action::Get, StatusCode::Okay),
            data,
        ),
        Ok(None) => (
            FrameHeader::response(header.correlation_id, Action::Get, StatusCode::NotFound),
            Vec::new(),
        ),
        Err(e) => (
            FrameHeader::response(header.correlation_id, Action::Get, status_for_table_error(&e)),
            Vec::new(),
        ),
    }
}

/// `AddOrUpdate(id, alt_id?, data, time)`: a rename-capable upsert. `time`
/// is the server's own clock, not a client-supplied field — the wire
/// header carries no timestamp.
async fn dispatch_add_or_update(state: &Arc<AppState>, header: &FrameHeader, body: &[u8]) -> FrameHeader {
    let Some(id) = header.object_id.as_deref() else {
        return FrameHeader::response(header.correlation_id, Action::AddOrUpdate, StatusCode::InvalidArgument);
    };
    let alt = header
        .alternate_object_id
        .as_deref()
        .filter(|s| !s.is_empty());
    let time = now_ticks();

    let result = match alt {
        None => apply_add_or_update(state, id, body, time).await,
        Some(alt_id) => apply_rename_or_create(state, id, alt_id, body, time).await,
    };

    match result {
        Ok(()) => FrameHeader::response(header.correlation_id, Action::AddOrUpdate, StatusCode::Okay),
        Err(e) => FrameHeader::response(
            header.correlation_id,
            Action::AddOrUpdate,
            status_for_table_error(&e),
        ),
    }
}

async fn apply_add_or_update(
    state: &Arc<AppState>,
    id: &str,
    body: &[u8],
    time: i64,
) -> Result<(), TableError> {
    let existed = state.table.get(id).await?.is_some();
    state.table.add_or_update(id, body, time).await?;
    publish(state, id, if existed { ChangeKind::Updated } else { ChangeKind::Added })?;
    Ok(())
}

async fn apply_rename_or_create(
    state: &Arc<AppState>,
    id: &str,
    alt_id: &str,
    body: &[u8],
    time: i64,
) -> Result<(), TableError> {
    if state.table.try_change_key_and_update(id, alt_id, body, time).await? {
        publish(state, alt_id, ChangeKind::Renamed { from: id.to_string() })?;
    } else {
        state.table.add_or_update(alt_id, body, time).await?;
        publish(state, alt_id, ChangeKind::Added)?;
    }
    Ok(())
}

async fn dispatch_delete(state: &Arc<AppState>, header: &FrameHeader) -> FrameHeader {
    let Some(id) = header.object_id.as_deref() else {
        return FrameHeader::response(header.correlation_id, Action::Delete, StatusCode::InvalidArgument);
    };
    match state.table.delete(id).await {
        Ok(true) => {
            if let Err(e) = publish(state, id, ChangeKind::Deleted) {
                tracing::warn!(error = %e, "failed to resolve bucket for change event");
            }
            FrameHeader::response(header.correlation_id, Action::Delete, StatusCode::Okay)
        }
        Ok(false) => FrameHeader::response(header.correlation_id, Action::Delete, StatusCode::NotFound),
        Err(e) => FrameHeader::response(header.correlation_id, Action::Delete, status_for_table_error(&e)),
    }
}

/// Pulls this session's next change event and encodes it: a delete reports
/// `Deleted` with `object_id = current_id`; an add/update/rename reports
/// `Modified` with `object_id = current_id` and, for a rename,
/// `new_object_id` set to the key's previous name.
async fn dispatch_dequeue(header: &FrameHeader, events: &mut vncache_store::DropOldestReceiver) -> FrameHeader {
    match events.recv().await {
        Some(ChangeEvent { key, kind: ChangeKind::Deleted, .. }) => FrameHeader {
            correlation_id: header.correlation_id,
            action: Action::Dequeue,
            object_id: Some(key),
            alternate_object_id: None,
            status_code: Some(StatusCode::Deleted),
            new_object_id: None,
        },
        Some(ChangeEvent { key, kind: ChangeKind::Renamed { from }, .. }) => FrameHeader {
            correlation_id: header.correlation_id,
            action: Action::Dequeue,
            object_id: Some(key),
            alternate_object_id: None,
            status_code: Some(StatusCode::Modified),
            new_object_id: Some(from),
        },
        Some(ChangeEvent { key, .. }) => FrameHeader {
            correlation_id: header.correlation_id,
            action: Action::Dequeue,
            object_id: Some(key),
            alternate_object_id: None,
            status_code: Some(StatusCode::Modified),
            new_object_id: None,
        },
        None => FrameHeader::response(header.correlation_id, Action::Dequeue, StatusCode::Error),
    }
}

fn publish(state: &Arc<AppState>, key: &str, kind: ChangeKind) -> Result<(), TableError> {
    let bucket_id = bucket_index(key, state.table.bucket_count())?;
    state.fanout.publish(ChangeEvent {
        key: key.to_string(),
        bucket_id,
        kind,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_for_table_error_maps_invalid_key_to_invalid_argument() {
        assert_eq!(
            status_for_table_error(&TableError::InvalidKey),
            StatusCode::InvalidArgument
        );
    }

    #[test]
    fn now_ticks_is_monotonically_plausible() {
        let a = now_ticks();
        let b = now_ticks();
        assert!(b >= a);
    }
}
