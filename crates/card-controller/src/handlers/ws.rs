//! Meeting channel WebSocket.
//!
//! One socket is one connection to a meeting channel. The socket is split:
//! a writer task drains the connection's outbound queue into the sink while
//! the handler reads inbound events and forwards them to the channel.
//!
//! An invalid payload closes the socket with 1008 (policy violation) and the
//! rejection reason. The channel itself is unaffected.

use crate::actors::{ConnectionHandle, ConnectionId, MeetingChannelHandle};
use crate::cards::ChannelEvent;
use crate::errors::{CcError, POLICY_VIOLATION_CLOSE_CODE};
use crate::observability as prom;
use crate::routes::AppState;
use crate::store::ParticipantStore;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Close code sent when the channel itself fails (RFC 6455 section 7.4.1).
const INTERNAL_ERROR_CLOSE_CODE: u16 = 1011;

/// How long the writer may take to flush a close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// `GET /api/meetings/:code/ws` - attach to a meeting channel.
///
/// Unknown meetings are rejected with 404 before the upgrade.
#[instrument(skip_all, name = "cc.handlers.ws.upgrade", fields(meeting_code = %code))]
pub async fn meeting_websocket(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, CcError> {
    if state.store.get_meeting(&code).await?.is_none() {
        return Err(CcError::MeetingNotFound(code));
    }

    let store = state.participant_store();
    let channel = state.registry.get(&code, Arc::clone(&store)).await?;
    let buffer = state.config.connection_buffer;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, channel, store, buffer)))
}

#[instrument(
    skip_all,
    name = "cc.handlers.ws.connection",
    fields(meeting_code = %channel.meeting_code())
)]
async fn handle_socket(
    socket: WebSocket,
    channel: MeetingChannelHandle,
    store: Arc<dyn ParticipantStore>,
    buffer: usize,
) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut outbound) = ConnectionHandle::new(buffer);
    let connection_id = connection.id();
    let (close_tx, mut close_rx) = oneshot::channel::<CloseFrame<'static>>();

    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                close = &mut close_rx => {
                    if let Ok(frame) = close {
                        let _ = sink.send(Message::Close(Some(frame))).await;
                    }
                    break;
                }
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if sink.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    // The channel dropped this connection.
                    None => break,
                },
            }
        }
    });

    if let Err(e) = attach(&channel, connection).await {
        warn!(
            target: "cc.handlers.ws",
            connection_id = %connection_id,
            error = %e,
            "Failed to attach connection"
        );
        let _ = close_tx.send(close_frame(INTERNAL_ERROR_CLOSE_CODE, "Channel unavailable"));
        drain_writer(writer).await;
        return;
    }

    info!(target: "cc.handlers.ws", connection_id = %connection_id, "Connection attached");

    let mut writer_finished = false;
    let close = loop {
        tokio::select! {
            _ = &mut writer => {
                writer_finished = true;
                break None;
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match forward_event(&channel, store.as_ref(), &text).await {
                        Ok(()) => {}
                        Err(CcError::Event(e)) => {
                            prom::record_event_rejected(e.metric_label());
                            debug!(
                                target: "cc.handlers.ws",
                                connection_id = %connection_id,
                                reason = %e,
                                "Rejected inbound event"
                            );
                            break Some(close_frame(POLICY_VIOLATION_CLOSE_CODE, &e.close_reason()));
                        }
                        Err(e) => {
                            warn!(
                                target: "cc.handlers.ws",
                                connection_id = %connection_id,
                                error = %e,
                                "Failed to forward inbound event"
                            );
                            break Some(close_frame(INTERNAL_ERROR_CLOSE_CODE, "Internal error"));
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break None,
                // Binary frames carry nothing; pings are answered by axum.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(
                        target: "cc.handlers.ws",
                        connection_id = %connection_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break None;
                }
            },
        }
    };

    // The close frame goes out before the connection is detached: detaching
    // drops the last outbound sender and ends the writer.
    if !writer_finished {
        match close {
            Some(frame) => {
                let _ = close_tx.send(frame);
            }
            None => drop(close_tx),
        }
        drain_writer(writer).await;
    }

    detach(&channel, connection_id).await;

    info!(target: "cc.handlers.ws", connection_id = %connection_id, "Connection closed");
}

/// Register the connection, then deliver the current snapshot to it alone.
async fn attach(channel: &MeetingChannelHandle, connection: ConnectionHandle) -> Result<(), CcError> {
    channel.add_connection(connection.clone()).await?;
    channel.send_snapshot(connection).await
}

async fn detach(channel: &MeetingChannelHandle, connection_id: ConnectionId) {
    match channel.remove_connection(connection_id).await {
        Ok(_) => {}
        // The channel may already be gone after a flush or shutdown.
        Err(e) => debug!(
            target: "cc.handlers.ws",
            connection_id = %connection_id,
            error = %e,
            "Connection removal skipped"
        ),
    }
}

/// Validate one inbound text frame and hand the event to the channel.
///
/// Frames that are not JSON are treated as an empty payload, which fails the
/// `event` presence check.
async fn forward_event(
    channel: &MeetingChannelHandle,
    store: &dyn ParticipantStore,
    text: &str,
) -> Result<(), CcError> {
    let started = Instant::now();
    let payload: Value = serde_json::from_str(text).unwrap_or(Value::Null);

    let event = ChannelEvent::from_payload(store, channel.meeting_code(), &payload).await?;
    channel.handle_event(event).await?;

    prom::record_event_latency(started.elapsed());
    Ok(())
}

fn close_frame(code: u16, reason: &str) -> CloseFrame<'static> {
    CloseFrame {
        code,
        reason: reason.to_string().into(),
    }
}

async fn drain_writer(mut writer: tokio::task::JoinHandle<()>) {
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_frame_carries_reason() {
        let frame = close_frame(POLICY_VIOLATION_CLOSE_CODE, "Unknown user");
        assert_eq!(frame.code, 1008);
        assert_eq!(frame.reason, "Unknown user");
    }
}
