//! Streaming endpoints.
//!
//! - `GET /v1/conversations/:id/events` — SSE mirror of `conv:{id}`.
//! - `GET /v1/conversations/:id/ws` — WebSocket carrying the same frames
//!   as length-prefixed JSON records (u32 big-endian length + payload).

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_core::Stream;
use uuid::Uuid;

use crate::state::AppState;
use crate::streaming::{topic, Frame};

/// Encode one frame for the WS channel: 4-byte big-endian length prefix,
/// then the JSON record.
fn length_prefixed(frame: &Frame) -> Vec<u8> {
    let json = frame.to_string().into_bytes();
    let mut out = Vec::with_capacity(4 + json.len());
    out.extend_from_slice(&(json.len() as u32).to_be_bytes());
    out.extend_from_slice(&json);
    out
}

pub async fn sse_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let mut sub = state.hub.subscribe(&topic::conversation(id));

    let stream = async_stream::stream! {
        while let Some(frame) = sub.rx.recv().await {
            let is_final = frame["type"] == "final";
            yield Ok(Event::default().data(frame.to_string()));
            if is_final {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn ws_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| drive_ws(state, id, socket))
}

async fn drive_ws(state: AppState, id: Uuid, mut socket: WebSocket) {
    let mut sub = state.hub.subscribe(&topic::conversation(id));

    loop {
        tokio::select! {
            frame = sub.rx.recv() => {
                let Some(frame) = frame else { break };
                let is_final = frame["type"] == "final";
                if socket
                    .send(WsMessage::Binary(length_prefixed(&frame)))
                    .await
                    .is_err()
                {
                    break;
                }
                if is_final {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Client-side close (or error) ends the session.
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state
        .hub
        .unsubscribe(&topic::conversation(id), sub.subscriber_id);
    let _ = socket.send(WsMessage::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn length_prefix_round_trips() {
        let frame: Frame = Arc::new(serde_json::json!({ "type": "heartbeat", "seq": 7 }));
        let bytes = length_prefixed(&frame);

        let len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - 4);
        let parsed: serde_json::Value = serde_json::from_slice(&bytes[4..]).unwrap();
        assert_eq!(parsed["type"], "heartbeat");
        assert_eq!(parsed["seq"], 7);
    }
}
