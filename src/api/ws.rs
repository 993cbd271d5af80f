//! WebSocket push endpoint.
//!
//! Bridges the broadcast topics into `{topic, payload}` JSON frames. A
//! session that falls behind its buffer loses the skipped frames and is
//! expected to reconcile through the REST queue endpoint.

use super::AppState;
use crate::push::{CASE_TOPIC, STATS_TOPIC};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// `GET /ws-fraud`
pub(super) async fn ws_fraud(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

async fn handle_session(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut cases = state.push.subscribe_cases();
    let mut stats = state.push.subscribe_stats();
    debug!("dashboard session connected");

    loop {
        tokio::select! {
            frame = cases.recv() => match frame {
                Ok(case) => {
                    let message = json!({ "topic": CASE_TOPIC, "payload": case });
                    if sender.send(Message::Text(message.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "case subscriber lagged, frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
            frame = stats.recv() => match frame {
                Ok(stats_frame) => {
                    let message = json!({ "topic": STATS_TOPIC, "payload": stats_frame });
                    if sender.send(Message::Text(message.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "stats subscriber lagged, frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = receiver.next() => match inbound {
                // Clients only listen; anything inbound except close is ignored.
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("dashboard session disconnected");
}
