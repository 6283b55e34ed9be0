//! Job event WebSocket route.
//!
//! Delivers `JobEvent` records as JSON text frames: buffered history from
//! the requested sequence first, then live events until the job's terminal
//! event has been sent, after which the connection closes from the server
//! side. A `gap_detected` marker precedes replay when the requested
//! sequence has already been evicted.

use std::time::Duration;

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::hub::EventStream;

/// Heartbeat ping interval in seconds.
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Query parameters for the stream endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// First sequence number to deliver; defaults to the beginning.
    #[serde(default)]
    pub from: u64,
}

/// WebSocket handler for a job's event stream.
///
/// # Endpoint
///
/// `GET /api/jobs/{id}/stream?from=seq`
pub async fn job_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<StreamParams>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .orchestrator
        .subscribe(&id, params.from)
        .map_err(ApiError::from)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, events)))
}

/// Pump events to the client until the stream ends or the client leaves.
async fn handle_socket(socket: WebSocket, mut events: EventStream) {
    let (mut sender, mut receiver) = socket.split();

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                debug!(error = %e, "Failed to encode event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            debug!("Client disconnected mid-stream");
                            break;
                        }
                    }
                    None => {
                        // Terminal event already delivered (or the
                        // subscriber was dropped); close politely.
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            _ = heartbeat_interval.tick() => {
                if awaiting_pong {
                    debug!("Client failed to respond to Ping, closing connection");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_ok() {
                    awaiting_pong = true;
                } else {
                    break;
                }
            }
        }
    }
}
