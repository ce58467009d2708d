//! WebSocket control plane (spec.md §6/§4.14): a typed JSON envelope over
//! `axum::extract::ws`, approximating the Socket.IO contract described in
//! the spec (`auth.token` + `query.teamId`, room join, heartbeat, bounded
//! send queue) since neither the teacher nor the rest of the pack carries a
//! real Socket.IO engine or Redis adapter crate. Grounded in the teacher's
//! `auto_task::task_progress_websocket_handler` (`WebSocketUpgrade` +
//! `socket.split()` + `tokio::select!` over a send task and a recv task,
//! fed by a `tokio::sync::broadcast::Receiver`).

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{interval, Instant};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::auth_middleware::decode_token;
use crate::bus::Envelope;
use crate::shared::TenantContext;

const PING_INTERVAL: Duration = Duration::from_secs(15);
const STALE_TIMEOUT: Duration = Duration::from_secs(30);
const SEND_QUEUE_CAP: usize = 100;

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
    #[serde(rename = "teamId")]
    pub team_id: Uuid,
}

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>, Query(auth): Query<WsAuthQuery>) -> impl IntoResponse {
    let jwt = state.config.jwt.clone();
    let claims = match decode_token(&auth.token, &jwt) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "websocket auth rejected");
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
    };
    let ctx = TenantContext::new(auth.team_id, claims.role).with_user(claims.sub);
    ws.on_upgrade(move |socket| handle_connection(socket, state, ctx))
}

/// Bounded send buffer: drops the oldest frame on overflow rather than
/// blocking the broadcast fan-out on one slow client (spec.md §4.14).
struct SendQueue {
    items: VecDeque<String>,
}

impl SendQueue {
    fn new() -> Self {
        Self { items: VecDeque::with_capacity(SEND_QUEUE_CAP) }
    }

    fn push(&mut self, item: String) {
        if self.items.len() >= SEND_QUEUE_CAP {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    fn drain(&mut self) -> Vec<String> {
        self.items.drain(..).collect()
    }
}

async fn handle_connection(socket: WebSocket, state: AppState, ctx: TenantContext) {
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut bus_rx = state.bus.subscribe(ctx.team_id).await;

    let room = format!("team:{}", ctx.team_id);
    tracing::info!(room = %room, "websocket connected");

    let welcome = serde_json::json!({
        "type": "connected",
        "room": room,
        "userRoom": ctx.user_id.map(|id| format!("user:{id}")),
    });
    if sender.send(Message::Text(welcome.to_string())).await.is_err() {
        return;
    }

    let mut queue = SendQueue::new();
    let mut ping_ticker = interval(PING_INTERVAL);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            event = bus_rx.recv() => {
                match event {
                    Ok(envelope) => queue.push(envelope_json(&envelope)),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(team_id = %ctx.team_id, skipped = n, "websocket subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ping_ticker.tick() => {
                if last_pong.elapsed() > STALE_TIMEOUT {
                    tracing::debug!(team_id = %ctx.team_id, "websocket stale, no pong within 30s");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }

        for frame in queue.drain() {
            if sender.send(Message::Text(frame)).await.is_err() {
                tracing::debug!(team_id = %ctx.team_id, "websocket send failed, closing");
                return;
            }
        }
    }

    tracing::info!(team_id = %ctx.team_id, "websocket disconnected");
}

fn envelope_json(envelope: &Envelope) -> String {
    serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_queue_drops_oldest_past_cap() {
        let mut queue = SendQueue::new();
        for i in 0..(SEND_QUEUE_CAP + 10) {
            queue.push(i.to_string());
        }
        let drained = queue.drain();
        assert_eq!(drained.len(), SEND_QUEUE_CAP);
        assert_eq!(drained[0], "10");
        assert_eq!(*drained.last().unwrap(), (SEND_QUEUE_CAP + 9).to_string());
    }
}
