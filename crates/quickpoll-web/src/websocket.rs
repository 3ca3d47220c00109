//! WebSocket endpoints for live poll updates.

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use quickpoll_core::{BridgeTarget, ClientClosed, ClientConnection, SubscriberBridge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::state::AppState;

/// `GET /ws/poll`: lifecycle events for every poll.
pub async fn all_polls_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state, BridgeTarget::AllPolls))
}

/// `GET /ws/poll/{poll_id}`: vote and like updates for one poll.
pub async fn poll_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(poll_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state, BridgeTarget::Poll(poll_id)))
}

/// Outbound half of a WebSocket.
struct WsClient {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl ClientConnection for WsClient {
    async fn send_text(&mut self, text: &str) -> Result<(), ClientClosed> {
        self.sink
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|_| ClientClosed)
    }

    async fn send_ping(&mut self) -> Result<(), ClientClosed> {
        self.sink
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|_| ClientClosed)
    }
}

/// Run one bridge for the lifetime of the socket.
async fn handle_socket(socket: WebSocket, state: AppState, target: BridgeTarget) {
    let (sender, mut receiver) = socket.split();
    let channel = target.channel();
    info!(channel = %channel, "WebSocket client connected");

    // The inbound half only tells us when the client goes away.
    let cancel = CancellationToken::new();
    let disconnected = cancel.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    debug!(text = %text.as_str(), "Ignoring message from WebSocket client");
                }
                Message::Close(_) => {
                    debug!("WebSocket client sent close frame");
                    break;
                }
                _ => {}
            }
        }
        disconnected.cancel();
    });

    let bridge = SubscriberBridge::new(
        target,
        WsClient { sink: sender },
        state.broadcaster.clone(),
        state.bridge_options,
        cancel,
    );
    bridge.run().await;

    recv_task.abort();
    debug!(channel = %channel, "WebSocket handler finished");
}
