//! WebSocket handler for real-time task events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use batchwire_core::{ClientMessage, ServerMessage};
use futures::{sink::SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::auth::AuthUser;
use crate::broker::{AuthContext, ConnectionBroker};
use crate::state::AppState;

/// WebSocket upgrade handler. The session is checked before upgrading.
pub async fn ws_handler(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Handle individual WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState, identity: String) {
    let (mut sender, mut receiver) = socket.split();
    let (ctx, mut rx) = state.broker.connect(&identity).await;
    let conn_id = ctx.connection_id().to_string();

    info!(conn_id = %conn_id, identity = %identity, "WebSocket client connected");

    // Forward queued messages to this client
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to encode message");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // Handle bind requests from the client
    let broker = state.broker.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_client_text(&broker, &ctx, text.as_str()).await,
                Message::Close(_) => {
                    debug!("WebSocket client sent close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.broker.unbind(&conn_id).await;
    info!(conn_id = %conn_id, "WebSocket client disconnected");
}

async fn handle_client_text(broker: &ConnectionBroker, ctx: &AuthContext, text: &str) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(conn_id = %ctx.connection_id(), error = %e, "Ignoring malformed client message");
            return;
        }
    };

    match msg {
        ClientMessage::Bind { owner_id } => {
            let reply = match broker.bind(ctx, &owner_id).await {
                Ok(()) => ServerMessage::Bound { owner_id },
                Err(e) => ServerMessage::BindRejected {
                    reason: e.to_string(),
                },
            };
            broker.send_to(ctx.connection_id(), reply).await;
        }
    }
}
