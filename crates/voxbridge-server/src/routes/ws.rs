use axum::{
    extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use voxbridge::session::SessionController;

use crate::state::AppState;

/// Close code sent when the connection credential is missing or wrong
const CLOSE_UNAUTHORIZED: u16 = 4401;

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params.token, state))
}

async fn handle_socket(mut socket: WebSocket, token: Option<String>, state: AppState) {
    if let Some(expected) = &state.auth_token {
        if token.as_deref() != Some(expected.as_str()) {
            tracing::warn!("rejecting connection with missing or invalid token");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNAUTHORIZED,
                    reason: "invalid token".into(),
                })))
                .await;
            return;
        }
    }

    let (events_tx, mut events_rx) = mpsc::channel(EVENT_BUFFER);
    let mut controller = SessionController::new(
        state.client.clone(),
        state.system_prompt.clone(),
        events_tx,
    );
    let session = controller.id();
    tracing::info!(session = %session, "connection established");

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(raw))) => controller.handle_frame(&raw).await,
                    Some(Ok(Message::Binary(_))) => controller.reject_frame().await,
                    Some(Ok(Message::Close(_))) | None => break,
                    // pings are answered by axum itself
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(session = %session, error = %err, "connection error");
                        break;
                    }
                }
            }
            event = events_rx.recv() => {
                // the controller always holds a sender, so recv yields Some
                if let Some(event) = event {
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            if socket.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::error!(session = %session, error = %err, "failed to encode event");
                        }
                    }
                }
            }
        }
    }

    // also cancels any in-flight exchange and waits for it to stop
    controller.close().await;
    tracing::info!(session = %session, "connection closed");
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}
