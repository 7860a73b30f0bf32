use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use voxbridge::models::{CompletionRequest, Message};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct AskRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    input: String,
    status: String,
    response: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

// Simple ask-and-wait endpoint, no streaming
async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> impl IntoResponse {
    if request.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "text must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    let mut messages = Vec::new();
    if let Some(prompt) = &state.system_prompt {
        messages.push(Message::system(prompt.clone()));
    }
    messages.push(Message::user(request.text.clone()));
    let completion = CompletionRequest::new(state.client.model(), messages);

    match state.client.complete(&completion).await {
        Ok(response) => (
            StatusCode::OK,
            Json(AskResponse {
                input: request.text,
                status: "ok".to_string(),
                response,
            }),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "upstream completion failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ask", post(ask_handler))
        .with_state(state)
}
