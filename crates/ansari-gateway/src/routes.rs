//! HTTP route handlers.

use std::sync::Arc;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{error, info};
use uuid::Uuid;

use ansari_core::history::{from_rows, to_row};
use ansari_core::message::Message;

use crate::state::AppState;

/// Shown to end users when a turn dies on a fatal agent error.
const GENERIC_FAILURE: &str = "Something went wrong while answering. Please try again.";

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": state.tools.list(),
    }))
}

pub async fn create_thread(State(state): State<Arc<AppState>>) -> Response {
    match state.store.create().await {
        Ok(meta) => (StatusCode::CREATED, Json(json!(meta))).into_response(),
        Err(e) => {
            error!(%e, "Failed to create thread");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn list_threads(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list().await {
        Ok(metas) => Json(json!(metas)).into_response(),
        Err(e) => {
            error!(%e, "Failed to list threads");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.load(id).await {
        Ok(Some(record)) => Json(json!({
            "id": record.meta.id,
            "title": record.meta.title,
            "messages": record.rows,
        }))
        .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(%e, "Failed to load thread");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn delete_thread(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(%e, "Failed to delete thread");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddMessageBody {
    pub content: String,
}

/// Append a user message to a thread and stream the agent's answer back as
/// a chunked plain-text body.
pub async fn add_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AddMessageBody>,
) -> Response {
    let record = match state.store.load(id).await {
        Ok(Some(record)) => record,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(%e, "Failed to load thread");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!(thread = %id, "Processing user message");

    // Reconstruct provider-ready history, then append the pending user turn
    // (persisted here; the agent's logger covers the turns it produces).
    let user = Message::user(body.content);
    if let Err(e) = state.store.append_row(id, &to_row(&user)).await {
        error!(%e, "Failed to persist user message");
    }
    let mut history = from_rows(&record.rows);
    history.push(user);

    let agent = state.build_agent(id);
    let answer = agent.replace_message_history(history).map(|item| {
        Ok::<Bytes, std::io::Error>(match item {
            Ok(fragment) => Bytes::from(fragment),
            Err(e) => {
                error!(%e, "Fatal agent error");
                Bytes::from(format!("\n{GENERIC_FAILURE}"))
            }
        })
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Body::from_stream(answer))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
