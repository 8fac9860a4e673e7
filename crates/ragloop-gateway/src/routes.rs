use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::{error, info};

use ragloop_agent::final_answer;

use crate::state::AppState;

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// POST /query  {query, conversation_id?}
pub async fn query(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let query = body
        .get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, "Field 'query' (string) is required.")
        })?;

    let conversation_id = state
        .conversations
        .resolve(body.get("conversation_id").and_then(Value::as_str));
    let prompt = state
        .conversations
        .build_context(&conversation_id, query, state.history_messages);

    state.conversations.record_user(&conversation_id, query);

    info!(conversation_id = %conversation_id, "Query received");
    let result = state.workflow.ask(&prompt).await.map_err(|e| {
        error!(conversation_id = %conversation_id, error = %e, "Workflow run failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    state
        .conversations
        .record_answer(&conversation_id, final_answer(&result.state));

    let mut response = result.state.to_json();
    if let Value::Object(map) = &mut response {
        map.insert("conversation_id".into(), json!(conversation_id.0));
        map.insert("passes".into(), json!(result.passes));
        map.insert("termination".into(), json!(result.termination));
    }
    Ok(Json(response))
}

// GET /conversations
pub async fn list_conversations(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "conversations": state.conversations.list() }))
}

// GET /conversations/{id}
pub async fn conversation_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let messages = state.conversations.messages(&id).unwrap_or_default();
    Json(json!({
        "conversation_id": id,
        "messages": messages,
    }))
}

// DELETE /conversations/{id}
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    state.conversations.remove(&id);
    Json(json!({
        "status": "deleted",
        "conversation_id": id,
    }))
}
