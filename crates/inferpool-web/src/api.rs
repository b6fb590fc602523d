//! Route handlers.
//!
//! Thin translation between the HTTP surface and dispatcher operations.
//! Every path starts with a `{user_id}-{secret}` credential segment; the
//! completion and models routes accept an optional model segment that
//! falls back to the registry default.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};
use uuid::Uuid;

use inferpool_kernel::DeclaredModel;

use crate::error::ApiError;
use crate::state::AppState;

/// Parse a `{user_id}-{secret}` path segment.
///
/// Exactly one `-` separator; the id half must parse as a signed integer.
fn parse_credential(raw: &str) -> Result<(i64, &str), ApiError> {
    let parts: Vec<&str> = raw.split('-').collect();
    if parts.len() != 2 {
        return Err(ApiError::invalid_token());
    }
    let user_id: i64 = parts[0].parse().map_err(|_| ApiError::invalid_token())?;
    Ok((user_id, parts[1]))
}

// ---------------------------------------------------------------------------
// POST /{credential}/v1/chat/completions
// POST /{credential}/{model}/v1/chat/completions
// ---------------------------------------------------------------------------

/// Submit a completion against the default model.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Path(credential): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    run_completion(&state, &credential, None, body).await
}

/// Submit a completion against an explicit model.
pub async fn chat_completions_with_model(
    State(state): State<Arc<AppState>>,
    Path((credential, model)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    run_completion(&state, &credential, Some(&model), body).await
}

async fn run_completion(
    state: &AppState,
    credential: &str,
    model: Option<&str>,
    body: Value,
) -> Result<Json<Value>, ApiError> {
    let (user_id, secret) = parse_credential(&credential)?;
    let completion = state
        .dispatcher
        .submit_chat_completion(user_id, secret, model, body)
        .await?;
    Ok(Json(completion))
}

// ---------------------------------------------------------------------------
// POST /{credential}/fetch_task
// ---------------------------------------------------------------------------

/// Hand the next task to a polling worker.
///
/// The worker declares its model as `{"model_info": {"id", "meta"}}`; a
/// fingerprint mismatch rejects the fetch before any task is consumed.
pub async fn fetch_task(
    State(state): State<Arc<AppState>>,
    Path(credential): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let (worker_id, secret) = parse_credential(&credential)?;

    let declared: DeclaredModel = body
        .get("model_info")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| ApiError::missing_field("model_info"))?;

    let assignment = state
        .dispatcher
        .fetch_task(worker_id, secret, &declared)
        .await?;

    Ok(match assignment {
        Some(assignment) => Json(serde_json::to_value(&assignment).map_err(|e| {
            ApiError::internal(format!("failed to serialize task: {e}"))
        })?),
        None => Json(json!({"status": "empty"})),
    })
}

// ---------------------------------------------------------------------------
// POST /{credential}/submit_result
// ---------------------------------------------------------------------------

/// Accept a worker's result and wake the waiting submitter.
pub async fn submit_result(
    State(state): State<Arc<AppState>>,
    Path(credential): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let (worker_id, secret) = parse_credential(&credential)?;

    let task_id = body
        .get("task_id")
        .ok_or_else(|| ApiError::missing_field("task_id"))?;
    // An unparseable id can never match an in-flight task.
    let task_id = task_id
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(ApiError::not_found)?;

    let response = body
        .get("response")
        .cloned()
        .ok_or_else(|| ApiError::missing_field("response"))?;

    state
        .dispatcher
        .submit_result(worker_id, secret, task_id, response)
        .await?;

    Ok(Json(json!({"status": "success"})))
}

// ---------------------------------------------------------------------------
// GET /{credential}/v1/models
// GET /{credential}/{model}/v1/models
// ---------------------------------------------------------------------------

/// List the served models in the OpenAI listing shape.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Path(credential): Path<String>,
) -> Result<Json<Value>, ApiError> {
    run_list_models(&state, &credential, None).await
}

/// List models under an explicit model path prefix.
pub async fn list_models_with_model(
    State(state): State<Arc<AppState>>,
    Path((credential, model)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    run_list_models(&state, &credential, Some(&model)).await
}

async fn run_list_models(
    state: &AppState,
    credential: &str,
    model: Option<&str>,
) -> Result<Json<Value>, ApiError> {
    let (user_id, secret) = parse_credential(&credential)?;
    state.dispatcher.authenticate(user_id, secret).await?;

    let registry = state.dispatcher.registry();
    if let Some(model) = model
        && !registry.has(model)
    {
        return Err(ApiError::invalid_model(model));
    }

    Ok(Json(json!({
        "object": "list",
        "data": registry.specs(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_parsing_accepts_exactly_one_separator() {
        assert_eq!(parse_credential("42-abc").unwrap(), (42, "abc"));

        assert!(parse_credential("42").is_err());
        assert!(parse_credential("42-a-b").is_err());
        assert!(parse_credential("-42-abc").is_err());
        assert!(parse_credential("abc-def").is_err());
    }
}
