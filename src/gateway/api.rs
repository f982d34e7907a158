//! REST handlers for the chat front end.
//!
//! Every failure is returned as `{"error": "..."}` through [`ApiError`].

use super::{ApiError, AppState};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::ChatReply;
use crate::sessions::{is_safe_session_id, SessionRecord};

// ── Request bodies ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub solution: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveLogResponse {
    pub message: String,
    pub file: String,
}

// ── Handlers ────────────────────────────────────────────────────

/// GET /health
pub async fn handle_health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /api/chat: one conversation turn
pub async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = body?;

    let message = request.message.unwrap_or_default();
    let message = message.trim();
    if message.is_empty() {
        return Err(ApiError::Validation("Message is required".into()));
    }

    let existing = match request.session_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => state.sessions.get(id).await?,
        None => None,
    };
    let handle = match existing {
        Some(handle) => handle,
        None => state.sessions.create(None).await?,
    };

    // Held across the provider call so turns on one session run one at a time.
    let mut session = handle.lock().await;
    let reply = state.chat.respond(&mut session, message).await;
    Ok(Json(reply))
}

/// POST /api/save_log/{session_id}: persist a live session or a client transcript
pub async fn handle_save_log(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SaveLogResponse>, ApiError> {
    if !is_safe_session_id(&session_id) {
        return Err(ApiError::Validation("Invalid session id".into()));
    }

    if let Some(handle) = state.sessions.get(&session_id).await? {
        let session = handle.lock().await;
        let path = state
            .logger
            .save(&session)
            .await
            .ok_or_else(|| ApiError::Persistence("Failed to save session log".into()))?;
        return Ok(Json(SaveLogResponse {
            message: "Log saved from memory".into(),
            file: path.display().to_string(),
        }));
    }

    if let Some(chat_log) = json_body(&headers, &body)? {
        let path = state
            .logger
            .save_raw(&session_id, &chat_log)
            .await
            .ok_or_else(|| ApiError::Persistence("Failed to save chat log".into()))?;
        return Ok(Json(SaveLogResponse {
            message: "Log saved from request body".into(),
            file: path.display().to_string(),
        }));
    }

    Err(ApiError::NotFound("No session or chat log found".into()))
}

/// GET /api/sessions/{session_id}: full session snapshot
pub async fn handle_session_get(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionRecord>, ApiError> {
    let handle = state
        .sessions
        .get(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found".into()))?;
    let session = handle.lock().await;
    Ok(Json(session.to_record()))
}

/// POST /api/sessions/{session_id}/issues: record a resolved issue
pub async fn handle_issue_record(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<IssueRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body?;
    let issue = request.issue.trim();
    let solution = request.solution.trim();
    if issue.is_empty() || solution.is_empty() {
        return Err(ApiError::Validation("Issue and solution are required".into()));
    }

    let handle = state
        .sessions
        .get(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found".into()))?;
    let mut session = handle.lock().await;
    session.record_issue_resolution(issue, solution);

    Ok(Json(serde_json::json!({
        "session_id": session.id(),
        "issues_resolved": session.issues().len(),
    })))
}

// ── Helpers ─────────────────────────────────────────────────────

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

/// Whether a JSON value carries anything worth persisting.
fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Parse the request body as a transcript, if it is a non-empty JSON document.
fn json_body(headers: &HeaderMap, body: &Bytes) -> Result<Option<Value>, ApiError> {
    if !is_json_content_type(headers) || body.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::Validation(format!("Malformed JSON body: {e}")))?;
    Ok(is_meaningful(&value).then_some(value))
}
