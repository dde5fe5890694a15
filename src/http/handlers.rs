//! Endpoint handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{caller, ApiError, AppState, RequestSession};
use crate::engine::Turn;

/// Body of `POST /api/intake`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRequest {
    /// User message. Required.
    pub prompt: Option<String>,
    /// Caller-supplied field values.
    #[serde(default)]
    pub prefill: Option<Value>,
    /// Clear the session before anything else.
    #[serde(default)]
    pub reset: Option<bool>,
    /// Session key for server-side backends.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Body of `POST /api/patients`.
#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    /// Draft field values.
    pub draft: Map<String, Value>,
    /// Session key for server-side backends.
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

/// `201` body of `POST /api/patients`.
#[derive(Debug, Serialize)]
pub struct CreatedPatient {
    /// New record id.
    pub id: String,
    /// Path of the new record.
    pub url: String,
}

/// `POST /api/intake`
pub async fn intake(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<IntakeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let prompt = req
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("prompt is required".to_owned()))?;

    let session = RequestSession::resolve(&state, &headers, req.session_id.as_deref());
    let prefill = match req.prefill {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let turn = Turn {
        message: prompt,
        prefill,
        reset: req.reset.unwrap_or(false),
        session_id: session.id().to_owned(),
        caller: caller(&state, &headers),
    };

    let reply = state.engine.handle_turn(turn, session.store()).await?;
    let mut response = Json(reply).into_response();
    session.finish(state.session_ttl, &mut response);
    Ok(response)
}

/// `POST /api/patients`
pub async fn create_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreatePatientRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let owner = caller(&state, &headers).ok_or(ApiError::Unauthorized)?;
    let session = RequestSession::resolve(&state, &headers, req.session_id.as_deref());

    let created = state
        .engine
        .submit(&req.draft, Some(&owner), session.id(), session.store())
        .await?;

    let mut response = (
        StatusCode::CREATED,
        Json(CreatedPatient {
            id: created.id,
            url: created.url,
        }),
    )
        .into_response();
    session.finish(state.session_ttl, &mut response);
    Ok(response)
}

/// `GET /api/health`
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
