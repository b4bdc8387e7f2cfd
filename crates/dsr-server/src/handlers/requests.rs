//! Handlers for submitting and inspecting requests.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/requests` | Body: `{"requestType":"export","reason":?,"email":?}` |
//! | `GET`  | `/api/requests/{id}` | 403 unless the caller owns the request |

use axum::{
  Json,
  extract::{Path, State, rejection::JsonRejection},
  http::StatusCode,
  response::IntoResponse,
};
use dsr_core::{
  domain::StepOutcome,
  identity::IdentityResolver as _,
  request::{DataSubjectRequest, RequestStatus, RequestType},
  store::RequestStore as _,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, auth::MaybeBearer, error::ApiError};

// ─── Submit ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
  pub request_type: RequestType,
  #[serde(default)]
  pub reason:       Option<String>,
  /// Required when no bearer credential is sent.
  #[serde(default)]
  pub email:        Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
  pub success:    bool,
  pub request_id: Uuid,
  pub status:     RequestStatus,
}

/// `POST /api/requests`
pub async fn submit(
  State(state): State<AppState>,
  bearer: MaybeBearer,
  body: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
  let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

  let (email, subject_id) = match bearer.0 {
    Some(token) => {
      let identity = state
        .store
        .resolve(&token)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::Unauthenticated)?;
      (identity.email, Some(identity.id))
    }
    None => {
      let email = body
        .email
        .ok_or_else(|| ApiError::BadRequest("email is required without a credential".into()))?;
      (email, None)
    }
  };

  let request = state
    .intake
    .submit(&email, subject_id, body.request_type, body.reason)
    .await?;

  Ok((
    StatusCode::CREATED,
    Json(Submitted { success: true, request_id: request.id, status: request.status }),
  ))
}

// ─── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
  pub success: bool,
  pub request: DataSubjectRequest,
  /// Per-domain deletion log; empty for exports.
  pub steps:   Vec<StepOutcome>,
}

/// `GET /api/requests/{id}`
pub async fn status(
  State(state): State<AppState>,
  bearer: MaybeBearer,
  Path(raw_id): Path<String>,
) -> Result<Json<StatusView>, ApiError> {
  let request = state.engine.inspect(&raw_id, bearer.credential()).await?;

  let mut steps = state.store.list_steps(request.id).await.map_err(ApiError::internal)?;
  steps.sort_by_key(|s| s.domain);

  Ok(Json(StatusView { success: true, request, steps }))
}
