//! The processing endpoints: one per request type.
//!
//! Body `{"requestId": "<uuid>"}` with `Authorization: Bearer <token>`. The
//! request runs to a terminal state within the call.

use axum::{
  Json,
  extract::{State, rejection::JsonRejection},
};
use chrono::{DateTime, Utc};
use dsr_core::{
  domain::{Domain, StepOutcome},
  orchestrator::ProcessingOutcome,
  request::RequestType,
};
use serde::{Deserialize, Serialize};

use crate::{AppState, auth::MaybeBearer, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBody {
  #[serde(default)]
  pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionResponse {
  pub success:          bool,
  pub deleted:          Vec<Domain>,
  pub failed:           Vec<Domain>,
  pub manual_follow_up: bool,
  pub steps:            Vec<StepOutcome>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
  pub success:           bool,
  pub artifact_location: String,
  pub expires_at:        DateTime<Utc>,
}

async fn run(
  state: &AppState,
  bearer: &MaybeBearer,
  body: Result<Json<ProcessBody>, JsonRejection>,
  expected: RequestType,
) -> Result<ProcessingOutcome, ApiError> {
  let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
  let raw_id = body.request_id.unwrap_or_default();
  Ok(state.engine.process(&raw_id, bearer.credential(), expected).await?)
}

/// `POST /api/requests/deletion`
pub async fn deletion(
  State(state): State<AppState>,
  bearer: MaybeBearer,
  body: Result<Json<ProcessBody>, JsonRejection>,
) -> Result<Json<DeletionResponse>, ApiError> {
  match run(&state, &bearer, body, RequestType::Deletion).await? {
    ProcessingOutcome::Deletion(report) => Ok(Json(DeletionResponse {
      success:          true,
      deleted:          report.deleted(),
      failed:           report.failed(),
      manual_follow_up: report.manual_follow_up(),
      steps:            report.steps,
    })),
    ProcessingOutcome::Export(_) => Err(ApiError::NotFound("request not found".into())),
  }
}

/// `POST /api/requests/export`
pub async fn export(
  State(state): State<AppState>,
  bearer: MaybeBearer,
  body: Result<Json<ProcessBody>, JsonRejection>,
) -> Result<Json<ExportResponse>, ApiError> {
  match run(&state, &bearer, body, RequestType::Export).await? {
    ProcessingOutcome::Export(link) => Ok(Json(ExportResponse {
      success:           true,
      artifact_location: link.url,
      expires_at:        link.expires_at,
    })),
    ProcessingOutcome::Deletion(_) => Err(ApiError::NotFound("request not found".into())),
  }
}
