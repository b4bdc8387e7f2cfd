//! `GET /exports/{file}`: serve an export artifact until it expires.
//!
//! The file name is the capability; the request record decides whether the
//! artifact is still live. An expired artifact is removed on first access.

use axum::{
  body::Body,
  extract::{Path, State},
  http::{StatusCode, header},
  response::Response,
};
use chrono::Utc;
use dsr_core::store::RequestStore as _;

use crate::{AppState, artifacts::FsArtifactStore, error::ApiError};

pub async fn download(
  State(state): State<AppState>,
  Path(file): Path<String>,
) -> Result<Response, ApiError> {
  let not_found = || ApiError::NotFound("export not found".into());

  let request_id = FsArtifactStore::request_id_of(&file).ok_or_else(not_found)?;
  let request = state
    .store
    .get_request(request_id)
    .await
    .map_err(ApiError::internal)?
    .ok_or_else(not_found)?;

  let suffix = format!("/exports/{file}");
  let link = request
    .download()
    .filter(|link| link.url.ends_with(&suffix))
    .ok_or_else(not_found)?;

  if link.expires_at <= Utc::now() {
    tracing::info!(%request_id, "export expired; removing artifact");
    if let Err(e) = state.artifacts.remove(&file).await {
      tracing::warn!(%request_id, error = %e, "could not remove expired artifact");
    }
    return Err(not_found());
  }

  let bytes = state
    .artifacts
    .read(&file)
    .await
    .map_err(ApiError::internal)?
    .ok_or_else(not_found)?;

  Response::builder()
    .status(StatusCode::OK)
    .header(header::CONTENT_TYPE, "application/json")
    .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file}\""))
    .header(header::CONTENT_LENGTH, bytes.len())
    .body(Body::from(bytes))
    .map_err(ApiError::internal)
}
