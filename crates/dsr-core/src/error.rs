//! Error types for `dsr-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::request::RequestType;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed request id, email or request type. Raised before any storage
  /// access.
  #[error("validation error: {0}")]
  Validation(String),

  #[error("missing or invalid credential")]
  Unauthenticated,

  #[error("caller does not own this request")]
  Forbidden,

  #[error("request not found: {0}")]
  NotFound(Uuid),

  #[error("a {request_type} request is already in flight for this subject")]
  DuplicateInFlight { request_type: RequestType },

  /// The request is currently held in `processing` by another invocation.
  #[error("request {0} is already being processed")]
  InFlight(Uuid),

  /// The request reached `failed`; it is never re-run and must be
  /// re-submitted.
  #[error("request {0} has already failed")]
  AlreadyFailed(Uuid),

  /// Anything escaping a per-domain boundary, or any export read failure.
  /// The request has been moved to `failed` when this is returned from
  /// processing.
  #[error("processing failed: {0}")]
  Fatal(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Box a backend error.
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
