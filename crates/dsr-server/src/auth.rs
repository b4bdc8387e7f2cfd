//! Bearer-token extractor.
//!
//! The extractor only parses the header. Resolving the token to an identity
//! is left to the core so that request-id validation and lookup keep their
//! order relative to authentication.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};

use crate::error::ApiError;

/// The `Authorization: Bearer` credential, if one was sent.
///
/// An `Authorization` header with any other scheme, or an empty token, is
/// rejected with 401.
pub struct MaybeBearer(pub Option<String>);

impl MaybeBearer {
  /// The token, or an empty string the core treats as unauthenticated.
  pub fn credential(&self) -> &str { self.0.as_deref().unwrap_or_default() }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
  let Some(value) = headers.get(header::AUTHORIZATION) else {
    return Ok(None);
  };
  let value = value.to_str().map_err(|_| ApiError::Unauthenticated)?;
  let token = value
    .strip_prefix("Bearer ")
    .or_else(|| value.strip_prefix("bearer "))
    .ok_or(ApiError::Unauthenticated)?
    .trim();

  if token.is_empty() {
    return Err(ApiError::Unauthenticated);
  }
  Ok(Some(token.to_owned()))
}

impl<S> FromRequestParts<S> for MaybeBearer
where
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    Ok(MaybeBearer(bearer_token(&parts.headers)?))
  }
}
