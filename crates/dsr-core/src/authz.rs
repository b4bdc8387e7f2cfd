//! Authorization guard: may this caller act on this request?
//!
//! Runs before any request mutation or domain operation, so a rejected caller
//! causes no side effects.

use crate::{
  Error, Result,
  identity::{Identity, IdentityResolver},
  request::{DataSubjectRequest, same_email},
};

/// `true` if `caller` is the request's owner: either the recorded subject id
/// matches, or the subject email matches case-insensitively.
pub fn owns(caller: &Identity, request: &DataSubjectRequest) -> bool {
  request.subject_id == Some(caller.id) || same_email(&request.subject_email, &caller.email)
}

/// Resolve `credential` and check ownership of `request`.
///
/// Unknown credentials yield [`Error::Unauthenticated`]; a resolved caller
/// who does not own the request yields [`Error::Forbidden`].
pub async fn authorize<I: IdentityResolver>(
  resolver: &I,
  credential: &str,
  request: &DataSubjectRequest,
) -> Result<Identity> {
  if credential.trim().is_empty() {
    return Err(Error::Unauthenticated);
  }

  let caller = resolver
    .resolve(credential)
    .await
    .map_err(Error::store)?
    .ok_or(Error::Unauthenticated)?;

  if !owns(&caller, request) {
    tracing::warn!(
      request_id = %request.id,
      caller_id = %caller.id,
      "caller does not own request"
    );
    return Err(Error::Forbidden);
  }

  Ok(caller)
}
