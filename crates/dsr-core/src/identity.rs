//! The identity collaborator: resolves bearer credentials and owns the
//! identity record deleted last in a cascading erasure.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The caller behind a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
  pub id:    Uuid,
  pub email: String,
}

pub trait IdentityResolver: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Resolve a bearer credential. `None` means the credential is unknown or
  /// revoked.
  fn resolve<'a>(
    &'a self,
    credential: &'a str,
  ) -> impl Future<Output = Result<Option<Identity>, Self::Error>> + Send + 'a;

  /// Look up the identity registered under `email` (normalised).
  fn find_by_email<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<Option<Identity>, Self::Error>> + Send + 'a;

  /// Remove the identity record and every credential issued to it. Returns
  /// `false` if there was nothing to delete.
  fn delete_identity(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// The identity record in export form. `None` if it does not exist.
  fn describe(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<serde_json::Value>, Self::Error>> + Send + '_;
}
