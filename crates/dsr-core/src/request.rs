//! The `DataSubjectRequest` record and its lifecycle vocabulary.
//!
//! A request is created `pending` by the intake handler and only ever moved
//! forward by the orchestrator: `pending → processing → {completed | failed}`.
//! Ownership fields (`subject_email`, `subject_id`) never change after
//! creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::ValidateEmail as _;

use crate::{Error, Result};

// ─── Enumerations ────────────────────────────────────────────────────────────

/// What the subject asked for. Immutable after creation.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RequestType {
  Export,
  Deletion,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RequestStatus {
  Pending,
  Processing,
  Completed,
  Failed,
}

impl RequestStatus {
  /// The statuses that block a second request of the same type for the same
  /// subject.
  pub const IN_FLIGHT: [RequestStatus; 2] =
    [RequestStatus::Pending, RequestStatus::Processing];

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

// ─── Email ───────────────────────────────────────────────────────────────────

/// Canonical form used for storage and comparison: trimmed and lower-cased.
pub fn normalize_email(raw: &str) -> String { raw.trim().to_lowercase() }

/// Normalise `raw` and reject it unless it is a syntactically valid address.
pub fn validate_email(raw: &str) -> Result<String> {
  let email = normalize_email(raw);
  if email.is_empty() || !email.validate_email() {
    return Err(Error::Validation(format!("invalid email address: {raw:?}")));
  }
  Ok(email)
}

/// Case-insensitive address comparison.
pub fn same_email(a: &str, b: &str) -> bool {
  normalize_email(a) == normalize_email(b)
}

// ─── Subject ─────────────────────────────────────────────────────────────────

/// The individual a request targets, as seen by the domain executors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
  /// Known authenticated identity, if any.
  pub id:    Option<Uuid>,
  /// Always normalised.
  pub email: String,
}

impl Subject {
  pub fn new(id: Option<Uuid>, email: &str) -> Self {
    Self { id, email: normalize_email(email) }
  }
}

// ─── Request ─────────────────────────────────────────────────────────────────

/// A time-limited link to an export artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLink {
  pub url:        String,
  pub expires_at: DateTime<Utc>,
}

/// The only persistent entity of this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSubjectRequest {
  pub id:                  Uuid,
  pub subject_email:       String,
  pub subject_id:          Option<Uuid>,
  pub request_type:        RequestType,
  pub status:              RequestStatus,
  pub created_at:          DateTime<Utc>,
  /// Set on the transition to `completed` or `failed`.
  pub processed_at:        Option<DateTime<Utc>>,
  /// Only ever set for a completed export.
  pub download_url:        Option<String>,
  pub download_expires_at: Option<DateTime<Utc>>,
  pub reason:              Option<String>,
  /// When the request last entered `processing`.
  pub claimed_at:          Option<DateTime<Utc>>,
}

impl DataSubjectRequest {
  pub fn subject(&self) -> Subject {
    Subject::new(self.subject_id, &self.subject_email)
  }

  pub fn download(&self) -> Option<DownloadLink> {
    match (&self.download_url, self.download_expires_at) {
      (Some(url), Some(expires_at)) => Some(DownloadLink {
        url: url.clone(),
        expires_at,
      }),
      _ => None,
    }
  }
}

/// Input to [`crate::store::RequestStore::insert_request`].
/// `id`, `status` and `created_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewRequest {
  pub subject_email: String,
  pub subject_id:    Option<Uuid>,
  pub request_type:  RequestType,
  pub reason:        Option<String>,
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// The terminal fields written when a request leaves `processing`.
#[derive(Debug, Clone)]
pub struct Resolution {
  pub status:       RequestStatus,
  pub processed_at: DateTime<Utc>,
  pub download:     Option<DownloadLink>,
}

impl Resolution {
  pub fn completed() -> Self {
    Self {
      status:       RequestStatus::Completed,
      processed_at: Utc::now(),
      download:     None,
    }
  }

  pub fn completed_export(download: DownloadLink) -> Self {
    Self { download: Some(download), ..Self::completed() }
  }

  pub fn failed() -> Self {
    Self {
      status:       RequestStatus::Failed,
      processed_at: Utc::now(),
      download:     None,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::str::FromStr as _;

  use super::*;

  #[test]
  fn email_is_normalised_and_validated() {
    assert_eq!(validate_email("  Alice@Example.COM ").unwrap(), "alice@example.com");
    assert!(matches!(validate_email("not-an-address"), Err(Error::Validation(_))));
    assert!(matches!(validate_email(""), Err(Error::Validation(_))));
  }

  #[test]
  fn email_comparison_ignores_case() {
    assert!(same_email("Bob@Example.com", "bob@example.com"));
    assert!(!same_email("bob@example.com", "rob@example.com"));
  }

  #[test]
  fn string_forms_are_lowercase() {
    assert_eq!(RequestType::Deletion.as_ref(), "deletion");
    assert_eq!(RequestStatus::from_str("processing").unwrap(), RequestStatus::Processing);
    assert!(RequestType::from_str("rectification").is_err());
  }

  #[test]
  fn only_completed_and_failed_are_terminal() {
    assert!(!RequestStatus::Pending.is_terminal());
    assert!(!RequestStatus::Processing.is_terminal());
    assert!(RequestStatus::Completed.is_terminal());
    assert!(RequestStatus::Failed.is_terminal());
  }
}
