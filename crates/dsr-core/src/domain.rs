//! Data domains (the categories of records the product keeps about a
//! subject) and the per-domain read/erase trait.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::Subject;

/// One category of subject data.
///
/// [`Domain::ORDERED`] is the execution order for both deletion and export:
/// child records first, the identity record last.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Domain {
  /// Engagement and activity history.
  Engagement,
  /// Submitted assessments.
  Assessments,
  Waitlist,
  /// Deals owned by the subject as a partner.
  PartnerDeals,
  RoleAssignments,
  Profile,
  /// The identity record itself. Handled by the
  /// [`IdentityResolver`](crate::identity::IdentityResolver), never by
  /// [`DataDomains`].
  Identity,
}

impl Domain {
  pub const ORDERED: [Domain; 7] = [
    Domain::Engagement,
    Domain::Assessments,
    Domain::Waitlist,
    Domain::PartnerDeals,
    Domain::RoleAssignments,
    Domain::Profile,
    Domain::Identity,
  ];

  /// Every domain except [`Domain::Identity`], in execution order.
  pub fn children() -> impl Iterator<Item = Domain> {
    Self::ORDERED.into_iter().filter(|d| !d.is_identity())
  }

  pub fn is_identity(&self) -> bool { matches!(self, Self::Identity) }

  /// Human-readable label used in notifications.
  pub fn label(&self) -> &'static str {
    match self {
      Self::Engagement => "engagement history",
      Self::Assessments => "submitted assessments",
      Self::Waitlist => "waitlist entries",
      Self::PartnerDeals => "partner deals",
      Self::RoleAssignments => "role assignments",
      Self::Profile => "profile",
      Self::Identity => "account identity",
    }
  }
}

// ─── Step log ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
  Deleted { count: u64 },
  /// The domain held nothing for the subject.
  Empty,
  Failed { error: String },
}

impl StepStatus {
  pub fn from_count(count: u64) -> Self {
    if count == 0 { Self::Empty } else { Self::Deleted { count } }
  }

  /// A step that does not need to run again when a deletion is resumed.
  pub fn is_done(&self) -> bool { !matches!(self, Self::Failed { .. }) }
}

/// The recorded result of one domain deleter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
  pub domain:      Domain,
  #[serde(flatten)]
  pub status:      StepStatus,
  pub recorded_at: DateTime<Utc>,
}

impl StepOutcome {
  pub fn new(domain: Domain, status: StepStatus) -> Self {
    Self { domain, status, recorded_at: Utc::now() }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Read and erase access to every non-identity domain.
///
/// Implementations match records by subject id (when known) or by the
/// normalised email. `purge` must be idempotent: running it twice for the
/// same subject deletes nothing the second time.
pub trait DataDomains: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Delete every record `subject` owns in `domain`; returns the number of
  /// records removed.
  fn purge<'a>(
    &'a self,
    domain: Domain,
    subject: &'a Subject,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Read every record `subject` owns in `domain`.
  fn collect<'a>(
    &'a self,
    domain: Domain,
    subject: &'a Subject,
  ) -> impl Future<Output = Result<Vec<serde_json::Value>, Self::Error>> + Send + 'a;
}
