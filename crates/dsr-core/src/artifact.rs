//! Export artifacts: the aggregated document and the store that publishes it.

use std::{collections::BTreeMap, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Domain;

/// Everything held about a subject, grouped by domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
  pub request_id:    Uuid,
  pub subject_email: String,
  pub generated_at:  DateTime<Utc>,
  pub domains:       BTreeMap<Domain, Vec<serde_json::Value>>,
}

/// Publishes a finished export and returns a location the subject can
/// download it from.
pub trait ArtifactStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn put(
    &self,
    request_id: Uuid,
    contents: Vec<u8>,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + '_;
}
