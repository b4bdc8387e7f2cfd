//! Encoding and decoding helpers between `dsr-core` types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings, which sort lexically in
//! time order. Enums are stored by their lowercase names. UUIDs are stored as
//! hyphenated lowercase strings.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use dsr_core::{
  domain::{Domain, StepOutcome, StepStatus},
  identity::Identity,
  request::{DataSubjectRequest, RequestStatus, RequestType},
  store::Job,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ────────────────────────────────────────────────────────────────────

fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  s.parse().map_err(|_| Error::Decode { column, value: s.to_owned() })
}

/// `(status, deleted_count, error)` columns of a `request_steps` row.
pub fn encode_step_status(status: &StepStatus) -> (&'static str, Option<i64>, Option<String>) {
  match status {
    StepStatus::Deleted { count } => ("deleted", Some(i64::try_from(*count).unwrap_or(i64::MAX)), None),
    StepStatus::Empty => ("empty", None, None),
    StepStatus::Failed { error } => ("failed", None, Some(error.clone())),
  }
}

fn decode_step_status(status: &str, count: Option<i64>, error: Option<String>) -> Result<StepStatus> {
  match status {
    "deleted" => Ok(StepStatus::Deleted {
      count: count.and_then(|c| u64::try_from(c).ok()).unwrap_or(0),
    }),
    "empty" => Ok(StepStatus::Empty),
    "failed" => Ok(StepStatus::Failed { error: error.unwrap_or_default() }),
    other => Err(Error::Decode { column: "request_steps.status", value: other.to_owned() }),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawRequest::from_row`].
pub const REQUEST_COLUMNS: &str = "request_id, subject_email, subject_id, request_type, status, \
   created_at, processed_at, download_url, download_expires_at, reason, claimed_at";

/// Raw strings read directly from a `requests` row.
pub struct RawRequest {
  pub request_id:          String,
  pub subject_email:       String,
  pub subject_id:          Option<String>,
  pub request_type:        String,
  pub status:              String,
  pub created_at:          String,
  pub processed_at:        Option<String>,
  pub download_url:        Option<String>,
  pub download_expires_at: Option<String>,
  pub reason:              Option<String>,
  pub claimed_at:          Option<String>,
}

impl RawRequest {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      request_id:          row.get(0)?,
      subject_email:       row.get(1)?,
      subject_id:          row.get(2)?,
      request_type:        row.get(3)?,
      status:              row.get(4)?,
      created_at:          row.get(5)?,
      processed_at:        row.get(6)?,
      download_url:        row.get(7)?,
      download_expires_at: row.get(8)?,
      reason:              row.get(9)?,
      claimed_at:          row.get(10)?,
    })
  }

  pub fn into_request(self) -> Result<DataSubjectRequest> {
    Ok(DataSubjectRequest {
      id:                  decode_uuid(&self.request_id)?,
      subject_email:       self.subject_email,
      subject_id:          self.subject_id.as_deref().map(decode_uuid).transpose()?,
      request_type:        decode_enum::<RequestType>("requests.request_type", &self.request_type)?,
      status:              decode_enum::<RequestStatus>("requests.status", &self.status)?,
      created_at:          decode_dt(&self.created_at)?,
      processed_at:        self.processed_at.as_deref().map(decode_dt).transpose()?,
      download_url:        self.download_url,
      download_expires_at: self.download_expires_at.as_deref().map(decode_dt).transpose()?,
      reason:              self.reason,
      claimed_at:          self.claimed_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw strings read directly from a `request_steps` row.
pub struct RawStep {
  pub domain:        String,
  pub status:        String,
  pub deleted_count: Option<i64>,
  pub error:         Option<String>,
  pub recorded_at:   String,
}

impl RawStep {
  pub fn into_step(self) -> Result<StepOutcome> {
    Ok(StepOutcome {
      domain:      decode_enum::<Domain>("request_steps.domain", &self.domain)?,
      status:      decode_step_status(&self.status, self.deleted_count, self.error)?,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

pub struct RawJob {
  pub job_id:     String,
  pub request_id: String,
  pub attempts:   i64,
}

impl RawJob {
  pub fn into_job(self) -> Result<Job> {
    Ok(Job {
      job_id:     decode_uuid(&self.job_id)?,
      request_id: decode_uuid(&self.request_id)?,
      attempts:   u32::try_from(self.attempts).unwrap_or(u32::MAX),
    })
  }
}

pub struct RawIdentity {
  pub identity_id: String,
  pub email:       String,
}

impl RawIdentity {
  pub fn into_identity(self) -> Result<Identity> {
    Ok(Identity { id: decode_uuid(&self.identity_id)?, email: self.email })
  }
}
