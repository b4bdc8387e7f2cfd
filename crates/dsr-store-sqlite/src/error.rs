//! Error type for `dsr-store-sqlite`.

use dsr_core::domain::Domain;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] dsr_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A text column held a value outside its enum.
  #[error("unexpected {column} value: {value:?}")]
  Decode { column: &'static str, value: String },

  /// The domain has no backing table (identity lives in `identities`).
  #[error("no data table for domain {0}")]
  NoTable(Domain),

  #[error("identity not found: {0}")]
  IdentityNotFound(uuid::Uuid),

  #[error("an identity with email {0} already exists")]
  IdentityExists(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
