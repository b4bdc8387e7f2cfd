//! Per-domain data tables: purge and collect for [`DataDomains`].
//!
//! Every child domain lives in its own table with the same shape
//! (`record_id`, `subject_id`, `subject_email`, `payload`, `created_at`). A
//! record belongs to a subject when either the subject id or the normalised
//! email matches.

use chrono::Utc;
use uuid::Uuid;

use dsr_core::{
  domain::{DataDomains, Domain},
  request::Subject,
};

use crate::{
  Error, Result,
  encode::{encode_dt, encode_uuid},
  store::SqliteStore,
};

fn table(domain: Domain) -> Result<&'static str> {
  match domain {
    Domain::Engagement => Ok("engagement_events"),
    Domain::Assessments => Ok("assessments"),
    Domain::Waitlist => Ok("waitlist_entries"),
    Domain::PartnerDeals => Ok("partner_deals"),
    Domain::RoleAssignments => Ok("role_assignments"),
    Domain::Profile => Ok("profiles"),
    Domain::Identity => Err(Error::NoTable(domain)),
  }
}

const OWNED_BY: &str = "subject_email = ?1 OR (?2 IS NOT NULL AND subject_id = ?2)";

impl SqliteStore {
  /// Store one record of subject-owned data. Returns the new record id.
  pub async fn record_domain_data(
    &self,
    domain: Domain,
    subject: &Subject,
    payload: &serde_json::Value,
  ) -> Result<Uuid> {
    let table          = table(domain)?;
    let record_id      = Uuid::new_v4();
    let id_str         = encode_uuid(record_id);
    let subject_id_str = subject.id.map(encode_uuid);
    let email          = subject.email.clone();
    let payload_str    = payload.to_string();
    let at_str         = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO {table} (record_id, subject_id, subject_email, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)"
          ),
          rusqlite::params![id_str, subject_id_str, email, payload_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(record_id)
  }
}

impl DataDomains for SqliteStore {
  type Error = Error;

  async fn purge(&self, domain: Domain, subject: &Subject) -> Result<u64> {
    let table          = table(domain)?;
    let email          = subject.email.clone();
    let subject_id_str = subject.id.map(encode_uuid);

    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          &format!("DELETE FROM {table} WHERE {OWNED_BY}"),
          rusqlite::params![email, subject_id_str],
        )?)
      })
      .await?;

    Ok(removed as u64)
  }

  async fn collect(&self, domain: Domain, subject: &Subject) -> Result<Vec<serde_json::Value>> {
    let table          = table(domain)?;
    let email          = subject.email.clone();
    let subject_id_str = subject.id.map(encode_uuid);

    let rows: Vec<(String, String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT record_id, payload, created_at FROM {table}
           WHERE {OWNED_BY}
           ORDER BY created_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![email, subject_id_str], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(record_id, payload, created_at)| -> Result<serde_json::Value> {
        Ok(serde_json::json!({
          "recordId":  record_id,
          "createdAt": created_at,
          "data":      serde_json::from_str::<serde_json::Value>(&payload)?,
        }))
      })
      .collect()
  }
}
