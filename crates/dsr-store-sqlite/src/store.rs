//! [`SqliteStore`]: the SQLite implementation of [`RequestStore`] and
//! [`JobQueue`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use dsr_core::{
  domain::StepOutcome,
  request::{
    DataSubjectRequest, NewRequest, RequestStatus, RequestType, Resolution, Subject,
    normalize_email,
  },
  store::{Job, JobQueue, RequestStore},
};

use crate::{
  Error, Result,
  encode::{
    REQUEST_COLUMNS, RawJob, RawRequest, RawStep, encode_dt, encode_step_status, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// Request store, job queue, domain data, identities and outbox backed by a
/// single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

/// `true` if `err` is a UNIQUE / CHECK / FK constraint failure.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

// ─── RequestStore impl ───────────────────────────────────────────────────────

impl RequestStore for SqliteStore {
  type Error = Error;

  async fn insert_request(&self, input: NewRequest) -> Result<Option<DataSubjectRequest>> {
    let request = DataSubjectRequest {
      id:                  Uuid::new_v4(),
      subject_email:       normalize_email(&input.subject_email),
      subject_id:          input.subject_id,
      request_type:        input.request_type,
      status:              RequestStatus::Pending,
      created_at:          Utc::now(),
      processed_at:        None,
      download_url:        None,
      download_expires_at: None,
      reason:              input.reason,
      claimed_at:          None,
    };

    let id_str         = encode_uuid(request.id);
    let job_id_str     = encode_uuid(Uuid::new_v4());
    let email          = request.subject_email.clone();
    let subject_id_str = request.subject_id.map(encode_uuid);
    let type_str       = request.request_type.to_string();
    let status_str     = request.status.to_string();
    let created_str    = encode_dt(request.created_at);
    let reason         = request.reason.clone();
    let enqueue        = request.subject_id.is_some();

    // The request row and its job commit together, or not at all.
    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let result = tx.execute(
          "INSERT INTO requests (
             request_id, subject_email, subject_id, request_type, status, created_at, reason
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            id_str,
            email,
            subject_id_str,
            type_str,
            status_str,
            created_str,
            reason,
          ],
        );
        match result {
          Ok(_) => {}
          Err(e) if is_constraint_violation(&e) => return Ok(false),
          Err(e) => return Err(e.into()),
        }
        if enqueue {
          tx.execute(
            "INSERT INTO jobs (job_id, request_id, attempts, available_at, created_at)
             VALUES (?1, ?2, 0, ?3, ?3)",
            rusqlite::params![job_id_str, id_str, created_str],
          )?;
        }
        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(inserted.then_some(request))
  }

  async fn get_request(&self, id: Uuid) -> Result<Option<DataSubjectRequest>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawRequest> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE request_id = ?1"),
              rusqlite::params![id_str],
              RawRequest::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRequest::into_request).transpose()
  }

  async fn find_requests(
    &self,
    email: &str,
    request_type: RequestType,
    statuses: &[RequestStatus],
  ) -> Result<Vec<DataSubjectRequest>> {
    let email    = normalize_email(email);
    let type_str = request_type.to_string();

    let raws: Vec<RawRequest> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {REQUEST_COLUMNS} FROM requests
           WHERE subject_email = ?1 AND request_type = ?2
           ORDER BY created_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![email, type_str], RawRequest::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut requests = Vec::with_capacity(raws.len());
    for raw in raws {
      let request = raw.into_request()?;
      if statuses.contains(&request.status) {
        requests.push(request);
      }
    }
    Ok(requests)
  }

  async fn begin_processing(&self, id: Uuid, from: RequestStatus) -> Result<bool> {
    let id_str   = encode_uuid(id);
    let from_str = from.to_string();
    let at_str   = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE requests SET status = 'processing', claimed_at = ?3
           WHERE request_id = ?1 AND status = ?2",
          rusqlite::params![id_str, from_str, at_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn renew_claim(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE requests SET claimed_at = ?2
           WHERE request_id = ?1 AND status = 'processing'",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn finish_request(&self, id: Uuid, resolution: Resolution) -> Result<bool> {
    let id_str      = encode_uuid(id);
    let status_str  = resolution.status.to_string();
    let at_str      = encode_dt(resolution.processed_at);
    let url         = resolution.download.as_ref().map(|d| d.url.clone());
    let expires_str = resolution.download.as_ref().map(|d| encode_dt(d.expires_at));

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE requests
           SET status = ?2, processed_at = ?3, download_url = ?4, download_expires_at = ?5
           WHERE request_id = ?1 AND status = 'processing'",
          rusqlite::params![id_str, status_str, at_str, url, expires_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn record_step(&self, id: Uuid, step: &StepOutcome) -> Result<()> {
    let id_str                  = encode_uuid(id);
    let domain_str              = step.domain.to_string();
    let (status, count, error)  = encode_step_status(&step.status);
    let at_str                  = encode_dt(step.recorded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO request_steps (request_id, domain, status, deleted_count, error, recorded_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT (request_id, domain) DO UPDATE SET
             status        = excluded.status,
             deleted_count = excluded.deleted_count,
             error         = excluded.error,
             recorded_at   = excluded.recorded_at",
          rusqlite::params![id_str, domain_str, status, count, error, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_steps(&self, id: Uuid) -> Result<Vec<StepOutcome>> {
    let id_str = encode_uuid(id);

    let raws: Vec<RawStep> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT domain, status, deleted_count, error, recorded_at
           FROM request_steps WHERE request_id = ?1
           ORDER BY recorded_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok(RawStep {
              domain:        row.get(0)?,
              status:        row.get(1)?,
              deleted_count: row.get(2)?,
              error:         row.get(3)?,
              recorded_at:   row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawStep::into_step).collect()
  }

  async fn purge_subject_requests(&self, subject: &Subject, keep: Uuid) -> Result<u64> {
    let keep_str       = encode_uuid(keep);
    let email          = subject.email.clone();
    let subject_id_str = subject.id.map(encode_uuid);

    // Steps and jobs follow via ON DELETE CASCADE.
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM requests
           WHERE request_id != ?1
             AND (subject_email = ?2 OR (?3 IS NOT NULL AND subject_id = ?3))",
          rusqlite::params![keep_str, email, subject_id_str],
        )?)
      })
      .await?;

    Ok(removed as u64)
  }
}

// ─── JobQueue impl ───────────────────────────────────────────────────────────

impl JobQueue for SqliteStore {
  type Error = Error;

  async fn claim_job(&self, now: DateTime<Utc>, lease_until: DateTime<Utc>) -> Result<Option<Job>> {
    let now_str   = encode_dt(now);
    let lease_str = encode_dt(lease_until);

    let raw: Option<RawJob> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "UPDATE jobs SET leased_until = ?2
               WHERE job_id = (
                 SELECT job_id FROM jobs
                 WHERE available_at <= ?1
                   AND (leased_until IS NULL OR leased_until <= ?1)
                 ORDER BY available_at
                 LIMIT 1
               )
               RETURNING job_id, request_id, attempts",
              rusqlite::params![now_str, lease_str],
              |row| {
                Ok(RawJob {
                  job_id:     row.get(0)?,
                  request_id: row.get(1)?,
                  attempts:   row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawJob::into_job).transpose()
  }

  async fn ack_job(&self, job_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(job_id);
    self
      .conn
      .call(move |conn| {
        conn.execute("DELETE FROM jobs WHERE job_id = ?1", rusqlite::params![id_str])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn release_job(&self, job_id: Uuid, available_at: DateTime<Utc>) -> Result<()> {
    let id_str = encode_uuid(job_id);
    let at_str = encode_dt(available_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE jobs SET available_at = ?2, leased_until = NULL WHERE job_id = ?1",
          rusqlite::params![id_str, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn retry_job(&self, job_id: Uuid, available_at: DateTime<Utc>, error: &str) -> Result<()> {
    let id_str = encode_uuid(job_id);
    let at_str = encode_dt(available_at);
    let error  = error.to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE jobs
           SET attempts = attempts + 1, available_at = ?2, leased_until = NULL, last_error = ?3
           WHERE job_id = ?1",
          rusqlite::params![id_str, at_str, error],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

impl SqliteStore {
  /// Number of queued jobs for `request_id`.
  pub async fn pending_jobs(&self, request_id: Uuid) -> Result<u64> {
    let id_str = encode_uuid(request_id);
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM jobs WHERE request_id = ?1",
          rusqlite::params![id_str],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(count as u64)
  }
}
