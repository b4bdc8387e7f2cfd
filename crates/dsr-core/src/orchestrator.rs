//! The request state machine.
//!
//! ```text
//! pending ──► processing ──► completed
//!                  │
//!                  └───────► failed
//! ```
//!
//! Two entry points converge on the same claim and execution path:
//!
//! - [`Orchestrator::process`]: the synchronous, credential-bearing trigger
//!   used by the HTTP endpoints. Validates the id, authorizes the caller and
//!   then executes.
//! - [`Orchestrator::execute_job`]: the queue consumer used by the
//!   [`Worker`](crate::worker::Worker). It carries no credential, so it only
//!   runs requests whose submitter was authenticated at intake (those with a
//!   `subject_id`). It also resumes deletions left stuck in `processing`.
//!
//! The move into `processing` is a compare-and-set, so a request is executed
//! by at most one of them at a time.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result,
  artifact::ArtifactStore,
  authz::authorize,
  deletion::{DeletionExecutor, DeletionReport},
  domain::DataDomains,
  export::ExportExecutor,
  identity::IdentityResolver,
  notify::{Notifier, Outcome, notify},
  request::{DataSubjectRequest, DownloadLink, RequestStatus, RequestType, Resolution, Subject},
  store::RequestStore,
};

/// Default lifetime of an export artifact.
pub const DEFAULT_EXPORT_TTL_HOURS: i64 = 24 * 7;

/// The successful result of processing a request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProcessingOutcome {
  Deletion(DeletionReport),
  Export(DownloadLink),
}

/// What the worker should do with the job after [`Orchestrator::execute_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
  /// The request is terminal (or gone); drop the job.
  Done,
  /// Another invocation holds the request; look again later.
  Busy,
}

pub struct Orchestrator<S, D, I, N, A> {
  store:      Arc<S>,
  domains:    Arc<D>,
  identity:   Arc<I>,
  notifier:   Arc<N>,
  artifacts:  Arc<A>,
  export_ttl: Duration,
}

/// Parse a caller-supplied request id. Runs before any storage access.
pub fn parse_request_id(raw: &str) -> Result<Uuid> {
  let raw = raw.trim();
  if raw.is_empty() {
    return Err(Error::Validation("missing request id".into()));
  }
  Uuid::parse_str(raw).map_err(|_| Error::Validation(format!("malformed request id: {raw:?}")))
}

impl<S, D, I, N, A> Orchestrator<S, D, I, N, A>
where
  S: RequestStore,
  D: DataDomains,
  I: IdentityResolver,
  N: Notifier,
  A: ArtifactStore,
{
  pub fn new(
    store: Arc<S>,
    domains: Arc<D>,
    identity: Arc<I>,
    notifier: Arc<N>,
    artifacts: Arc<A>,
  ) -> Self {
    Self {
      store,
      domains,
      identity,
      notifier,
      artifacts,
      export_ttl: Duration::hours(DEFAULT_EXPORT_TTL_HOURS),
    }
  }

  pub fn with_export_ttl(mut self, ttl: Duration) -> Self {
    self.export_ttl = ttl;
    self
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  // ── Credential-bearing entry points ───────────────────────────────────────

  /// Process a request on behalf of the caller behind `credential`.
  ///
  /// `expected` is the operation the caller asked for; a request of the
  /// other type is reported as not found.
  pub async fn process(
    &self,
    raw_id: &str,
    credential: &str,
    expected: RequestType,
  ) -> Result<ProcessingOutcome> {
    let (request, subject) = self.load_authorized(raw_id, credential, Some(expected)).await?;

    match request.status {
      RequestStatus::Completed => return self.replay(&request).await,
      RequestStatus::Failed => return Err(Error::AlreadyFailed(request.id)),
      RequestStatus::Processing => return Err(Error::InFlight(request.id)),
      RequestStatus::Pending => {}
    }

    if !self.claim(&request, RequestStatus::Pending).await? {
      return Err(Error::InFlight(request.id));
    }
    self.execute_claimed(&request, &subject).await
  }

  /// Return the request if the caller owns it.
  pub async fn inspect(&self, raw_id: &str, credential: &str) -> Result<DataSubjectRequest> {
    let (request, _) = self.load_authorized(raw_id, credential, None).await?;
    Ok(request)
  }

  async fn load_authorized(
    &self,
    raw_id: &str,
    credential: &str,
    expected: Option<RequestType>,
  ) -> Result<(DataSubjectRequest, Subject)> {
    let id = parse_request_id(raw_id)?;

    let request = self
      .store
      .get_request(id)
      .await
      .map_err(Error::store)?
      .filter(|r| expected.is_none_or(|t| r.request_type == t))
      .ok_or(Error::NotFound(id))?;

    let caller = authorize(&*self.identity, credential, &request).await?;

    // An email-matched caller supplies the identity the request lacked.
    let subject = Subject::new(request.subject_id.or(Some(caller.id)), &request.subject_email);
    Ok((request, subject))
  }

  // ── Queue entry point ─────────────────────────────────────────────────────

  /// Execute the request behind a queued job.
  ///
  /// A request without a `subject_id` was never proven to belong to its
  /// submitter; its job is dropped untouched and the request waits for
  /// [`Orchestrator::process`]. A `processing` request whose claim is older
  /// than `stale_after` is assumed abandoned and resumed; completed deletion
  /// steps are not re-run.
  pub async fn execute_job(&self, request_id: Uuid, stale_after: Duration) -> Result<JobDisposition> {
    let Some(request) = self.store.get_request(request_id).await.map_err(Error::store)? else {
      tracing::debug!(%request_id, "request no longer exists; dropping job");
      return Ok(JobDisposition::Done);
    };
    if request.subject_id.is_none() {
      tracing::warn!(%request_id, "request has no verified owner; dropping job");
      return Ok(JobDisposition::Done);
    }

    match request.status {
      RequestStatus::Completed | RequestStatus::Failed => return Ok(JobDisposition::Done),
      RequestStatus::Pending => {
        if !self.claim(&request, RequestStatus::Pending).await? {
          return Ok(JobDisposition::Busy);
        }
      }
      RequestStatus::Processing => {
        let stale = request
          .claimed_at
          .is_none_or(|at| Utc::now() - at >= stale_after);
        if !stale || !self.claim(&request, RequestStatus::Processing).await? {
          return Ok(JobDisposition::Busy);
        }
        tracing::warn!(%request_id, "resuming stale request");
      }
    }

    match self.execute_claimed(&request, &request.subject()).await {
      Ok(_) | Err(Error::Fatal(_)) => Ok(JobDisposition::Done),
      Err(e) => Err(e),
    }
  }

  /// Mark a request `failed` after the queue gave up on it.
  pub async fn abandon(&self, request_id: Uuid) -> Result<()> {
    let Some(request) = self.store.get_request(request_id).await.map_err(Error::store)? else {
      return Ok(());
    };
    if request.status.is_terminal() || request.subject_id.is_none() {
      return Ok(());
    }
    if request.status == RequestStatus::Pending {
      self.claim(&request, RequestStatus::Pending).await?;
    }
    self
      .store
      .finish_request(request_id, Resolution::failed())
      .await
      .map_err(Error::store)?;
    tracing::error!(%request_id, "request abandoned after repeated failures");
    notify(&*self.notifier, &request.subject_email, request.request_type, Outcome::Failed).await;
    Ok(())
  }

  // ── Shared execution path ─────────────────────────────────────────────────

  async fn claim(&self, request: &DataSubjectRequest, from: RequestStatus) -> Result<bool> {
    let claimed = self
      .store
      .begin_processing(request.id, from)
      .await
      .map_err(Error::store)?;
    if claimed {
      tracing::info!(request_id = %request.id, request_type = %request.request_type, "processing");
    }
    Ok(claimed)
  }

  /// Run the executor for a request already moved into `processing`, record
  /// the terminal state and notify the subject.
  async fn execute_claimed(
    &self,
    request: &DataSubjectRequest,
    subject: &Subject,
  ) -> Result<ProcessingOutcome> {
    let result = match request.request_type {
      RequestType::Deletion => DeletionExecutor {
        store:    &*self.store,
        domains:  &*self.domains,
        identity: &*self.identity,
      }
      .execute(request, subject)
      .await
      .map(ProcessingOutcome::Deletion),
      RequestType::Export => ExportExecutor {
        domains:   &*self.domains,
        identity:  &*self.identity,
        artifacts: &*self.artifacts,
        ttl:       self.export_ttl,
      }
      .execute(request, subject)
      .await
      .map(ProcessingOutcome::Export),
    };

    let outcome = match result {
      Ok(outcome) => outcome,
      Err(e) => {
        tracing::error!(request_id = %request.id, error = %e, "request failed");
        if let Err(store_err) = self.store.finish_request(request.id, Resolution::failed()).await {
          tracing::error!(request_id = %request.id, error = %store_err, "could not mark request failed");
        }
        notify(&*self.notifier, &request.subject_email, request.request_type, Outcome::Failed).await;
        return Err(match e {
          Error::Fatal(msg) => Error::Fatal(msg),
          other => Error::Fatal(other.to_string()),
        });
      }
    };

    let resolution = match &outcome {
      ProcessingOutcome::Export(link) => Resolution::completed_export(link.clone()),
      ProcessingOutcome::Deletion(_) => Resolution::completed(),
    };
    // A failure here leaves the request `processing`; the queue resumes it
    // once the claim goes stale.
    let finished = self
      .store
      .finish_request(request.id, resolution)
      .await
      .map_err(Error::store)?;
    if !finished {
      tracing::warn!(request_id = %request.id, "request left processing before completion was recorded");
    }
    tracing::info!(request_id = %request.id, request_type = %request.request_type, "completed");

    match &outcome {
      ProcessingOutcome::Deletion(report) => {
        let deleted = report.deleted();
        let summary = Outcome::Deleted {
          deleted:          &deleted,
          manual_follow_up: report.manual_follow_up(),
        };
        notify(&*self.notifier, &request.subject_email, request.request_type, summary).await;
      }
      ProcessingOutcome::Export(link) => {
        notify(&*self.notifier, &request.subject_email, request.request_type, Outcome::Exported(link))
          .await;
      }
    }

    Ok(outcome)
  }

  /// Re-processing a completed request is a no-op that reports the recorded
  /// outcome.
  async fn replay(&self, request: &DataSubjectRequest) -> Result<ProcessingOutcome> {
    tracing::debug!(request_id = %request.id, "request already completed; replaying outcome");
    match request.request_type {
      RequestType::Deletion => {
        let mut steps = self.store.list_steps(request.id).await.map_err(Error::store)?;
        steps.sort_by_key(|s| s.domain);
        Ok(ProcessingOutcome::Deletion(DeletionReport { steps, history_removed: 0 }))
      }
      RequestType::Export => request
        .download()
        .map(ProcessingOutcome::Export)
        .ok_or_else(|| Error::Fatal(format!("completed export {} has no artifact", request.id))),
    }
  }
}
