//! The `RequestStore` and `JobQueue` traits.
//!
//! Both are implemented by storage backends (e.g. `dsr-store-sqlite`). The
//! orchestrator, intake handler and worker depend on these abstractions, not
//! on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  domain::StepOutcome,
  request::{DataSubjectRequest, NewRequest, RequestStatus, RequestType, Resolution, Subject},
};

/// Persistence for [`DataSubjectRequest`] records and their deletion step log.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait RequestStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Insert a new `pending` request. When the submitter was authenticated
  /// (`subject_id` is set) its processing job is enqueued in the same atomic
  /// operation; an email-only request gets no job and waits for the owner to
  /// trigger it with a credential.
  ///
  /// Returns `None` without inserting anything when a `pending` or
  /// `processing` request with the same `(subject_email, request_type)`
  /// already exists.
  fn insert_request(
    &self,
    input: NewRequest,
  ) -> impl Future<Output = Result<Option<DataSubjectRequest>, Self::Error>> + Send + '_;

  fn get_request(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<DataSubjectRequest>, Self::Error>> + Send + '_;

  /// Requests for `email` (normalised) of `request_type` whose status is one
  /// of `statuses`.
  fn find_requests<'a>(
    &'a self,
    email: &'a str,
    request_type: RequestType,
    statuses: &'a [RequestStatus],
  ) -> impl Future<Output = Result<Vec<DataSubjectRequest>, Self::Error>> + Send + 'a;

  /// Compare-and-set the request from `from` into `processing`, stamping
  /// `claimed_at`. Returns `false` if the request was not in `from`.
  fn begin_processing(
    &self,
    id: Uuid,
    from: RequestStatus,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Refresh `claimed_at` on a `processing` request so it is not mistaken
  /// for an abandoned one. Returns `false` if the request is no longer
  /// `processing`.
  fn renew_claim(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Move a `processing` request to its terminal state. Returns `false` if
  /// the request was not `processing`.
  fn finish_request(
    &self,
    id: Uuid,
    resolution: Resolution,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Persist one deletion step, replacing any earlier outcome for the same
  /// domain.
  fn record_step<'a>(
    &'a self,
    id: Uuid,
    step: &'a StepOutcome,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// The persisted step log of a request, in no particular order.
  fn list_steps(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Vec<StepOutcome>, Self::Error>> + Send + '_;

  /// Delete every request owned by `subject` (by id or email) except `keep`,
  /// together with their steps and jobs. Returns the number of requests
  /// removed.
  fn purge_subject_requests<'a>(
    &'a self,
    subject: &'a Subject,
    keep: Uuid,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;
}

// ─── Queue ───────────────────────────────────────────────────────────────────

/// A claimed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
  pub job_id:     Uuid,
  pub request_id: Uuid,
  /// Number of earlier attempts; `0` on first delivery.
  pub attempts:   u32,
}

/// Durable work queue feeding the [`crate::worker::Worker`].
///
/// A claimed job is invisible to other claimants until `lease_until`; a
/// worker that dies mid-job therefore lets the job reappear.
pub trait JobQueue: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Atomically claim the oldest job available at `now`.
  fn claim_job(
    &self,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Job>, Self::Error>> + Send + '_;

  /// The job is finished; remove it.
  fn ack_job(
    &self,
    job_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Make the job available again at `available_at` without counting an
  /// attempt. Used when the request is held by another invocation.
  fn release_job(
    &self,
    job_id: Uuid,
    available_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Record a failed attempt and release the job for another try at
  /// `available_at`.
  fn retry_job<'a>(
    &'a self,
    job_id: Uuid,
    available_at: DateTime<Utc>,
    error: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
