//! Intake handler: validates, deduplicates and creates new requests.
//!
//! A request from an authenticated submitter has its processing job enqueued
//! in the same store operation. An email-only request is recorded `pending`
//! and runs only when its owner triggers it with a credential.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
  Error, Result,
  request::{DataSubjectRequest, NewRequest, RequestStatus, RequestType, validate_email},
  store::RequestStore,
};

/// Longest accepted free-text reason, in characters.
pub const MAX_REASON_LEN: usize = 2000;

pub struct IntakeHandler<S> {
  store: Arc<S>,
}

impl<S> Clone for IntakeHandler<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: RequestStore> IntakeHandler<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Create a `pending` request for the subject.
  ///
  /// Fails with [`Error::DuplicateInFlight`] while another request of the
  /// same type for the same email is `pending` or `processing`. Requests in
  /// a terminal state never block a new submission.
  pub async fn submit(
    &self,
    subject_email: &str,
    subject_id: Option<Uuid>,
    request_type: RequestType,
    reason: Option<String>,
  ) -> Result<DataSubjectRequest> {
    let email = validate_email(subject_email)?;
    let reason = reason
      .map(|r| r.trim().to_owned())
      .filter(|r| !r.is_empty());
    if reason.as_ref().is_some_and(|r| r.chars().count() > MAX_REASON_LEN) {
      return Err(Error::Validation(format!(
        "reason must be at most {MAX_REASON_LEN} characters"
      )));
    }

    let in_flight = self
      .store
      .find_requests(&email, request_type, &RequestStatus::IN_FLIGHT)
      .await
      .map_err(Error::store)?;
    if let Some(existing) = in_flight.first() {
      tracing::info!(
        existing_id = %existing.id,
        %request_type,
        "rejecting duplicate in-flight request"
      );
      return Err(Error::DuplicateInFlight { request_type });
    }

    // The pre-check above can race with a concurrent submission; the store
    // enforces the rule atomically and reports the loser as `None`.
    let created = self
      .store
      .insert_request(NewRequest {
        subject_email: email,
        subject_id,
        request_type,
        reason,
      })
      .await
      .map_err(Error::store)?
      .ok_or(Error::DuplicateInFlight { request_type })?;

    tracing::info!(
      request_id = %created.id,
      %request_type,
      "data subject request accepted"
    );
    Ok(created)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    request::Resolution,
    testing::MemoryBackend,
  };

  fn intake(backend: &Arc<MemoryBackend>) -> IntakeHandler<MemoryBackend> {
    IntakeHandler::new(backend.clone())
  }

  #[tokio::test]
  async fn authenticated_submission_is_queued() {
    let backend = Arc::new(MemoryBackend::default());
    let created = intake(&backend)
      .submit("Dana@Example.com", Some(Uuid::new_v4()), RequestType::Export, Some("  moving on ".into()))
      .await
      .unwrap();

    assert_eq!(created.status, RequestStatus::Pending);
    assert_eq!(created.subject_email, "dana@example.com");
    assert_eq!(created.reason.as_deref(), Some("moving on"));
    assert_eq!(backend.queued_jobs(), vec![created.id]);
  }

  #[tokio::test]
  async fn email_only_submission_is_recorded_but_not_queued() {
    let backend = Arc::new(MemoryBackend::default());
    let created = intake(&backend)
      .submit("dana@example.com", None, RequestType::Deletion, None)
      .await
      .unwrap();

    assert_eq!(backend.request(created.id).unwrap().status, RequestStatus::Pending);
    assert!(backend.queued_jobs().is_empty());
  }

  #[tokio::test]
  async fn duplicate_in_flight_is_rejected() {
    let backend = Arc::new(MemoryBackend::default());
    let h = intake(&backend);
    h.submit("dana@example.com", None, RequestType::Deletion, None).await.unwrap();

    let err = h
      .submit("DANA@example.com", None, RequestType::Deletion, None)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::DuplicateInFlight { request_type: RequestType::Deletion }));
  }

  #[tokio::test]
  async fn different_type_for_same_email_is_accepted() {
    let backend = Arc::new(MemoryBackend::default());
    let h = intake(&backend);
    let a = h.submit("dana@example.com", None, RequestType::Deletion, None).await.unwrap();
    let b = h.submit("dana@example.com", None, RequestType::Export, None).await.unwrap();
    assert_ne!(a.id, b.id);
  }

  #[tokio::test]
  async fn processing_request_also_blocks() {
    let backend = Arc::new(MemoryBackend::default());
    let h = intake(&backend);
    let a = h.submit("dana@example.com", None, RequestType::Deletion, None).await.unwrap();
    backend.begin_processing(a.id, RequestStatus::Pending).await.unwrap();

    let err = h
      .submit("dana@example.com", None, RequestType::Deletion, None)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::DuplicateInFlight { .. }));
  }

  #[tokio::test]
  async fn resubmission_after_terminal_state_creates_new_request() {
    let backend = Arc::new(MemoryBackend::default());
    let h = intake(&backend);
    let first = h.submit("dana@example.com", None, RequestType::Export, None).await.unwrap();
    backend.begin_processing(first.id, RequestStatus::Pending).await.unwrap();
    backend.finish_request(first.id, Resolution::failed()).await.unwrap();

    let second = h.submit("dana@example.com", None, RequestType::Export, None).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.status, RequestStatus::Pending);
  }

  #[tokio::test]
  async fn invalid_email_never_touches_store() {
    let backend = Arc::new(MemoryBackend::default());
    let err = intake(&backend)
      .submit("nope", None, RequestType::Export, None)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(backend.store_calls(), 0);
  }

  #[tokio::test]
  async fn overlong_reason_is_rejected() {
    let backend = Arc::new(MemoryBackend::default());
    let reason = "x".repeat(MAX_REASON_LEN + 1);
    let err = intake(&backend)
      .submit("dana@example.com", None, RequestType::Export, Some(reason))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }
}
