//! Cascading, best-effort deletion of a subject's data.
//!
//! Domains run strictly in [`Domain::ORDERED`] order, one at a time, each in
//! its own failure boundary: an error in one domain is recorded as a failed
//! step and the next domain still runs. The identity record is always the
//! last step. Every step outcome is persisted before the next step starts, so
//! an interrupted deletion resumes where it stopped.
//!
//! Only failures outside the per-domain boundaries (the step log itself
//! cannot be written) are fatal.

use std::collections::HashMap;

use serde::Serialize;

use crate::{
  Error, Result,
  domain::{DataDomains, Domain, StepOutcome, StepStatus},
  identity::IdentityResolver,
  request::{DataSubjectRequest, Subject},
  store::RequestStore,
};

/// Flag attached to a report whose identity step failed.
pub const IDENTITY_FOLLOW_UP: &str = "identity deletion requires manual follow-up";

/// The outcome of a deletion: one step per domain, in execution order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
  pub steps:           Vec<StepOutcome>,
  /// Other request records of the same subject removed after the domains.
  pub history_removed: u64,
}

impl DeletionReport {
  /// Domains where at least one record was removed.
  pub fn deleted(&self) -> Vec<Domain> {
    self
      .steps
      .iter()
      .filter(|s| matches!(s.status, StepStatus::Deleted { .. }))
      .map(|s| s.domain)
      .collect()
  }

  pub fn failed(&self) -> Vec<Domain> {
    self
      .steps
      .iter()
      .filter(|s| matches!(s.status, StepStatus::Failed { .. }))
      .map(|s| s.domain)
      .collect()
  }

  /// `true` when the identity record could not be deleted and a human has to
  /// finish the erasure.
  pub fn manual_follow_up(&self) -> bool {
    self.failed().contains(&Domain::Identity)
  }
}

/// Runs the ordered domain deleters for one request.
pub struct DeletionExecutor<'a, S, D, I> {
  pub store:    &'a S,
  pub domains:  &'a D,
  pub identity: &'a I,
}

impl<S, D, I> DeletionExecutor<'_, S, D, I>
where
  S: RequestStore,
  D: DataDomains,
  I: IdentityResolver,
{
  pub async fn execute(
    &self,
    request: &DataSubjectRequest,
    subject: &Subject,
  ) -> Result<DeletionReport> {
    let prior: HashMap<Domain, StepOutcome> = self
      .store
      .list_steps(request.id)
      .await
      .map_err(|e| Error::Fatal(format!("reading step log: {e}")))?
      .into_iter()
      .map(|s| (s.domain, s))
      .collect();

    let mut steps = Vec::with_capacity(Domain::ORDERED.len());
    for domain in Domain::ORDERED {
      if let Some(done) = prior.get(&domain).filter(|s| s.status.is_done()) {
        tracing::debug!(request_id = %request.id, %domain, "step already complete; skipping");
        steps.push(done.clone());
        continue;
      }

      let status = if domain.is_identity() {
        self.delete_identity(subject).await
      } else {
        match self.domains.purge(domain, subject).await {
          Ok(count) => StepStatus::from_count(count),
          Err(e) => StepStatus::Failed { error: e.to_string() },
        }
      };

      match &status {
        StepStatus::Failed { error } if domain.is_identity() => tracing::error!(
          request_id = %request.id,
          error = %error,
          "{IDENTITY_FOLLOW_UP}"
        ),
        StepStatus::Failed { error } => tracing::warn!(
          request_id = %request.id,
          %domain,
          error = %error,
          "domain deletion failed; continuing"
        ),
        StepStatus::Deleted { count } => {
          tracing::info!(request_id = %request.id, %domain, count, "domain deleted")
        }
        StepStatus::Empty => {
          tracing::debug!(request_id = %request.id, %domain, "domain held no records")
        }
      }

      let step = StepOutcome::new(domain, status);
      self
        .store
        .record_step(request.id, &step)
        .await
        .map_err(|e| Error::Fatal(format!("recording {domain} step: {e}")))?;
      steps.push(step);

      // Heartbeat: a live deletion must never look abandoned to the queue.
      match self.store.renew_claim(request.id).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(request_id = %request.id, "request left processing mid-deletion"),
        Err(e) => tracing::warn!(request_id = %request.id, error = %e, "could not renew claim"),
      }
    }

    // The subject's other requests describe data that no longer exists.
    let history_removed = match self.store.purge_subject_requests(subject, request.id).await {
      Ok(n) => n,
      Err(e) => {
        tracing::warn!(request_id = %request.id, error = %e, "could not purge request history");
        0
      }
    };

    Ok(DeletionReport { steps, history_removed })
  }

  async fn delete_identity(&self, subject: &Subject) -> StepStatus {
    let id = match subject.id {
      Some(id) => id,
      None => match self.identity.find_by_email(&subject.email).await {
        Ok(Some(identity)) => identity.id,
        Ok(None) => return StepStatus::Empty,
        Err(e) => return StepStatus::Failed { error: e.to_string() },
      },
    };

    match self.identity.delete_identity(id).await {
      Ok(existed) => StepStatus::from_count(u64::from(existed)),
      Err(e) => StepStatus::Failed { error: e.to_string() },
    }
  }
}
