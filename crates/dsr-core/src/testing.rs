//! In-memory test doubles for every collaborator trait, with call counters
//! and failure injection.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
  artifact::ArtifactStore,
  domain::{DataDomains, Domain, StepOutcome},
  identity::{Identity, IdentityResolver},
  notify::Notifier,
  request::{
    DataSubjectRequest, NewRequest, RequestStatus, RequestType, Resolution, Subject,
    normalize_email,
  },
  store::{Job, JobQueue, RequestStore},
};

#[derive(Debug, Error)]
#[error("injected failure: {0}")]
pub struct MemoryError(String);

struct Record {
  subject_id: Option<Uuid>,
  email:      String,
  value:      serde_json::Value,
}

impl Record {
  fn belongs_to(&self, subject: &Subject) -> bool {
    (subject.id.is_some() && self.subject_id == subject.id) || self.email == subject.email
  }
}

struct MemJob {
  job_id:       Uuid,
  request_id:   Uuid,
  attempts:     u32,
  available_at: DateTime<Utc>,
  leased_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Failures {
  purge:           HashSet<Domain>,
  collect:         HashSet<Domain>,
  identity_delete: bool,
  record_step:     bool,
  notify:          bool,
  next_gets:       usize,
}

#[derive(Default)]
struct State {
  requests:   HashMap<Uuid, DataSubjectRequest>,
  steps:      HashMap<Uuid, Vec<StepOutcome>>,
  jobs:       Vec<MemJob>,
  records:    HashMap<Domain, Vec<Record>>,
  identities: HashMap<Uuid, Identity>,
  tokens:     HashMap<String, Uuid>,
  sent:       Vec<(String, String, String)>,
  artifacts:  HashMap<String, Vec<u8>>,
  failures:   Failures,
}

#[derive(Default)]
pub struct MemoryBackend {
  state:         Mutex<State>,
  store_calls:   AtomicUsize,
  purge_calls:   AtomicUsize,
  collect_calls: AtomicUsize,
  renewals:      AtomicUsize,
}

impl MemoryBackend {
  fn state(&self) -> std::sync::MutexGuard<'_, State> { self.state.lock().unwrap() }

  fn store_call(&self) { self.store_calls.fetch_add(1, Ordering::SeqCst); }

  // ── Fixtures ──────────────────────────────────────────────────────────────

  pub fn add_identity(&self, email: &str, token: &str) -> Identity {
    let identity = Identity { id: Uuid::new_v4(), email: normalize_email(email) };
    let mut state = self.state();
    state.identities.insert(identity.id, identity.clone());
    state.tokens.insert(token.to_owned(), identity.id);
    identity
  }

  pub fn seed(&self, domain: Domain, subject: &Subject, value: serde_json::Value) {
    self.state().records.entry(domain).or_default().push(Record {
      subject_id: subject.id,
      email: subject.email.clone(),
      value,
    });
  }

  // ── Inspection ────────────────────────────────────────────────────────────

  pub fn count(&self, domain: Domain, subject: &Subject) -> usize {
    self
      .state()
      .records
      .get(&domain)
      .map_or(0, |rs| rs.iter().filter(|r| r.belongs_to(subject)).count())
  }

  pub fn identity_exists(&self, id: Uuid) -> bool { self.state().identities.contains_key(&id) }

  pub fn resolve_token(&self, token: &str) -> Option<Identity> {
    let state = self.state();
    state.tokens.get(token).and_then(|id| state.identities.get(id)).cloned()
  }

  pub fn request(&self, id: Uuid) -> Option<DataSubjectRequest> {
    self.state().requests.get(&id).cloned()
  }

  /// Request ids with a queued job.
  pub fn queued_jobs(&self) -> Vec<Uuid> {
    self.state().jobs.iter().map(|j| j.request_id).collect()
  }

  pub fn job_attempts(&self, request_id: Uuid) -> Option<u32> {
    self
      .state()
      .jobs
      .iter()
      .find(|j| j.request_id == request_id)
      .map(|j| j.attempts)
  }

  pub fn store_calls(&self) -> usize { self.store_calls.load(Ordering::SeqCst) }

  pub fn purge_calls(&self) -> usize { self.purge_calls.load(Ordering::SeqCst) }

  pub fn collect_calls(&self) -> usize { self.collect_calls.load(Ordering::SeqCst) }

  /// Number of `renew_claim` heartbeats received.
  pub fn renewals(&self) -> usize { self.renewals.load(Ordering::SeqCst) }

  pub fn sent(&self) -> Vec<(String, String, String)> { self.state().sent.clone() }

  pub fn artifact(&self, location: &str) -> Option<Vec<u8>> {
    self.state().artifacts.get(location).cloned()
  }

  pub fn artifact_count(&self) -> usize { self.state().artifacts.len() }

  // ── Failure injection ─────────────────────────────────────────────────────

  pub fn fail_purge(&self, domain: Domain) { self.state().failures.purge.insert(domain); }

  pub fn fail_collect(&self, domain: Domain) { self.state().failures.collect.insert(domain); }

  pub fn fail_identity_delete(&self) { self.state().failures.identity_delete = true; }

  pub fn fail_record_step(&self) { self.state().failures.record_step = true; }

  pub fn fail_notify(&self) { self.state().failures.notify = true; }

  /// Fail the next `n` calls to `get_request`.
  pub fn fail_next_gets(&self, n: usize) { self.state().failures.next_gets = n; }

  pub fn clear_failures(&self) { self.state().failures = Failures::default(); }
}

/// Insert a `pending` request for `subject` directly through the store. A
/// job is queued only when `subject.id` is set.
pub async fn pending_request(
  backend: &MemoryBackend,
  subject: &Subject,
  request_type: RequestType,
) -> DataSubjectRequest {
  backend
    .insert_request(NewRequest {
      subject_email: subject.email.clone(),
      subject_id: subject.id,
      request_type,
      reason: None,
    })
    .await
    .unwrap()
    .expect("no in-flight request of this type")
}

// ─── RequestStore ────────────────────────────────────────────────────────────

impl RequestStore for MemoryBackend {
  type Error = MemoryError;

  async fn insert_request(&self, input: NewRequest) -> Result<Option<DataSubjectRequest>, MemoryError> {
    self.store_call();
    let mut state = self.state();
    let email = normalize_email(&input.subject_email);
    let blocked = state.requests.values().any(|r| {
      r.subject_email == email
        && r.request_type == input.request_type
        && !r.status.is_terminal()
    });
    if blocked {
      return Ok(None);
    }

    let request = DataSubjectRequest {
      id: Uuid::new_v4(),
      subject_email: email,
      subject_id: input.subject_id,
      request_type: input.request_type,
      status: RequestStatus::Pending,
      created_at: Utc::now(),
      processed_at: None,
      download_url: None,
      download_expires_at: None,
      reason: input.reason,
      claimed_at: None,
    };
    state.requests.insert(request.id, request.clone());
    if request.subject_id.is_some() {
      state.jobs.push(MemJob {
        job_id:       Uuid::new_v4(),
        request_id:   request.id,
        attempts:     0,
        available_at: request.created_at,
        leased_until: None,
      });
    }
    Ok(Some(request))
  }

  async fn get_request(&self, id: Uuid) -> Result<Option<DataSubjectRequest>, MemoryError> {
    self.store_call();
    let mut state = self.state();
    if state.failures.next_gets > 0 {
      state.failures.next_gets -= 1;
      return Err(MemoryError("get_request".into()));
    }
    Ok(state.requests.get(&id).cloned())
  }

  async fn find_requests(
    &self,
    email: &str,
    request_type: RequestType,
    statuses: &[RequestStatus],
  ) -> Result<Vec<DataSubjectRequest>, MemoryError> {
    self.store_call();
    let email = normalize_email(email);
    Ok(
      self
        .state()
        .requests
        .values()
        .filter(|r| {
          r.subject_email == email && r.request_type == request_type && statuses.contains(&r.status)
        })
        .cloned()
        .collect(),
    )
  }

  async fn begin_processing(&self, id: Uuid, from: RequestStatus) -> Result<bool, MemoryError> {
    self.store_call();
    let mut state = self.state();
    match state.requests.get_mut(&id) {
      Some(r) if r.status == from => {
        r.status = RequestStatus::Processing;
        r.claimed_at = Some(Utc::now());
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn renew_claim(&self, id: Uuid) -> Result<bool, MemoryError> {
    self.store_call();
    self.renewals.fetch_add(1, Ordering::SeqCst);
    let mut state = self.state();
    match state.requests.get_mut(&id) {
      Some(r) if r.status == RequestStatus::Processing => {
        r.claimed_at = Some(Utc::now());
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn finish_request(&self, id: Uuid, resolution: Resolution) -> Result<bool, MemoryError> {
    self.store_call();
    let mut state = self.state();
    match state.requests.get_mut(&id) {
      Some(r) if r.status == RequestStatus::Processing => {
        r.status = resolution.status;
        r.processed_at = Some(resolution.processed_at);
        r.download_url = resolution.download.as_ref().map(|d| d.url.clone());
        r.download_expires_at = resolution.download.as_ref().map(|d| d.expires_at);
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn record_step(&self, id: Uuid, step: &StepOutcome) -> Result<(), MemoryError> {
    self.store_call();
    let mut state = self.state();
    if state.failures.record_step {
      return Err(MemoryError("record_step".into()));
    }
    let steps = state.steps.entry(id).or_default();
    steps.retain(|s| s.domain != step.domain);
    steps.push(step.clone());
    Ok(())
  }

  async fn list_steps(&self, id: Uuid) -> Result<Vec<StepOutcome>, MemoryError> {
    self.store_call();
    Ok(self.state().steps.get(&id).cloned().unwrap_or_default())
  }

  async fn purge_subject_requests(&self, subject: &Subject, keep: Uuid) -> Result<u64, MemoryError> {
    self.store_call();
    let mut state = self.state();
    let doomed: Vec<Uuid> = state
      .requests
      .values()
      .filter(|r| {
        r.id != keep
          && ((subject.id.is_some() && r.subject_id == subject.id) || r.subject_email == subject.email)
      })
      .map(|r| r.id)
      .collect();
    for id in &doomed {
      state.requests.remove(id);
      state.steps.remove(id);
    }
    state.jobs.retain(|j| !doomed.contains(&j.request_id));
    Ok(doomed.len() as u64)
  }
}

// ─── JobQueue ────────────────────────────────────────────────────────────────

impl JobQueue for MemoryBackend {
  type Error = MemoryError;

  async fn claim_job(
    &self,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
  ) -> Result<Option<Job>, MemoryError> {
    self.store_call();
    let mut state = self.state();
    let job = state
      .jobs
      .iter_mut()
      .filter(|j| j.available_at <= now && j.leased_until.is_none_or(|l| l <= now))
      .min_by_key(|j| j.available_at);
    Ok(job.map(|j| {
      j.leased_until = Some(lease_until);
      Job { job_id: j.job_id, request_id: j.request_id, attempts: j.attempts }
    }))
  }

  async fn ack_job(&self, job_id: Uuid) -> Result<(), MemoryError> {
    self.store_call();
    self.state().jobs.retain(|j| j.job_id != job_id);
    Ok(())
  }

  async fn release_job(&self, job_id: Uuid, available_at: DateTime<Utc>) -> Result<(), MemoryError> {
    self.store_call();
    if let Some(j) = self.state().jobs.iter_mut().find(|j| j.job_id == job_id) {
      j.available_at = available_at;
      j.leased_until = None;
    }
    Ok(())
  }

  async fn retry_job(
    &self,
    job_id: Uuid,
    available_at: DateTime<Utc>,
    _error: &str,
  ) -> Result<(), MemoryError> {
    self.store_call();
    if let Some(j) = self.state().jobs.iter_mut().find(|j| j.job_id == job_id) {
      j.attempts += 1;
      j.available_at = available_at;
      j.leased_until = None;
    }
    Ok(())
  }
}

// ─── DataDomains ─────────────────────────────────────────────────────────────

impl DataDomains for MemoryBackend {
  type Error = MemoryError;

  async fn purge(&self, domain: Domain, subject: &Subject) -> Result<u64, MemoryError> {
    self.purge_calls.fetch_add(1, Ordering::SeqCst);
    let mut state = self.state();
    if state.failures.purge.contains(&domain) {
      return Err(MemoryError(format!("purge {domain}")));
    }
    let records = state.records.entry(domain).or_default();
    let before = records.len();
    records.retain(|r| !r.belongs_to(subject));
    Ok((before - records.len()) as u64)
  }

  async fn collect(&self, domain: Domain, subject: &Subject) -> Result<Vec<serde_json::Value>, MemoryError> {
    self.collect_calls.fetch_add(1, Ordering::SeqCst);
    let state = self.state();
    if state.failures.collect.contains(&domain) {
      return Err(MemoryError(format!("collect {domain}")));
    }
    Ok(
      state
        .records
        .get(&domain)
        .map(|rs| rs.iter().filter(|r| r.belongs_to(subject)).map(|r| r.value.clone()).collect())
        .unwrap_or_default(),
    )
  }
}

// ─── IdentityResolver ────────────────────────────────────────────────────────

impl IdentityResolver for MemoryBackend {
  type Error = MemoryError;

  async fn resolve(&self, credential: &str) -> Result<Option<Identity>, MemoryError> {
    Ok(self.resolve_token(credential))
  }

  async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, MemoryError> {
    let email = normalize_email(email);
    Ok(self.state().identities.values().find(|i| i.email == email).cloned())
  }

  async fn delete_identity(&self, id: Uuid) -> Result<bool, MemoryError> {
    let mut state = self.state();
    if state.failures.identity_delete {
      return Err(MemoryError("delete_identity".into()));
    }
    state.tokens.retain(|_, owner| *owner != id);
    Ok(state.identities.remove(&id).is_some())
  }

  async fn describe(&self, id: Uuid) -> Result<Option<serde_json::Value>, MemoryError> {
    Ok(
      self
        .state()
        .identities
        .get(&id)
        .map(|i| serde_json::json!({ "id": i.id, "email": i.email })),
    )
  }
}

// ─── Notifier / ArtifactStore ────────────────────────────────────────────────

impl Notifier for MemoryBackend {
  type Error = MemoryError;

  async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MemoryError> {
    let mut state = self.state();
    if state.failures.notify {
      return Err(MemoryError("send".into()));
    }
    state.sent.push((to.to_owned(), subject.to_owned(), body.to_owned()));
    Ok(())
  }
}

impl ArtifactStore for MemoryBackend {
  type Error = MemoryError;

  async fn put(&self, request_id: Uuid, contents: Vec<u8>) -> Result<String, MemoryError> {
    let location = format!("memory://exports/{request_id}.json");
    self.state().artifacts.insert(location.clone(), contents);
    Ok(location)
  }
}
