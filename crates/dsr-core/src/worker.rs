//! Queue consumer: claims jobs enqueued at intake and drives them through the
//! [`Orchestrator`].
//!
//! Transient failures are retried with exponential backoff. Once a job has
//! used up `max_attempts` its request is marked `failed`.

use std::{sync::Arc, time::Duration as StdDuration};

use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::Instrument as _;

use crate::{
  Error, Result,
  artifact::ArtifactStore,
  domain::DataDomains,
  identity::IdentityResolver,
  notify::Notifier,
  orchestrator::{JobDisposition, Orchestrator},
  store::{JobQueue, RequestStore},
};

/// Worker pool settings, deserialised from the `[worker]` config table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  pub enabled:          bool,
  /// Number of concurrent consumer tasks.
  pub concurrency:      usize,
  /// Sleep between polls of an empty queue.
  pub poll_interval_ms: u64,
  /// How long a claimed job stays invisible to other consumers.
  pub lease_secs:       i64,
  /// Age of the last claim heartbeat after which a `processing` request
  /// counts as abandoned and is resumed. Must comfortably exceed the
  /// longest single domain operation.
  pub stale_after_secs: i64,
  pub max_attempts:     u32,
  pub base_backoff_ms:  u64,
  pub max_backoff_ms:   u64,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      enabled:          true,
      concurrency:      2,
      poll_interval_ms: 1_000,
      lease_secs:       300,
      stale_after_secs: 3_600,
      max_attempts:     5,
      base_backoff_ms:  2_000,
      max_backoff_ms:   300_000,
    }
  }
}

impl WorkerConfig {
  /// Delay before retry number `attempts` (1-based): `base * 2^(attempts-1)`,
  /// capped at `max_backoff_ms`.
  pub fn backoff(&self, attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(20);
    let ms = self
      .base_backoff_ms
      .saturating_mul(1_u64 << exp)
      .min(self.max_backoff_ms);
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
  }

  fn lease(&self) -> Duration { Duration::seconds(self.lease_secs) }

  /// Never shorter than the lease.
  fn stale_after(&self) -> Duration { Duration::seconds(self.stale_after_secs.max(self.lease_secs)) }
}

pub struct Worker<S, D, I, N, A> {
  orchestrator: Arc<Orchestrator<S, D, I, N, A>>,
  config:       WorkerConfig,
}

impl<S, D, I, N, A> Worker<S, D, I, N, A>
where
  S: RequestStore + JobQueue + 'static,
  D: DataDomains + 'static,
  I: IdentityResolver + 'static,
  N: Notifier + 'static,
  A: ArtifactStore + 'static,
{
  pub fn new(orchestrator: Arc<Orchestrator<S, D, I, N, A>>, config: WorkerConfig) -> Self {
    Self { orchestrator, config }
  }

  /// Claim and handle at most one job. Returns `true` if a job was claimed.
  pub async fn tick(&self) -> Result<bool> {
    let store = self.orchestrator.store();
    let now = Utc::now();
    let Some(job) = store
      .claim_job(now, now + self.config.lease())
      .await
      .map_err(Error::store)?
    else {
      return Ok(false);
    };

    let span = tracing::info_span!(
      "job",
      job_id = %job.job_id,
      request_id = %job.request_id,
      attempt = job.attempts + 1,
    );

    async {
      match self.orchestrator.execute_job(job.request_id, self.config.stale_after()).await {
        Ok(JobDisposition::Done) => {
          store.ack_job(job.job_id).await.map_err(Error::store)?;
        }
        Ok(JobDisposition::Busy) => {
          tracing::debug!("request held elsewhere; re-checking after lease");
          store
            .release_job(job.job_id, now + self.config.lease())
            .await
            .map_err(Error::store)?;
        }
        Err(e) => {
          let attempts = job.attempts + 1;
          if attempts >= self.config.max_attempts {
            tracing::error!(error = %e, attempts, "giving up on job");
            if let Err(abandon_err) = self.orchestrator.abandon(job.request_id).await {
              tracing::error!(error = %abandon_err, "could not mark abandoned request failed");
            }
            store.ack_job(job.job_id).await.map_err(Error::store)?;
          } else {
            let delay = self.config.backoff(attempts);
            tracing::warn!(error = %e, attempts, delay_ms = delay.num_milliseconds(), "job failed; retrying");
            store
              .retry_job(job.job_id, Utc::now() + delay, &e.to_string())
              .await
              .map_err(Error::store)?;
          }
        }
      }
      Ok::<_, Error>(true)
    }
    .instrument(span)
    .await
  }

  /// Poll until `shutdown` flips to `true`.
  pub async fn run(self: Arc<Self>, index: usize, mut shutdown: watch::Receiver<bool>) {
    let poll = StdDuration::from_millis(self.config.poll_interval_ms);
    tracing::info!(worker = index, "worker started");
    loop {
      if *shutdown.borrow() {
        break;
      }
      let handled = match self.tick().await {
        Ok(handled) => handled,
        Err(e) => {
          tracing::warn!(worker = index, error = %e, "queue poll failed");
          false
        }
      };
      if handled {
        continue;
      }
      tokio::select! {
        changed = shutdown.changed() => {
          if changed.is_err() {
            break;
          }
        }
        _ = tokio::time::sleep(poll) => {}
      }
    }
    tracing::info!(worker = index, "worker stopped");
  }

  /// Spawn `concurrency` consumer tasks on the current runtime.
  pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let worker = Arc::new(self);
    (0..worker.config.concurrency.max(1))
      .map(|index| {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(index, shutdown).await })
      })
      .collect()
  }
}
