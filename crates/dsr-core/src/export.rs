//! All-or-nothing export of a subject's data.
//!
//! Reads the same ordered domains as deletion, but any read failure aborts
//! the whole export: a silently incomplete export is worse than none.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};

use crate::{
  Error, Result,
  artifact::{ArtifactStore, ExportDocument},
  domain::{DataDomains, Domain},
  identity::IdentityResolver,
  request::{DataSubjectRequest, DownloadLink, Subject},
};

pub struct ExportExecutor<'a, D, I, A> {
  pub domains:   &'a D,
  pub identity:  &'a I,
  pub artifacts: &'a A,
  /// How long the published artifact stays downloadable.
  pub ttl:       Duration,
}

impl<D, I, A> ExportExecutor<'_, D, I, A>
where
  D: DataDomains,
  I: IdentityResolver,
  A: ArtifactStore,
{
  pub async fn execute(
    &self,
    request: &DataSubjectRequest,
    subject: &Subject,
  ) -> Result<DownloadLink> {
    let mut domains = BTreeMap::new();
    for domain in Domain::ORDERED {
      let records = if domain.is_identity() {
        self.identity_record(subject).await?
      } else {
        self
          .domains
          .collect(domain, subject)
          .await
          .map_err(|e| Error::Fatal(format!("reading {domain}: {e}")))?
      };
      tracing::debug!(request_id = %request.id, %domain, records = records.len(), "domain exported");
      domains.insert(domain, records);
    }

    let document = ExportDocument {
      request_id: request.id,
      subject_email: subject.email.clone(),
      generated_at: Utc::now(),
      domains,
    };
    let contents = serde_json::to_vec_pretty(&document)?;

    let url = self
      .artifacts
      .put(request.id, contents)
      .await
      .map_err(|e| Error::Fatal(format!("publishing artifact: {e}")))?;

    Ok(DownloadLink {
      url,
      expires_at: document.generated_at + self.ttl,
    })
  }

  async fn identity_record(&self, subject: &Subject) -> Result<Vec<serde_json::Value>> {
    let fatal = |e: I::Error| Error::Fatal(format!("reading identity: {e}"));
    let id = match subject.id {
      Some(id) => Some(id),
      None => self
        .identity
        .find_by_email(&subject.email)
        .await
        .map_err(fatal)?
        .map(|i| i.id),
    };
    let Some(id) = id else { return Ok(Vec::new()) };

    Ok(self.identity.describe(id).await.map_err(fatal)?.into_iter().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    request::RequestType,
    testing::{MemoryBackend, pending_request},
  };

  fn executor(b: &MemoryBackend) -> ExportExecutor<'_, MemoryBackend, MemoryBackend, MemoryBackend> {
    ExportExecutor {
      domains:   b,
      identity:  b,
      artifacts: b,
      ttl:       Duration::hours(24),
    }
  }

  #[tokio::test]
  async fn aggregates_every_domain_into_one_artifact() {
    let b = MemoryBackend::default();
    let identity = b.add_identity("fay@example.com", "tok-fay");
    let subject = Subject::new(Some(identity.id), &identity.email);
    b.seed(Domain::Profile, &subject, serde_json::json!({ "name": "Fay" }));
    b.seed(Domain::Engagement, &subject, serde_json::json!({ "event": "login" }));
    b.seed(Domain::Engagement, &subject, serde_json::json!({ "event": "logout" }));
    let request = pending_request(&b, &subject, RequestType::Export).await;

    let link = executor(&b).execute(&request, &subject).await.unwrap();

    let bytes = b.artifact(&link.url).expect("artifact published");
    let doc: ExportDocument = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(doc.request_id, request.id);
    assert_eq!(doc.domains.len(), Domain::ORDERED.len());
    assert_eq!(doc.domains[&Domain::Engagement].len(), 2);
    assert_eq!(doc.domains[&Domain::Identity].len(), 1);
    assert!(doc.domains[&Domain::Waitlist].is_empty());
    assert_eq!(link.expires_at, doc.generated_at + Duration::hours(24));
  }

  #[tokio::test]
  async fn any_domain_read_failure_is_fatal() {
    let b = MemoryBackend::default();
    let subject = Subject::new(None, "fay@example.com");
    b.fail_collect(Domain::Assessments);
    let request = pending_request(&b, &subject, RequestType::Export).await;

    let err = executor(&b).execute(&request, &subject).await.unwrap_err();
    assert!(matches!(err, Error::Fatal(_)));
    assert_eq!(b.artifact_count(), 0);
  }
}
