//! Outcome notifications. Purely informational: a delivery failure is logged
//! and never changes a request's recorded status.

use std::future::Future;

use crate::{
  domain::Domain,
  request::{DownloadLink, RequestType},
};

/// Delivery channel for human-readable outcome emails.
pub trait Notifier: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn send<'a>(
    &'a self,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

/// What to tell the subject.
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
  Deleted {
    deleted:          &'a [Domain],
    manual_follow_up: bool,
  },
  Exported(&'a DownloadLink),
  Failed,
}

/// Render the subject line and body for an outcome.
pub fn compose(request_type: RequestType, outcome: Outcome<'_>) -> (String, String) {
  let kind = match request_type {
    RequestType::Export => "data export",
    RequestType::Deletion => "data deletion",
  };

  match outcome {
    Outcome::Deleted { deleted, manual_follow_up } => {
      let mut body = String::from("We have erased the following data:\n");
      if deleted.is_empty() {
        body.push_str("  (no stored data was found)\n");
      }
      for domain in deleted {
        body.push_str(&format!("  - {}\n", domain.label()));
      }
      if manual_follow_up {
        body.push_str(
          "\nSome records could not be removed automatically. Our team will \
           complete the erasure manually and contact you if needed.\n",
        );
      }
      (format!("Your {kind} request is complete"), body)
    }
    Outcome::Exported(link) => (
      format!("Your {kind} request is ready"),
      format!(
        "Your data is available for download at:\n  {}\n\nThis link expires at {}.\n",
        link.url,
        link.expires_at.to_rfc3339(),
      ),
    ),
    Outcome::Failed => (
      format!("Your {kind} request could not be completed"),
      "Something went wrong while processing your request. Please submit it \
       again, or contact support if the problem persists.\n"
        .to_string(),
    ),
  }
}

/// Send the outcome email for a request. Never fails.
pub async fn notify<N: Notifier>(
  notifier: &N,
  to: &str,
  request_type: RequestType,
  outcome: Outcome<'_>,
) {
  let (subject, body) = compose(request_type, outcome);
  match notifier.send(to, &subject, &body).await {
    Ok(()) => tracing::debug!(%request_type, "outcome notification sent"),
    Err(e) => tracing::warn!(%request_type, error = %e, "outcome notification failed"),
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;

  #[test]
  fn deletion_body_lists_domains_and_follow_up() {
    let (subject, body) = compose(
      RequestType::Deletion,
      Outcome::Deleted {
        deleted:          &[Domain::Profile, Domain::Waitlist],
        manual_follow_up: true,
      },
    );
    assert_eq!(subject, "Your data deletion request is complete");
    assert!(body.contains("profile"));
    assert!(body.contains("waitlist entries"));
    assert!(body.contains("manually"));
  }

  #[test]
  fn export_body_contains_link() {
    let link = DownloadLink {
      url:        "https://example.com/exports/x.json".into(),
      expires_at: Utc::now(),
    };
    let (subject, body) = compose(RequestType::Export, Outcome::Exported(&link));
    assert_eq!(subject, "Your data export request is ready");
    assert!(body.contains(&link.url));
  }
}
