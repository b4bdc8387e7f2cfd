//! Notification outbox.
//!
//! [`Notifier::send`] only appends to the `outbox` table; a separate mail
//! relay drains it. The request's terminal state never depends on delivery.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use dsr_core::notify::Notifier;

use crate::{
  Error, Result,
  encode::{decode_dt, decode_uuid, encode_dt, encode_uuid},
  store::SqliteStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
  pub message_id: Uuid,
  pub recipient:  String,
  pub subject:    String,
  pub body:       String,
  pub created_at: DateTime<Utc>,
}

impl Notifier for SqliteStore {
  type Error = Error;

  async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
    let id_str    = encode_uuid(Uuid::new_v4());
    let recipient = to.to_owned();
    let subject   = subject.to_owned();
    let body      = body.to_owned();
    let at_str    = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO outbox (message_id, recipient, subject, body, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, recipient, subject, body, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

impl SqliteStore {
  /// Messages not yet marked sent, oldest first.
  pub async fn unsent_messages(&self) -> Result<Vec<OutboxMessage>> {
    let rows: Vec<(String, String, String, String, String)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT message_id, recipient, subject, body, created_at
           FROM outbox WHERE sent_at IS NULL
           ORDER BY created_at",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(id, recipient, subject, body, created_at)| -> Result<OutboxMessage> {
        Ok(OutboxMessage {
          message_id: decode_uuid(&id)?,
          recipient,
          subject,
          body,
          created_at: decode_dt(&created_at)?,
        })
      })
      .collect()
  }

  pub async fn mark_sent(&self, message_id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(message_id);
    let at_str = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE outbox SET sent_at = ?2 WHERE message_id = ?1 AND sent_at IS NULL",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;

    Ok(changed == 1)
  }
}
