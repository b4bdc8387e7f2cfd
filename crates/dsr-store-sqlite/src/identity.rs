//! Identities and bearer credentials.
//!
//! Tokens are 32 random bytes, URL-safe base64 encoded, handed out once by
//! [`SqliteStore::issue_token`]. Only their SHA-256 digest is stored.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rand_core::{OsRng, RngCore as _};
use rusqlite::OptionalExtension as _;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use dsr_core::{
  identity::{Identity, IdentityResolver},
  request::{normalize_email, validate_email},
};

use crate::{
  Error, Result,
  encode::{RawIdentity, encode_dt, encode_uuid},
  store::{SqliteStore, is_constraint_violation},
};

fn token_digest(token: &str) -> String { hex::encode(Sha256::digest(token.as_bytes())) }

impl SqliteStore {
  pub async fn create_identity(&self, email: &str, display_name: Option<String>) -> Result<Identity> {
    let identity = Identity { id: Uuid::new_v4(), email: validate_email(email)? };

    let id_str = encode_uuid(identity.id);
    let email  = identity.email.clone();
    let at_str = encode_dt(Utc::now());

    let created = self
      .conn
      .call(move |conn| {
        match conn.execute(
          "INSERT INTO identities (identity_id, email, display_name, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, email, display_name, at_str],
        ) {
          Ok(_) => Ok(true),
          Err(e) if is_constraint_violation(&e) => Ok(false),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    if !created {
      return Err(Error::IdentityExists(identity.email));
    }
    Ok(identity)
  }

  /// Mint a new bearer token for `identity_id`. The plaintext is returned
  /// exactly once.
  pub async fn issue_token(&self, identity_id: Uuid) -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);

    let digest = token_digest(&token);
    let id_str = encode_uuid(identity_id);
    let at_str = encode_dt(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT INTO credentials (token_sha256, identity_id, created_at)
           SELECT ?1, identity_id, ?3 FROM identities WHERE identity_id = ?2",
          rusqlite::params![digest, id_str, at_str],
        )?)
      })
      .await?;

    if inserted == 0 {
      return Err(Error::IdentityNotFound(identity_id));
    }
    tracing::info!(%identity_id, "bearer token issued");
    Ok(token)
  }
}

impl IdentityResolver for SqliteStore {
  type Error = Error;

  async fn resolve(&self, credential: &str) -> Result<Option<Identity>> {
    let digest = token_digest(credential.trim());

    let raw: Option<RawIdentity> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT i.identity_id, i.email
               FROM credentials c JOIN identities i ON i.identity_id = c.identity_id
               WHERE c.token_sha256 = ?1",
              rusqlite::params![digest],
              |row| Ok(RawIdentity { identity_id: row.get(0)?, email: row.get(1)? }),
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawIdentity::into_identity).transpose()
  }

  async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
    let email = normalize_email(email);

    let raw: Option<RawIdentity> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT identity_id, email FROM identities WHERE email = ?1",
              rusqlite::params![email],
              |row| Ok(RawIdentity { identity_id: row.get(0)?, email: row.get(1)? }),
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawIdentity::into_identity).transpose()
  }

  async fn delete_identity(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);

    // Credentials follow via ON DELETE CASCADE.
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM identities WHERE identity_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;

    Ok(removed > 0)
  }

  async fn describe(&self, id: Uuid) -> Result<Option<serde_json::Value>> {
    let id_str = encode_uuid(id);

    let row: Option<(String, String, Option<String>, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT identity_id, email, display_name, created_at
               FROM identities WHERE identity_id = ?1",
              rusqlite::params![id_str],
              |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(row.map(|(id, email, display_name, created_at)| {
      serde_json::json!({
        "id":          id,
        "email":       email,
        "displayName": display_name,
        "createdAt":   created_at,
      })
    }))
  }
}
