//! Export artifacts on the local filesystem.
//!
//! Files are named `{request_id}-{token}.json`; the random token makes the
//! download URL unguessable. Expiry is enforced by the download handler
//! against the request record, not by the file itself.

use std::path::PathBuf;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand_core::{OsRng, RngCore as _};
use thiserror::Error;
use uuid::Uuid;

use dsr_core::artifact::ArtifactStore;

#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("artifact io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid artifact name: {0:?}")]
  InvalidName(String),
}

pub struct FsArtifactStore {
  dir:      PathBuf,
  base_url: String,
}

impl FsArtifactStore {
  /// Use `dir` for artifacts, creating it if needed. Download URLs are
  /// `{base_url}/exports/{file}`.
  pub async fn create(dir: impl Into<PathBuf>, base_url: &str) -> Result<Self, ArtifactError> {
    let dir = dir.into();
    tokio::fs::create_dir_all(&dir).await?;
    Ok(Self { dir, base_url: base_url.trim_end_matches('/').to_owned() })
  }

  /// The request an artifact file belongs to, if `name` is a well-formed
  /// artifact file name.
  pub fn request_id_of(name: &str) -> Option<Uuid> {
    let safe = name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !safe || name.contains("..") || !name.ends_with(".json") {
      return None;
    }
    let (id, rest) = name.split_at_checked(36)?;
    if !rest.starts_with('-') {
      return None;
    }
    Uuid::parse_str(id).ok()
  }

  fn path_of(&self, name: &str) -> Result<PathBuf, ArtifactError> {
    if Self::request_id_of(name).is_none() {
      return Err(ArtifactError::InvalidName(name.to_owned()));
    }
    Ok(self.dir.join(name))
  }

  /// Read an artifact. `None` if it does not exist.
  pub async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, ArtifactError> {
    match tokio::fs::read(self.path_of(name)?).await {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  /// Remove an expired artifact. Missing files are not an error.
  pub async fn remove(&self, name: &str) -> Result<(), ArtifactError> {
    match tokio::fs::remove_file(self.path_of(name)?).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

impl ArtifactStore for FsArtifactStore {
  type Error = ArtifactError;

  async fn put(&self, request_id: Uuid, contents: Vec<u8>) -> Result<String, ArtifactError> {
    let mut token = [0u8; 16];
    OsRng.fill_bytes(&mut token);
    let name = format!("{request_id}-{}.json", URL_SAFE_NO_PAD.encode(token));

    // Write then rename so a reader never sees a partial file.
    let path = self.dir.join(&name);
    let tmp = self.dir.join(format!(".{name}.tmp"));
    tokio::fs::write(&tmp, &contents).await?;
    tokio::fs::rename(&tmp, &path).await?;

    tracing::debug!(%request_id, file = %name, bytes = contents.len(), "export artifact written");
    Ok(format!("{}/exports/{name}", self.base_url))
  }
}
