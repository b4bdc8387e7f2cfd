//! JSON HTTP API for data-subject rights requests.
//!
//! Exposes an axum [`Router`] over a [`SqliteStore`] and a filesystem
//! artifact directory:
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/requests` | Submit; bearer or `email` identifies the subject |
//! | `POST` | `/api/requests/deletion` | Body `{"requestId": ...}`, bearer required |
//! | `POST` | `/api/requests/export` | Body `{"requestId": ...}`, bearer required |
//! | `GET`  | `/api/requests/{id}` | Owner-only status and step log |
//! | `GET`  | `/exports/{file}` | Export download until expiry |
//! | `GET`  | `/healthz` | Liveness |

pub mod artifacts;
pub mod auth;
pub mod error;
pub mod handlers;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use chrono::Duration;
use dsr_core::{
  intake::IntakeHandler,
  orchestrator::{DEFAULT_EXPORT_TTL_HOURS, Orchestrator},
  worker::WorkerConfig,
};
use dsr_store_sqlite::SqliteStore;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use artifacts::FsArtifactStore;
use handlers::{exports, process, requests};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `DSR_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  pub host:             String,
  pub port:             u16,
  /// Public origin used to build export download URLs.
  pub base_url:         String,
  pub store_path:       PathBuf,
  pub export_dir:       PathBuf,
  #[serde(default = "default_export_ttl_hours")]
  pub export_ttl_hours: i64,
  #[serde(default)]
  pub worker:           WorkerConfig,
}

fn default_export_ttl_hours() -> i64 { DEFAULT_EXPORT_TTL_HOURS }

// ─── Application state ────────────────────────────────────────────────────────

/// The orchestrator wired to its production collaborators.
pub type Engine =
  Orchestrator<SqliteStore, SqliteStore, SqliteStore, SqliteStore, FsArtifactStore>;

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState {
  pub store:     Arc<SqliteStore>,
  pub artifacts: Arc<FsArtifactStore>,
  pub engine:    Arc<Engine>,
  pub intake:    IntakeHandler<SqliteStore>,
  pub config:    Arc<ServerConfig>,
}

impl AppState {
  pub fn new(store: SqliteStore, artifacts: FsArtifactStore, config: ServerConfig) -> Self {
    let store = Arc::new(store);
    let artifacts = Arc::new(artifacts);
    let engine = Orchestrator::new(
      store.clone(),
      store.clone(),
      store.clone(),
      store.clone(),
      artifacts.clone(),
    )
    .with_export_ttl(Duration::hours(config.export_ttl_hours));

    Self {
      intake: IntakeHandler::new(store.clone()),
      engine: Arc::new(engine),
      store,
      artifacts,
      config: Arc::new(config),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/healthz", get(handlers::healthz))
    .route("/api/requests", post(requests::submit))
    .route("/api/requests/deletion", post(process::deletion))
    .route("/api/requests/export", post(process::export))
    .route("/api/requests/{id}", get(requests::status))
    .route("/exports/{file}", get(exports::download))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Integration tests ────────────────────────────────────────────────────────
