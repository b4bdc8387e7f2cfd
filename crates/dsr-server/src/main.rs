//! `dsr` server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered with
//! `DSR_*` environment variables, opens the SQLite store, and either serves
//! the HTTP API with its queue workers or runs one of the admin commands.
//!
//! # Issuing a credential
//!
//! ```text
//! dsr add-identity alice@example.com --name Alice
//! dsr issue-token --email alice@example.com
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dsr_core::{identity::IdentityResolver as _, worker::Worker};
use dsr_server::{AppState, ServerConfig, artifacts::FsArtifactStore};
use dsr_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, sync::watch};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Data-subject rights request server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the HTTP API and run the queue workers (default).
  Serve,
  /// Register an identity that can hold bearer credentials.
  AddIdentity {
    email: String,
    #[arg(long)]
    name:  Option<String>,
  },
  /// Mint a bearer token for an existing identity and print it.
  IssueToken {
    #[arg(long)]
    email: String,
  },
  /// Print unsent notifications as JSON lines and mark them sent.
  DrainOutbox,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let config = load_config(&cli.config)?;

  let store_path = expand_tilde(&config.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command.unwrap_or(Command::Serve) {
    Command::Serve => serve(store, config).await,
    Command::AddIdentity { email, name } => {
      let identity = store
        .create_identity(&email, name)
        .await
        .context("failed to create identity")?;
      println!("{}", identity.id);
      Ok(())
    }
    Command::IssueToken { email } => {
      let identity = store
        .find_by_email(&email)
        .await?
        .with_context(|| format!("no identity with email {email}"))?;
      let token = store.issue_token(identity.id).await?;
      println!("{token}");
      Ok(())
    }
    Command::DrainOutbox => {
      for message in store.unsent_messages().await? {
        let line = serde_json::json!({
          "to":        message.recipient,
          "subject":   message.subject,
          "body":      message.body,
          "createdAt": message.created_at,
        });
        println!("{line}");
        store.mark_sent(message.message_id).await?;
      }
      Ok(())
    }
  }
}

fn load_config(path: &Path) -> anyhow::Result<ServerConfig> {
  let settings = config::Config::builder()
    .set_default("host", "127.0.0.1")?
    .set_default("port", 8080)?
    .set_default("base_url", "http://localhost:8080")?
    .set_default("store_path", "dsr.db")?
    .set_default("export_dir", "exports")?
    .add_source(config::File::from(path).required(false))
    .add_source(
      config::Environment::with_prefix("DSR")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")
}

async fn serve(store: SqliteStore, config: ServerConfig) -> anyhow::Result<()> {
  let export_dir = expand_tilde(&config.export_dir);
  let artifacts = FsArtifactStore::create(&export_dir, &config.base_url)
    .await
    .with_context(|| format!("failed to prepare export dir {export_dir:?}"))?;

  let state = AppState::new(store, artifacts, config.clone());

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let workers = if config.worker.enabled {
    Worker::new(state.engine.clone(), config.worker.clone()).spawn(shutdown_rx)
  } else {
    tracing::warn!("queue workers disabled; requests only run when triggered over HTTP");
    Vec::new()
  };

  let app = dsr_server::router(state);
  let address = format!("{}:{}", config.host, config.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
      }
    })
    .await
    .context("server error")?;

  tracing::info!("shutting down workers");
  shutdown_tx.send(true).ok();
  for handle in workers {
    handle.await.ok();
  }

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
