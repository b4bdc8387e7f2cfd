//! SQLite backend for data-subject rights requests.
//!
//! A single [`SqliteStore`] implements every collaborator trait from
//! `dsr-core`: the request store and job queue, the per-domain data tables,
//! identity resolution and the notification outbox. All access goes through
//! [`tokio_rusqlite`], so queries run on a dedicated thread without blocking
//! the async runtime.

mod domains;
mod encode;
mod identity;
mod outbox;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use outbox::OutboxMessage;
pub use store::SqliteStore;
