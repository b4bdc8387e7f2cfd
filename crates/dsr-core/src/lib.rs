//! Core types, collaborator traits and processing logic for data-subject
//! rights requests (export and deletion).
//!
//! This crate is deliberately free of HTTP and database dependencies. Storage
//! backends implement the traits in [`store`], [`domain`], [`identity`],
//! [`notify`] and [`artifact`]; the [`orchestrator::Orchestrator`] ties them
//! together.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod artifact;
pub mod authz;
pub mod deletion;
pub mod domain;
pub mod error;
pub mod export;
pub mod identity;
pub mod intake;
pub mod notify;
pub mod orchestrator;
pub mod request;
pub mod store;
pub mod worker;

pub use error::{Error, Result};

#[cfg(test)]
mod testing;
