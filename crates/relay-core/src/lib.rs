//! relay-core - Sync execution engine for relay
//!
//! This crate contains the shared models, datasource adapters, field mapping
//! and expression evaluation, conflict resolution, transient state store,
//! durable storage, and the job orchestrator used by the API and CLI.

pub mod adapters;
pub mod engine;
pub mod error;
pub mod expr;
pub mod mapper;
pub mod models;
pub mod resolver;
pub mod settings;
pub mod state;
pub mod store;

pub use error::{Error, Result};
pub use models::{Conflict, Datasource, Record, SyncConfig, SyncJob};
