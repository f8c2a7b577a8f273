//! Durable configuration and audit storage
//!
//! Holds datasources, sync configs, job history, and conflicts in libSQL.
//! Transient per-record capture state lives in [`crate::state`], not here.

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{
    ConflictRepository, DatasourceRepository, JobRepository, SyncConfigRepository,
};
