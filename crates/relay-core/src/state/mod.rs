//! Capture/resolve/flush state store
//!
//! Holds in-flight [`CapturedRecord`]s for running jobs, keyed by
//! `{job_id}:{record_key}` with a TTL lease. Two backends: an in-process
//! map for tests and single-process runs, and a libSQL table that survives
//! restarts. Every read re-validates the remaining TTL; expired entries are
//! reported as such, never silently served.

pub mod libsql;
pub mod memory;

use crate::error::Result;
use crate::models::{CapturedRecord, JobId};

pub use self::libsql::LibSqlStateStore;
pub use self::memory::MemoryStateStore;

/// What a state-store read found
#[derive(Debug, Clone, PartialEq)]
pub enum Lease {
    /// Entry exists and its TTL has not elapsed
    Live(CapturedRecord),
    /// Entry exists but its TTL elapsed; it counts as abandoned
    Expired(CapturedRecord),
    /// No entry under this key
    Missing,
}

impl Lease {
    /// The live captured record, if any
    #[must_use]
    pub fn live(self) -> Option<CapturedRecord> {
        match self {
            Self::Live(record) => Some(record),
            Self::Expired(_) | Self::Missing => None,
        }
    }
}

/// State-store backend, dispatched by variant
pub enum StateStore {
    /// In-process map
    Memory(MemoryStateStore),
    /// libSQL table
    LibSql(LibSqlStateStore),
}

impl StateStore {
    /// An in-process store
    #[must_use]
    pub fn in_memory() -> Self {
        Self::Memory(MemoryStateStore::new())
    }

    /// Store or overwrite a captured record.
    ///
    /// Overwrite is deliberate: at most one live entry may exist per
    /// `(job_id, record_key)`.
    pub async fn capture(&self, record: CapturedRecord) -> Result<()> {
        match self {
            Self::Memory(store) => {
                store.capture(record);
                Ok(())
            }
            Self::LibSql(store) => store.capture(record).await,
        }
    }

    /// Read the entry for a job/record pair, validating its TTL
    pub async fn get(&self, job_id: &JobId, record_key: &str) -> Result<Lease> {
        match self {
            Self::Memory(store) => Ok(store.get(job_id, record_key)),
            Self::LibSql(store) => store.get(job_id, record_key).await,
        }
    }

    /// Re-arm the TTL of a live entry; false when the entry is missing or
    /// already expired
    pub async fn touch(&self, job_id: &JobId, record_key: &str, ttl_ms: i64) -> Result<bool> {
        match self {
            Self::Memory(store) => Ok(store.touch(job_id, record_key, ttl_ms)),
            Self::LibSql(store) => store.touch(job_id, record_key, ttl_ms).await,
        }
    }

    /// Delete the entry on flush; false when nothing was stored
    pub async fn remove(&self, job_id: &JobId, record_key: &str) -> Result<bool> {
        match self {
            Self::Memory(store) => Ok(store.remove(job_id, record_key)),
            Self::LibSql(store) => store.remove(job_id, record_key).await,
        }
    }

    /// Delete and return every expired entry of a job, for abandoned
    /// accounting
    pub async fn reap_expired(&self, job_id: &JobId) -> Result<Vec<CapturedRecord>> {
        match self {
            Self::Memory(store) => Ok(store.reap_expired(job_id)),
            Self::LibSql(store) => store.reap_expired(job_id).await,
        }
    }

    /// Live entries of a job, oldest capture first
    pub async fn live_for_job(&self, job_id: &JobId) -> Result<Vec<CapturedRecord>> {
        match self {
            Self::Memory(store) => Ok(store.live_for_job(job_id)),
            Self::LibSql(store) => store.live_for_job(job_id).await,
        }
    }
}
