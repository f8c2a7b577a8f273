//! Sync job model and state machine

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// A unique identifier for a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new unique job ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Job lifecycle: `Pending -> Running -> {Completed, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet picked up by the orchestrator
    Pending,
    /// Batches are being processed
    Running,
    /// Master exhausted; pending conflicts do not prevent completion
    Completed,
    /// Aborted by an unrecoverable error; partial counters preserved
    Failed,
    /// Stopped at a batch boundary by an external request
    Cancelled,
}

impl JobStatus {
    /// Whether this status permits no further transitions
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Lowercase wire name for this status
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::InvalidInput(format!("Unknown job status: {other}"))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What requested the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Started from the CLI
    Manual,
    /// Started through the HTTP API
    Api,
    /// Started by an inbound webhook
    Webhook,
}

impl TriggerSource {
    /// Lowercase wire name for this trigger
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Api => "api",
            Self::Webhook => "webhook",
        }
    }
}

impl FromStr for TriggerSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "api" => Ok(Self::Api),
            "webhook" => Ok(Self::Webhook),
            other => Err(Error::InvalidInput(format!("Unknown trigger: {other}"))),
        }
    }
}

/// Per-job progress counters, owned by the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    /// Master records read and routed through the pipeline
    pub processed: u64,
    /// New records created on the slave
    pub inserted: u64,
    /// Existing slave records overwritten
    pub updated: u64,
    /// Slave records removed by delete propagation
    pub deleted: u64,
    /// Records parked as pending conflicts
    pub conflicts: u64,
    /// Per-record mapping/write failures that were skipped
    pub errors: u64,
    /// Captured records whose TTL elapsed before resolution
    pub abandoned: u64,
}

impl JobCounters {
    /// Sum of records that reached a terminal per-record outcome
    #[must_use]
    pub const fn settled(&self) -> u64 {
        self.inserted + self.updated + self.errors
    }
}

/// One execution of a `SyncConfig`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Unique identifier
    pub id: JobId,
    /// Config snapshot this job executes
    pub config_id: super::SyncConfigId,
    /// Current lifecycle state
    pub status: JobStatus,
    /// What requested the job
    pub trigger: TriggerSource,
    /// Progress counters
    pub counters: JobCounters,
    /// Master record count at job start, for progress reporting
    pub total_records: Option<u64>,
    /// Fatal error message when status is `Failed`
    pub error_message: Option<String>,
    /// Creation timestamp (unix ms)
    pub created_at: i64,
    /// When the orchestrator picked the job up (unix ms)
    pub started_at: Option<i64>,
    /// When the job reached a terminal state (unix ms)
    pub finished_at: Option<i64>,
}

impl SyncJob {
    /// Create a pending job for the given config
    #[must_use]
    pub fn new(config_id: super::SyncConfigId, trigger: TriggerSource) -> Self {
        Self {
            id: JobId::new(),
            config_id,
            status: JobStatus::Pending,
            trigger,
            counters: JobCounters::default(),
            total_records: None,
            error_message: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Percentage of the master table processed, when the total is known
    #[must_use]
    pub fn progress_percent(&self) -> Option<f64> {
        let total = self.total_records?;
        if total == 0 {
            return Some(100.0);
        }
        #[allow(clippy::cast_precision_loss)]
        Some((self.counters.processed as f64 / total as f64 * 100.0).min(100.0))
    }
}
