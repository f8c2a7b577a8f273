//! Conflict model - durable record of an unresolved divergence

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

use super::{JobId, Record};

/// A unique identifier for a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new unique conflict ID using UUID v7
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

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Review lifecycle of a conflict; everything except `Pending` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Awaiting review
    Pending,
    /// Master values were flushed to the slave
    ResolvedMaster,
    /// Slave values were kept
    ResolvedSlave,
    /// Reviewer-supplied merged values were flushed
    ResolvedMerged,
    /// Closed without writing
    Skipped,
}

impl ConflictStatus {
    /// Whether this status permits no further transitions
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Lowercase wire name for this status
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ResolvedMaster => "resolved_master",
            Self::ResolvedSlave => "resolved_slave",
            Self::ResolvedMerged => "resolved_merged",
            Self::Skipped => "skipped",
        }
    }
}

impl FromStr for ConflictStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved_master" => Ok(Self::ResolvedMaster),
            "resolved_slave" => Ok(Self::ResolvedSlave),
            "resolved_merged" => Ok(Self::ResolvedMerged),
            "skipped" => Ok(Self::Skipped),
            other => Err(Error::InvalidInput(format!(
                "Unknown conflict status: {other}"
            ))),
        }
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reviewer's decision for one pending conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Flush the captured master candidate
    Source,
    /// Keep the slave as-is
    Slave,
    /// Flush reviewer-supplied merged data
    Merged,
    /// Close without writing
    Skipped,
}

impl ConflictResolution {
    /// The terminal status this resolution produces
    #[must_use]
    pub const fn terminal_status(&self) -> ConflictStatus {
        match self {
            Self::Source => ConflictStatus::ResolvedMaster,
            Self::Slave => ConflictStatus::ResolvedSlave,
            Self::Merged => ConflictStatus::ResolvedMerged,
            Self::Skipped => ConflictStatus::Skipped,
        }
    }
}

impl FromStr for ConflictResolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Self::Source),
            "slave" => Ok(Self::Slave),
            "merged" => Ok(Self::Merged),
            "skipped" => Ok(Self::Skipped),
            other => Err(Error::InvalidInput(format!(
                "Unknown resolution: {other}"
            ))),
        }
    }
}

/// Durable record of a divergence the strategy could not auto-decide.
///
/// Outlives the owning job for audit; only `resolve` mutates it, exactly
/// once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier
    pub id: ConflictId,
    /// Job that detected the divergence
    pub job_id: JobId,
    /// Canonical key of the record within the job
    pub record_key: String,
    /// Master record as read
    pub master_data: Record,
    /// Slave record at detection time
    pub slave_data: Record,
    /// Master-side names of the divergent non-key fields
    pub conflicting_fields: Vec<String>,
    /// Review status
    pub status: ConflictStatus,
    /// Merged values, present only for `resolved_merged`
    pub resolved_data: Option<Record>,
    /// Detection timestamp (unix ms)
    pub created_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: Option<i64>,
}

impl Conflict {
    /// Create a pending conflict for the given job and record
    #[must_use]
    pub fn new(
        job_id: JobId,
        record_key: impl Into<String>,
        master_data: Record,
        slave_data: Record,
        conflicting_fields: Vec<String>,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            job_id,
            record_key: record_key.into(),
            master_data,
            slave_data,
            conflicting_fields,
            status: ConflictStatus::Pending,
            resolved_data: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            resolved_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!ConflictStatus::Pending.is_terminal());
        for status in [
            ConflictStatus::ResolvedMaster,
            ConflictStatus::ResolvedSlave,
            ConflictStatus::ResolvedMerged,
            ConflictStatus::Skipped,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn resolution_maps_to_terminal_status() {
        assert_eq!(
            ConflictResolution::Source.terminal_status(),
            ConflictStatus::ResolvedMaster
        );
        assert_eq!(
            ConflictResolution::Skipped.terminal_status(),
            ConflictStatus::Skipped
        );
    }

    #[test]
    fn new_conflict_is_pending() {
        let conflict = Conflict::new(
            JobId::new(),
            "42",
            Record::new(),
            Record::new(),
            vec!["price".to_string()],
        );
        assert_eq!(conflict.status, ConflictStatus::Pending);
        assert!(conflict.resolved_data.is_none());
        assert_eq!(conflict.conflicting_fields, vec!["price"]);
    }
}
