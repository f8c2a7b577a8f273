//! Sync configuration model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::Filter;
use crate::error::Error;

/// A unique identifier for a sync configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncConfigId(Uuid);

impl SyncConfigId {
    /// Create a new unique config ID using UUID v7
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

impl Default for SyncConfigId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncConfigId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How a master/slave value divergence is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Master always overwrites the slave
    SourceWins,
    /// Slave values are kept; only new records are inserted
    TargetWins,
    /// Divergent records are parked as pending conflicts for review
    Manual,
    /// Master wins per field unless the slave was modified after the last
    /// successful sync; without a usable modification timestamp this
    /// degrades to `Manual` review
    Merge,
    /// An external endpoint decides synchronously, or the record is parked
    Webhook,
}

impl ConflictStrategy {
    /// Lowercase wire/config name for this strategy
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SourceWins => "source_wins",
            Self::TargetWins => "target_wins",
            Self::Manual => "manual",
            Self::Merge => "merge",
            Self::Webhook => "webhook",
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source_wins" => Ok(Self::SourceWins),
            "target_wins" => Ok(Self::TargetWins),
            "manual" => Ok(Self::Manual),
            "merge" => Ok(Self::Merge),
            "webhook" => Ok(Self::Webhook),
            other => Err(Error::InvalidInput(format!(
                "Unknown conflict strategy: {other}"
            ))),
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column-to-column mapping, optionally transformed by an expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Column read from the master table
    pub master_column: String,
    /// Column written on the slave table
    pub slave_column: String,
    /// Optional transform expression; empty means pass-through
    #[serde(default)]
    pub expression: Option<String>,
    /// Whether this mapping identifies the record across both stores
    #[serde(default)]
    pub is_key: bool,
}

impl FieldMapping {
    /// A plain pass-through mapping between identically named columns
    #[must_use]
    pub fn passthrough(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            master_column: column.clone(),
            slave_column: column,
            expression: None,
            is_key: false,
        }
    }

    /// Mark this mapping as the record key
    #[must_use]
    pub const fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Attach a transform expression
    #[must_use]
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// The effective expression, with blank strings treated as absent
    #[must_use]
    pub fn effective_expression(&self) -> Option<&str> {
        self.expression
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }
}

/// Master/slave pairing plus the mapping and policy for one sync.
///
/// A running job binds to an immutable snapshot of this struct; edits only
/// affect jobs triggered afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Unique identifier
    pub id: SyncConfigId,
    /// Human-readable name
    pub name: String,
    /// Source-of-truth datasource
    pub master_datasource_id: super::DatasourceId,
    /// Table/resource read on the master
    pub master_table: String,
    /// Datasource written to
    pub slave_datasource_id: super::DatasourceId,
    /// Table/resource written on the slave
    pub slave_table: String,
    /// Ordered field mappings; exactly the listed columns are synced
    pub field_mappings: Vec<FieldMapping>,
    /// Conjunctive filters applied to master reads
    #[serde(default)]
    pub master_filters: Vec<Filter>,
    /// Conflict handling policy
    pub strategy: ConflictStrategy,
    /// Endpoint consulted by the `webhook` strategy
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Slave column holding a unix-ms modification timestamp, used by `merge`
    #[serde(default)]
    pub slave_modified_column: Option<String>,
    /// Records fetched per batch
    pub batch_size: u64,
    /// Whether slave records absent from the master are deleted
    #[serde(default)]
    pub propagate_deletes: bool,
    /// Completion time of the last successful job (unix ms)
    #[serde(default)]
    pub last_synced_at: Option<i64>,
    /// Creation timestamp (unix ms)
    pub created_at: i64,
}

impl SyncConfig {
    /// Default batch size when none is configured
    pub const DEFAULT_BATCH_SIZE: u64 = 100;

    /// Create a config with defaults for the optional fields
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        master_datasource_id: super::DatasourceId,
        master_table: impl Into<String>,
        slave_datasource_id: super::DatasourceId,
        slave_table: impl Into<String>,
        field_mappings: Vec<FieldMapping>,
        strategy: ConflictStrategy,
    ) -> Self {
        Self {
            id: SyncConfigId::new(),
            name: name.into(),
            master_datasource_id,
            master_table: master_table.into(),
            slave_datasource_id,
            slave_table: slave_table.into(),
            field_mappings,
            master_filters: Vec::new(),
            strategy,
            webhook_url: None,
            slave_modified_column: None,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            propagate_deletes: false,
            last_synced_at: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// The mapping flagged as the record key, if any
    #[must_use]
    pub fn key_mapping(&self) -> Option<&FieldMapping> {
        self.field_mappings.iter().find(|mapping| mapping.is_key)
    }

    /// Reject configs that cannot produce a runnable job
    pub fn validate(&self) -> crate::Result<()> {
        if self.field_mappings.is_empty() {
            return Err(Error::InvalidInput(
                "A sync config needs at least one field mapping".to_string(),
            ));
        }
        if self.key_mapping().is_none() {
            return Err(Error::InvalidInput(
                "A sync config needs exactly one mapping flagged is_key".to_string(),
            ));
        }
        if self.field_mappings.iter().filter(|m| m.is_key).count() > 1 {
            return Err(Error::InvalidInput(
                "Only one mapping may be flagged is_key".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be > 0".to_string()));
        }
        if self.strategy == ConflictStrategy::Webhook && self.webhook_url.is_none() {
            return Err(Error::InvalidInput(
                "The webhook strategy requires webhook_url".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatasourceId;

    fn minimal_config(mappings: Vec<FieldMapping>) -> SyncConfig {
        SyncConfig::new(
            "test",
            DatasourceId::new(),
            "products",
            DatasourceId::new(),
            "products",
            mappings,
            ConflictStrategy::SourceWins,
        )
    }

    #[test]
    fn strategy_round_trips_through_str() {
        for strategy in [
            ConflictStrategy::SourceWins,
            ConflictStrategy::TargetWins,
            ConflictStrategy::Manual,
            ConflictStrategy::Merge,
            ConflictStrategy::Webhook,
        ] {
            assert_eq!(
                strategy.as_str().parse::<ConflictStrategy>().unwrap(),
                strategy
            );
        }
    }

    #[test]
    fn effective_expression_ignores_blank() {
        let mapping = FieldMapping::passthrough("price").with_expression("   ");
        assert_eq!(mapping.effective_expression(), None);

        let mapping = FieldMapping::passthrough("price").with_expression("{{ price * 2 }}");
        assert_eq!(mapping.effective_expression(), Some("{{ price * 2 }}"));
    }

    #[test]
    fn validate_requires_mappings_and_key() {
        assert!(minimal_config(vec![]).validate().is_err());

        let no_key = minimal_config(vec![FieldMapping::passthrough("id")]);
        assert!(no_key.validate().is_err());

        let ok = minimal_config(vec![
            FieldMapping::passthrough("id").key(),
            FieldMapping::passthrough("price"),
        ]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn validate_rejects_webhook_without_url() {
        let mut config = minimal_config(vec![FieldMapping::passthrough("id").key()]);
        config.strategy = ConflictStrategy::Webhook;
        assert!(config.validate().is_err());

        config.webhook_url = Some("https://hooks.example.com/decide".to_string());
        assert!(config.validate().is_ok());
    }
}
