//! Datasource model

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a datasource, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasourceId(Uuid);

impl DatasourceId {
    /// Create a new unique datasource ID using UUID v7
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

impl Default for DatasourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatasourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasourceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The kind of store a datasource connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasourceKind {
    /// Relational database reachable as a local file
    SqlRelational,
    /// Serverless relational database reached over the network
    ServerlessRelational,
    /// Content-management REST API
    ContentApi,
}

impl DatasourceKind {
    /// Lowercase wire/config name for this kind
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SqlRelational => "sql_relational",
            Self::ServerlessRelational => "serverless_relational",
            Self::ContentApi => "content_api",
        }
    }
}

impl FromStr for DatasourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sql_relational" => Ok(Self::SqlRelational),
            "serverless_relational" => Ok(Self::ServerlessRelational),
            "content_api" => Ok(Self::ContentApi),
            other => Err(Error::InvalidInput(format!(
                "Unknown datasource kind: {other}"
            ))),
        }
    }
}

impl fmt::Display for DatasourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection descriptor for one data store.
///
/// Credentials are referenced by name (`credential_ref` is the name of an
/// environment variable holding the secret) and never stored or logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datasource {
    /// Unique identifier
    pub id: DatasourceId,
    /// Human-readable name, unique across datasources
    pub name: String,
    /// Store kind, selects the adapter variant
    pub kind: DatasourceKind,
    /// Hostname or filesystem path, depending on kind
    pub host: Option<String>,
    /// TCP port for networked kinds
    pub port: Option<u16>,
    /// Database name (relational kinds)
    pub database: Option<String>,
    /// Username (relational kinds)
    pub username: Option<String>,
    /// Name of the environment variable holding the secret for this source
    pub credential_ref: Option<String>,
    /// Base URL for content-API kinds
    pub api_endpoint: Option<String>,
    /// Prefix prepended to every table/resource name
    pub table_prefix: Option<String>,
    /// Whether this datasource may be used by new jobs
    pub is_active: bool,
    /// When the connection was last tested (unix ms)
    pub last_tested_at: Option<i64>,
    /// Outcome of the last connection test
    pub last_test_success: Option<bool>,
    /// Creation timestamp (unix ms)
    pub created_at: i64,
}

impl Datasource {
    /// Create a new datasource descriptor with the given name and kind
    #[must_use]
    pub fn new(name: impl Into<String>, kind: DatasourceKind) -> Self {
        Self {
            id: DatasourceId::new(),
            name: name.into(),
            kind,
            host: None,
            port: None,
            database: None,
            username: None,
            credential_ref: None,
            api_endpoint: None,
            table_prefix: None,
            is_active: true,
            last_tested_at: None,
            last_test_success: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Resolve the referenced credential from the environment.
    ///
    /// Returns `None` when no credential is referenced; a referenced but
    /// unset variable is an input error so misconfiguration surfaces before
    /// a job starts.
    pub fn resolve_credential(&self) -> Result<Option<String>> {
        let Some(reference) = self.credential_ref.as_deref() else {
            return Ok(None);
        };
        match env::var(reference) {
            Ok(secret) if !secret.trim().is_empty() => Ok(Some(secret)),
            _ => Err(Error::InvalidInput(format!(
                "Credential reference '{reference}' is not set in the environment"
            ))),
        }
    }

    /// Table/resource name with the configured prefix applied
    #[must_use]
    pub fn prefixed_table(&self, table: &str) -> String {
        match self.table_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}{table}"),
            _ => table.to_string(),
        }
    }
}

impl fmt::Debug for Datasource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Datasource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("credential_ref", &self.credential_ref)
            .field("api_endpoint", &self.api_endpoint)
            .field("table_prefix", &self.table_prefix)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}
