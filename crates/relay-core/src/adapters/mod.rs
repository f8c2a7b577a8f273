//! Datasource adapters
//!
//! One adapter variant per store kind, dispatched through the [`Adapter`]
//! enum. All variants expose the same record-level surface: introspection,
//! batched reads, keyed reads, upserts and deletes. Filters are pushed down
//! when the store supports them and applied in-process otherwise; either
//! way the result matches [`filter::Filter::matches`].

pub mod content_api;
pub mod filter;
pub mod sql;
pub mod sql_builder;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{Datasource, DatasourceKind, Record};

pub use content_api::ContentApiAdapter;
pub use filter::{apply_in_process, matches_all, Filter, FilterOp};
pub use sql::SqlAdapter;

/// A table or resource exposed by a datasource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table/resource name, prefix already applied
    pub name: String,
    /// Approximate row count, when the store can report one cheaply
    pub approx_count: Option<u64>,
}

/// One column of an introspected table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Store-reported type, lowercased
    pub col_type: String,
    /// Whether NULL is accepted
    pub nullable: bool,
    /// Whether the column is part of the primary key
    pub is_primary_key: bool,
}

/// Introspected shape of a table, the allow-list for identifier use
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Columns in store order
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    /// Look up a column by name
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Names of all columns
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }
}

/// One page of filtered records plus the filtered total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadBatch {
    /// Records in this page
    pub records: Vec<Record>,
    /// Total records matching the filters across all pages
    pub total: u64,
}

/// Which write an upsert performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record with the key existed; one was created
    Inserted,
    /// A record with the key existed and was overwritten
    Updated,
}

/// A connected datasource, dispatched by store kind
pub enum Adapter {
    /// Relational stores, local file or serverless remote
    Sql(SqlAdapter),
    /// Content-management REST API
    Content(ContentApiAdapter),
}

impl Adapter {
    /// Connect to the datasource, building the variant its kind requires.
    ///
    /// Inactive datasources are refused so a disabled source cannot be
    /// reached through a stale config.
    pub async fn connect(datasource: &Datasource) -> Result<Self> {
        if !datasource.is_active {
            return Err(Error::InvalidInput(format!(
                "Datasource '{}' is inactive",
                datasource.name
            )));
        }
        match datasource.kind {
            DatasourceKind::SqlRelational | DatasourceKind::ServerlessRelational => {
                Ok(Self::Sql(SqlAdapter::connect(datasource).await?))
            }
            DatasourceKind::ContentApi => {
                Ok(Self::Content(ContentApiAdapter::connect(datasource)?))
            }
        }
    }

    /// Whether this adapter can push the operator down to the store
    #[must_use]
    pub const fn supports_operator(&self, op: FilterOp) -> bool {
        match self {
            Self::Sql(_) => true,
            Self::Content(_) => matches!(op, FilterOp::Eq | FilterOp::Ne | FilterOp::Contains),
        }
    }

    /// Cheap connectivity probe, used by datasource tests
    pub async fn test_connection(&self) -> Result<()> {
        match self {
            Self::Sql(adapter) => adapter.test_connection().await,
            Self::Content(adapter) => adapter.test_connection().await,
        }
    }

    /// List the tables/resources the datasource exposes
    pub async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        match self {
            Self::Sql(adapter) => adapter.list_tables().await,
            Self::Content(adapter) => adapter.list_tables().await,
        }
    }

    /// Introspect a table, serving from the per-connection cache unless
    /// `refresh` is set
    pub async fn schema(&self, table: &str, refresh: bool) -> Result<TableSchema> {
        match self {
            Self::Sql(adapter) => adapter.schema(table, refresh).await,
            Self::Content(adapter) => adapter.schema(table, refresh).await,
        }
    }

    /// Read one page of records matching the filters
    pub async fn read_batch(
        &self,
        table: &str,
        filters: &[Filter],
        limit: u64,
        offset: u64,
    ) -> Result<ReadBatch> {
        match self {
            Self::Sql(adapter) => adapter.read_batch(table, filters, limit, offset).await,
            Self::Content(adapter) => adapter.read_batch(table, filters, limit, offset).await,
        }
    }

    /// Read a single record by its key column, `None` when absent
    pub async fn read_by_key(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<Option<Record>> {
        match self {
            Self::Sql(adapter) => adapter.read_by_key(table, key_column, key_value).await,
            Self::Content(adapter) => adapter.read_by_key(table, key_column, key_value).await,
        }
    }

    /// Insert or overwrite the record identified by its key column
    pub async fn upsert(
        &self,
        table: &str,
        key_column: &str,
        record: &Record,
    ) -> Result<UpsertOutcome> {
        match self {
            Self::Sql(adapter) => adapter.upsert(table, key_column, record).await,
            Self::Content(adapter) => adapter.upsert(table, key_column, record).await,
        }
    }

    /// Delete the record identified by its key column; true when a record
    /// was removed
    pub async fn delete(&self, table: &str, key_column: &str, key_value: &Value) -> Result<bool> {
        match self {
            Self::Sql(adapter) => adapter.delete(table, key_column, key_value).await,
            Self::Content(adapter) => adapter.delete(table, key_column, key_value).await,
        }
    }

    /// Count records matching the filters
    pub async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64> {
        match self {
            Self::Sql(adapter) => adapter.count(table, filters).await,
            Self::Content(adapter) => adapter.count(table, filters).await,
        }
    }

    /// Keys of every record matching the filters, for delete propagation
    pub async fn all_keys(
        &self,
        table: &str,
        key_column: &str,
        filters: &[Filter],
    ) -> Result<Vec<Value>> {
        match self {
            Self::Sql(adapter) => adapter.all_keys(table, key_column, filters).await,
            Self::Content(adapter) => adapter.all_keys(table, key_column, filters).await,
        }
    }
}
