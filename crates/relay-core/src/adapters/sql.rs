//! Relational adapter over libSQL
//!
//! Serves both relational datasource kinds: local-file databases open with
//! `Builder::new_local`, serverless ones with `Builder::new_remote` and a
//! credential resolved from the environment. All five filter operators are
//! pushed down as SQL.

use std::collections::HashMap;

use libsql::{Builder, Connection};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{Datasource, DatasourceKind, Record};

use super::filter::Filter;
use super::sql_builder::{
    build_where, ensure_known_column, from_sql_value, quote_ident, to_sql_value,
};
use super::{ColumnInfo, ReadBatch, TableInfo, TableSchema, UpsertOutcome};

/// Adapter for `SqlRelational` and `ServerlessRelational` datasources
pub struct SqlAdapter {
    conn: Connection,
    table_prefix: Option<String>,
    schema_cache: Mutex<HashMap<String, TableSchema>>,
}

impl SqlAdapter {
    /// Connect to a relational datasource.
    ///
    /// `host` is the database file path for the local kind and the remote
    /// URL for the serverless kind; the serverless kind additionally
    /// requires a credential reference for its auth token.
    pub async fn connect(datasource: &Datasource) -> Result<Self> {
        let conn = match datasource.kind {
            DatasourceKind::SqlRelational => {
                let path = datasource.host.as_deref().ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "Datasource '{}' has no database path",
                        datasource.name
                    ))
                })?;
                let db = Builder::new_local(path).build().await?;
                db.connect()?
            }
            DatasourceKind::ServerlessRelational => {
                let url = datasource.host.as_deref().ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "Datasource '{}' has no remote URL",
                        datasource.name
                    ))
                })?;
                let token = datasource.resolve_credential()?.ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "Serverless datasource '{}' has no credential reference",
                        datasource.name
                    ))
                })?;
                let db = Builder::new_remote(url.to_string(), token).build().await?;
                db.connect()?
            }
            DatasourceKind::ContentApi => {
                return Err(Error::InvalidInput(
                    "Content API datasources are not relational".to_string(),
                ))
            }
        };

        Ok(Self {
            conn,
            table_prefix: datasource.table_prefix.clone(),
            schema_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Open an adapter over an existing connection, used by tests and by
    /// callers that manage their own database lifecycle
    #[must_use]
    pub fn from_connection(conn: Connection, table_prefix: Option<String>) -> Self {
        Self {
            conn,
            table_prefix,
            schema_cache: Mutex::new(HashMap::new()),
        }
    }

    fn qualified(&self, table: &str) -> String {
        match self.table_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}{table}"),
            _ => table.to_string(),
        }
    }

    /// Probe the connection with a trivial query
    pub async fn test_connection(&self) -> Result<()> {
        self.conn.query("SELECT 1", ()).await?;
        Ok(())
    }

    /// List user tables with their row counts
    pub async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                (),
            )
            .await?;

        let mut names = Vec::new();
        while let Some(row) = rows.next().await? {
            names.push(row.get::<String>(0)?);
        }

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let count_sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&name));
            let mut count_rows = self.conn.query(&count_sql, ()).await?;
            let approx_count = match count_rows.next().await? {
                Some(row) => u64::try_from(row.get::<i64>(0)?).ok(),
                None => None,
            };
            tables.push(TableInfo { name, approx_count });
        }
        Ok(tables)
    }

    /// Introspect a table via `PRAGMA table_info`, cached per connection
    pub async fn schema(&self, table: &str, refresh: bool) -> Result<TableSchema> {
        let qualified = self.qualified(table);

        if !refresh {
            let cache = self.schema_cache.lock().await;
            if let Some(schema) = cache.get(&qualified) {
                return Ok(schema.clone());
            }
        }

        let pragma = format!("PRAGMA table_info({})", quote_ident(&qualified));
        let mut rows = self.conn.query(&pragma, ()).await?;

        let mut columns = Vec::new();
        while let Some(row) = rows.next().await? {
            columns.push(ColumnInfo {
                name: row.get::<String>(1)?,
                col_type: row.get::<String>(2)?.to_lowercase(),
                nullable: row.get::<i64>(3)? == 0,
                is_primary_key: row.get::<i64>(5)? != 0,
            });
        }

        if columns.is_empty() {
            return Err(Error::SchemaMismatch(format!("Unknown table: {qualified}")));
        }

        let schema = TableSchema { columns };
        self.schema_cache
            .lock()
            .await
            .insert(qualified, schema.clone());
        Ok(schema)
    }

    /// Read one page of filtered records, with the filtered total
    pub async fn read_batch(
        &self,
        table: &str,
        filters: &[Filter],
        limit: u64,
        offset: u64,
    ) -> Result<ReadBatch> {
        let qualified = self.qualified(table);
        let schema = self.schema(table, false).await?;
        let (clause, params) = build_where(filters, &schema)?;

        let total = self.count_where(&qualified, &clause, params.clone()).await?;

        let sql = format!(
            "SELECT * FROM {}{clause} LIMIT ? OFFSET ?",
            quote_ident(&qualified)
        );
        let mut bound = params;
        bound.push(libsql::Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        bound.push(libsql::Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

        let mut rows = self.conn.query(&sql, bound).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_record(&schema, &row)?);
        }

        Ok(ReadBatch { records, total })
    }

    /// Read the single record whose key column equals `key_value`
    pub async fn read_by_key(
        &self,
        table: &str,
        key_column: &str,
        key_value: &Value,
    ) -> Result<Option<Record>> {
        let qualified = self.qualified(table);
        let schema = self.schema(table, false).await?;
        ensure_known_column(&schema, key_column)?;

        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? LIMIT 1",
            quote_ident(&qualified),
            quote_ident(key_column)
        );
        let mut rows = self
            .conn
            .query(&sql, vec![to_sql_value(key_value)])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_record(&schema, &row)?)),
            None => Ok(None),
        }
    }

    /// Insert the record, or overwrite the existing one with the same key.
    ///
    /// Only columns present in both the record and the table schema are
    /// written; unknown record fields are a schema mismatch.
    pub async fn upsert(
        &self,
        table: &str,
        key_column: &str,
        record: &Record,
    ) -> Result<UpsertOutcome> {
        let qualified = self.qualified(table);
        let schema = self.schema(table, false).await?;
        ensure_known_column(&schema, key_column)?;
        for column in record.keys() {
            ensure_known_column(&schema, column)?;
        }

        let key_value = record.get(key_column).ok_or_else(|| {
            Error::InvalidInput(format!("Record has no key column '{key_column}'"))
        })?;

        let exists = self.read_by_key(table, key_column, key_value).await?.is_some();
        if exists {
            let assignments: Vec<String> = record
                .keys()
                .filter(|column| column.as_str() != key_column)
                .map(|column| format!("{} = ?", quote_ident(column)))
                .collect();
            if assignments.is_empty() {
                // Key-only record, nothing to update.
                return Ok(UpsertOutcome::Updated);
            }
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                quote_ident(&qualified),
                assignments.join(", "),
                quote_ident(key_column)
            );
            let mut params: Vec<libsql::Value> = record
                .iter()
                .filter(|(column, _)| column.as_str() != key_column)
                .map(|(_, value)| to_sql_value(value))
                .collect();
            params.push(to_sql_value(key_value));
            self.conn.execute(&sql, params).await?;
            Ok(UpsertOutcome::Updated)
        } else {
            let columns: Vec<String> = record.keys().map(|c| quote_ident(c)).collect();
            let placeholders: Vec<&str> = record.keys().map(|_| "?").collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&qualified),
                columns.join(", "),
                placeholders.join(", ")
            );
            let params: Vec<libsql::Value> = record.values().map(to_sql_value).collect();
            self.conn.execute(&sql, params).await?;
            Ok(UpsertOutcome::Inserted)
        }
    }

    /// Delete the record with the given key; true when a row was removed
    pub async fn delete(&self, table: &str, key_column: &str, key_value: &Value) -> Result<bool> {
        let qualified = self.qualified(table);
        let schema = self.schema(table, false).await?;
        ensure_known_column(&schema, key_column)?;

        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(&qualified),
            quote_ident(key_column)
        );
        let affected = self
            .conn
            .execute(&sql, vec![to_sql_value(key_value)])
            .await?;
        Ok(affected > 0)
    }

    /// Count records matching the filters
    pub async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64> {
        let qualified = self.qualified(table);
        let schema = self.schema(table, false).await?;
        let (clause, params) = build_where(filters, &schema)?;
        self.count_where(&qualified, &clause, params).await
    }

    /// Key values of every record matching the filters
    pub async fn all_keys(
        &self,
        table: &str,
        key_column: &str,
        filters: &[Filter],
    ) -> Result<Vec<Value>> {
        let qualified = self.qualified(table);
        let schema = self.schema(table, false).await?;
        ensure_known_column(&schema, key_column)?;
        let (clause, params) = build_where(filters, &schema)?;

        let sql = format!(
            "SELECT {} FROM {}{clause}",
            quote_ident(key_column),
            quote_ident(&qualified)
        );
        let mut rows = self.conn.query(&sql, params).await?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(from_sql_value(row.get_value(0)?));
        }
        Ok(keys)
    }

    async fn count_where(
        &self,
        qualified: &str,
        clause: &str,
        params: Vec<libsql::Value>,
    ) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}{clause}", quote_ident(qualified));
        let mut rows = self.conn.query(&sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(u64::try_from(row.get::<i64>(0)?).unwrap_or(0)),
            None => Ok(0),
        }
    }
}

fn row_to_record(schema: &TableSchema, row: &libsql::Row) -> Result<Record> {
    let mut record = Record::new();
    for (idx, column) in schema.columns.iter().enumerate() {
        let value = row.get_value(i32::try_from(idx).map_err(|_| {
            Error::SchemaMismatch("Too many columns".to_string())
        })?)?;
        record.insert(column.name.clone(), from_sql_value(value));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::filter::FilterOp;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn adapter_with_products() -> SqlAdapter {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();
        conn.execute(
            "CREATE TABLE products (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                price REAL,
                status TEXT
            )",
            (),
        )
        .await
        .unwrap();
        for (id, name, price, status) in [
            (1, "widget", 10.0, "live"),
            (2, "gadget", 20.0, "live"),
            (3, "gizmo", 30.0, "draft"),
        ] {
            conn.execute(
                "INSERT INTO products (id, name, price, status) VALUES (?, ?, ?, ?)",
                libsql::params![id, name, price, status],
            )
            .await
            .unwrap();
        }
        SqlAdapter::from_connection(conn, None)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn schema_reports_columns_and_keys() {
        let adapter = adapter_with_products().await;
        let schema = adapter.schema("products", false).await.unwrap();
        assert_eq!(schema.columns.len(), 4);
        assert!(schema.column("id").unwrap().is_primary_key);
        assert!(!schema.column("name").unwrap().nullable);
        assert!(schema.column("price").unwrap().nullable);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_table_is_a_schema_mismatch() {
        let adapter = adapter_with_products().await;
        assert!(matches!(
            adapter.schema("nope", false).await,
            Err(Error::SchemaMismatch(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_batch_pages_and_counts() {
        let adapter = adapter_with_products().await;
        let batch = adapter.read_batch("products", &[], 2, 0).await.unwrap();
        assert_eq!(batch.total, 3);
        assert_eq!(batch.records.len(), 2);

        let rest = adapter.read_batch("products", &[], 2, 2).await.unwrap();
        assert_eq!(rest.records.len(), 1);
        assert_eq!(rest.records[0].get("name"), Some(&json!("gizmo")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_down_matches_in_process_semantics() {
        let adapter = adapter_with_products().await;
        let filters = vec![
            Filter::new("status", FilterOp::Eq, json!("live")),
            Filter::new("price", FilterOp::Gt, json!(10)),
        ];
        let batch = adapter.read_batch("products", &filters, 100, 0).await.unwrap();
        assert_eq!(batch.total, 1);
        assert_eq!(batch.records[0].get("name"), Some(&json!("gadget")));
        for record in &batch.records {
            assert!(crate::adapters::matches_all(record, &filters));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn contains_with_wildcards_matches_literally() {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();
        conn.execute(
            "CREATE TABLE promos (id INTEGER PRIMARY KEY, title TEXT)",
            (),
        )
        .await
        .unwrap();
        for (id, title) in [(1, "10% off"), (2, "10 off sale")] {
            conn.execute(
                "INSERT INTO promos (id, title) VALUES (?, ?)",
                libsql::params![id, title],
            )
            .await
            .unwrap();
        }
        let adapter = SqlAdapter::from_connection(conn, None);

        let filters = vec![Filter::new("title", FilterOp::Contains, json!("10% off"))];
        let batch = adapter.read_batch("promos", &filters, 100, 0).await.unwrap();
        assert_eq!(batch.total, 1);
        assert_eq!(batch.records[0].get("id"), Some(&json!(1)));
        for record in &batch.records {
            assert!(crate::adapters::matches_all(record, &filters));
        }

        // An empty needle accepts nothing, same as the in-process reference.
        let empty = vec![Filter::new("title", FilterOp::Contains, json!(""))];
        let batch = adapter.read_batch("promos", &empty, 100, 0).await.unwrap();
        assert_eq!(batch.total, 0);
        assert!(batch.records.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_inserts_then_updates() {
        let adapter = adapter_with_products().await;

        let mut record = Record::new();
        record.insert("id".to_string(), json!(4));
        record.insert("name".to_string(), json!("doohickey"));
        record.insert("price".to_string(), json!(40.0));
        let outcome = adapter.upsert("products", "id", &record).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        record.insert("price".to_string(), json!(44.0));
        let outcome = adapter.upsert("products", "id", &record).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let read = adapter
            .read_by_key("products", "id", &json!(4))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.get("price"), Some(&json!(44.0)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_rejects_unknown_record_fields() {
        let adapter = adapter_with_products().await;
        let mut record = Record::new();
        record.insert("id".to_string(), json!(9));
        record.insert("bogus".to_string(), json!("x"));
        assert!(matches!(
            adapter.upsert("products", "id", &record).await,
            Err(Error::SchemaMismatch(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_reports_whether_a_row_was_removed() {
        let adapter = adapter_with_products().await;
        assert!(adapter.delete("products", "id", &json!(1)).await.unwrap());
        assert!(!adapter.delete("products", "id", &json!(1)).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn all_keys_honors_filters() {
        let adapter = adapter_with_products().await;
        let filters = vec![Filter::new("status", FilterOp::Eq, json!("live"))];
        let keys = adapter.all_keys("products", "id", &filters).await.unwrap();
        assert_eq!(keys, vec![json!(1), json!(2)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn schema_cache_refreshes_on_demand() {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", ())
            .await
            .unwrap();
        let adapter = SqlAdapter::from_connection(conn.clone(), None);

        let before = adapter.schema("t", false).await.unwrap();
        assert_eq!(before.columns.len(), 1);

        conn.execute("ALTER TABLE t ADD COLUMN extra TEXT", ())
            .await
            .unwrap();

        // Cached shape survives until a refresh is requested.
        assert_eq!(adapter.schema("t", false).await.unwrap().columns.len(), 1);
        assert_eq!(adapter.schema("t", true).await.unwrap().columns.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn table_prefix_is_applied() {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();
        conn.execute("CREATE TABLE wp_posts (id INTEGER PRIMARY KEY, title TEXT)", ())
            .await
            .unwrap();
        let adapter = SqlAdapter::from_connection(conn, Some("wp_".to_string()));
        let schema = adapter.schema("posts", false).await.unwrap();
        assert!(schema.column("title").is_some());
    }
}
