//! Content-API adapter over REST
//!
//! Speaks a conventional JSON collection API: `GET {base}/{resource}` lists
//! records with `_start`/`_limit` paging and an `X-Total-Count` header,
//! `{field}={value}` and `{field}_ne={value}` filter server-side, and
//! individual records live at `{base}/{resource}/{key}`. Substring filters
//! are applied in-process after the pushed filters narrow the fetch, so the
//! results match the in-process reference semantics exactly. Numeric
//! ordering filters are refused with `UnsupportedOperation`.

use std::collections::HashMap;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{Error, Result};
use crate::models::{record_key_string, Datasource, Record};

use super::filter::{Filter, FilterOp};
use super::{ColumnInfo, ReadBatch, TableInfo, TableSchema, UpsertOutcome};

/// Page size used when the adapter has to scan a whole resource
const SCAN_PAGE: u64 = 200;

/// Adapter for `ContentApi` datasources
pub struct ContentApiAdapter {
    client: reqwest::Client,
    base: Url,
    bearer: Option<String>,
    table_prefix: Option<String>,
    schema_cache: Mutex<HashMap<String, TableSchema>>,
}

impl ContentApiAdapter {
    /// Build an adapter from the datasource's endpoint and credential.
    ///
    /// The endpoint is normalized to end in a single `/` so resource paths
    /// join cleanly.
    pub fn connect(datasource: &Datasource) -> Result<Self> {
        let endpoint = datasource.api_endpoint.as_deref().ok_or_else(|| {
            Error::InvalidInput(format!(
                "Datasource '{}' has no API endpoint",
                datasource.name
            ))
        })?;
        let normalized = format!("{}/", endpoint.trim_end_matches('/'));
        let base = Url::parse(&normalized)
            .map_err(|e| Error::InvalidInput(format!("Invalid API endpoint: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            base,
            bearer: datasource.resolve_credential()?,
            table_prefix: datasource.table_prefix.clone(),
            schema_cache: Mutex::new(HashMap::new()),
        })
    }

    fn resource_url(&self, table: &str) -> Result<Url> {
        let name = match self.table_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}{table}"),
            _ => table.to_string(),
        };
        self.base
            .join(&name)
            .map_err(|e| Error::InvalidInput(format!("Invalid resource name '{name}': {e}")))
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(url))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Probe the endpoint root
    pub async fn test_connection(&self) -> Result<()> {
        let response = self.get(self.base.clone()).send().await?;
        if response.status().is_server_error() {
            return Err(Error::Connection(format!(
                "Endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// List resources via the endpoint's `db` document, counting the
    /// records under each collection
    pub async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let url = self
            .base
            .join("db")
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        let response = self.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Connection(format!(
                "Resource listing returned {}",
                response.status()
            )));
        }
        let document: Value = response.json().await?;
        let Value::Object(collections) = document else {
            return Err(Error::SchemaMismatch(
                "Resource listing is not an object".to_string(),
            ));
        };

        let mut tables: Vec<TableInfo> = collections
            .into_iter()
            .map(|(name, value)| TableInfo {
                approx_count: value.as_array().map(|records| records.len() as u64),
                name,
            })
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    /// Infer the resource schema from a sampled record.
    ///
    /// Content stores carry no declared schema, so the shape of the first
    /// record stands in for one: JSON types become column types, every
    /// field is nullable, and `id` is treated as the key.
    pub async fn schema(&self, table: &str, refresh: bool) -> Result<TableSchema> {
        if !refresh {
            let cache = self.schema_cache.lock().await;
            if let Some(schema) = cache.get(table) {
                return Ok(schema.clone());
            }
        }

        let page = self.fetch_page(table, &[], 1, 0).await?;
        let sample = page.records.first().ok_or_else(|| {
            Error::SchemaMismatch(format!("Resource '{table}' has no records to sample"))
        })?;

        let columns = sample
            .iter()
            .map(|(name, value)| ColumnInfo {
                name: name.clone(),
                col_type: json_type_name(value).to_string(),
                nullable: true,
                is_primary_key: name == "id",
            })
            .collect();

        let schema = TableSchema { columns };
        self.schema_cache
            .lock()
            .await
            .insert(table.to_string(), schema.clone());
        Ok(schema)
    }

    /// Read one page of filtered records
    pub async fn read_batch(
        &self,
        table: &str,
        filters: &[Filter],
        limit: u64,
        offset: u64,
    ) -> Result<ReadBatch> {
        let (pushed, residual) = split_filters(filters)?;

        if residual.is_empty() {
            return self.fetch_page(table, &pushed, limit, offset).await;
        }

        // Residual filters change which records fall on which page, so the
        // narrowed set is scanned fully and paged in-process.
        let all = self.fetch_all(table, &pushed).await?;
        let filtered = super::filter::apply_in_process(all, &residual);
        let total = filtered.len() as u64;
        let records = filtered
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();
        Ok(ReadBatch { records, total })
    }

    /// Read a single record at `{resource}/{key}`
    pub async fn read_by_key(
        &self,
        table: &str,
        _key_column: &str,
        key_value: &Value,
    ) -> Result<Option<Record>> {
        let url = self.record_url(table, key_value)?;
        let response = self.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(Error::Connection(format!("Read returned {status}"))),
        }
    }

    /// Create or replace the record identified by its key
    pub async fn upsert(
        &self,
        table: &str,
        key_column: &str,
        record: &Record,
    ) -> Result<UpsertOutcome> {
        let key_value = record.get(key_column).ok_or_else(|| {
            Error::InvalidInput(format!("Record has no key column '{key_column}'"))
        })?;

        let exists = self.read_by_key(table, key_column, key_value).await?.is_some();
        let (request, outcome) = if exists {
            let url = self.record_url(table, key_value)?;
            (self.authorize(self.client.put(url)), UpsertOutcome::Updated)
        } else {
            let url = self.resource_url(table)?;
            (self.authorize(self.client.post(url)), UpsertOutcome::Inserted)
        };

        let response = request.json(record).send().await?;
        if !response.status().is_success() {
            return Err(Error::Connection(format!(
                "Write returned {}",
                response.status()
            )));
        }
        Ok(outcome)
    }

    /// Delete the record; true when the store had one
    pub async fn delete(&self, table: &str, _key_column: &str, key_value: &Value) -> Result<bool> {
        let url = self.record_url(table, key_value)?;
        let response = self.authorize(self.client.delete(url)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Error::Connection(format!("Delete returned {status}"))),
        }
    }

    /// Count records matching the filters
    pub async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64> {
        Ok(self.read_batch(table, filters, 1, 0).await?.total)
    }

    /// Keys of every record matching the filters
    pub async fn all_keys(
        &self,
        table: &str,
        key_column: &str,
        filters: &[Filter],
    ) -> Result<Vec<Value>> {
        let (pushed, residual) = split_filters(filters)?;
        let all = self.fetch_all(table, &pushed).await?;
        let filtered = super::filter::apply_in_process(all, &residual);
        Ok(filtered
            .into_iter()
            .map(|record| record.get(key_column).cloned().unwrap_or(Value::Null))
            .collect())
    }

    fn record_url(&self, table: &str, key_value: &Value) -> Result<Url> {
        let resource = self.resource_url(table)?;
        let key = urlencoding::encode(&record_key_string(key_value)).into_owned();
        Url::parse(&format!("{resource}/{key}"))
            .map_err(|e| Error::InvalidInput(format!("Invalid record key: {e}")))
    }

    async fn fetch_page(
        &self,
        table: &str,
        pushed: &[Filter],
        limit: u64,
        offset: u64,
    ) -> Result<ReadBatch> {
        let mut url = self.resource_url(table)?;
        {
            let mut query = url.query_pairs_mut();
            for filter in pushed {
                let value = record_key_string(&filter.value);
                match filter.op {
                    FilterOp::Eq => {
                        query.append_pair(&filter.field, &value);
                    }
                    FilterOp::Ne => {
                        query.append_pair(&format!("{}_ne", filter.field), &value);
                    }
                    FilterOp::Gt | FilterOp::Lt | FilterOp::Contains => {
                        // split_filters keeps these out of the pushed set.
                    }
                }
            }
            query.append_pair("_start", &offset.to_string());
            query.append_pair("_limit", &limit.to_string());
        }

        let response = self.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Connection(format!(
                "Read returned {}",
                response.status()
            )));
        }

        let header_total = response
            .headers()
            .get("x-total-count")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        let records: Vec<Record> = response.json().await?;
        let total = header_total.unwrap_or(offset + records.len() as u64);
        Ok(ReadBatch { records, total })
    }

    async fn fetch_all(&self, table: &str, pushed: &[Filter]) -> Result<Vec<Record>> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.fetch_page(table, pushed, SCAN_PAGE, offset).await?;
            let fetched = page.records.len() as u64;
            all.extend(page.records);
            offset += fetched;
            if fetched < SCAN_PAGE || offset >= page.total {
                break;
            }
        }
        Ok(all)
    }
}

/// Partition filters into server-side and in-process sets, refusing
/// operators the store cannot honor either way
fn split_filters(filters: &[Filter]) -> Result<(Vec<Filter>, Vec<Filter>)> {
    let mut pushed = Vec::new();
    let mut residual = Vec::new();
    for filter in filters {
        match filter.op {
            FilterOp::Eq | FilterOp::Ne => pushed.push(filter.clone()),
            FilterOp::Contains => residual.push(filter.clone()),
            FilterOp::Gt | FilterOp::Lt => {
                return Err(Error::UnsupportedOperation(format!(
                    "Content API sources cannot filter '{}' with '{}'",
                    filter.field, filter.op
                )))
            }
        }
    }
    Ok((pushed, residual))
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn datasource(endpoint: &str) -> Datasource {
        let mut ds = Datasource::new("cms", crate::models::DatasourceKind::ContentApi);
        ds.api_endpoint = Some(endpoint.to_string());
        ds
    }

    #[test]
    fn endpoint_is_normalized_with_a_trailing_slash() {
        let adapter = ContentApiAdapter::connect(&datasource("http://cms.local/api")).unwrap();
        assert_eq!(adapter.base.as_str(), "http://cms.local/api/");
        let url = adapter.resource_url("posts").unwrap();
        assert_eq!(url.as_str(), "http://cms.local/api/posts");
    }

    #[test]
    fn missing_endpoint_is_an_input_error() {
        let mut ds = datasource("http://cms.local");
        ds.api_endpoint = None;
        assert!(matches!(
            ContentApiAdapter::connect(&ds),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn resource_url_applies_the_table_prefix() {
        let mut ds = datasource("http://cms.local/api");
        ds.table_prefix = Some("cms_".to_string());
        let adapter = ContentApiAdapter::connect(&ds).unwrap();
        let url = adapter.resource_url("posts").unwrap();
        assert_eq!(url.as_str(), "http://cms.local/api/cms_posts");
    }

    #[test]
    fn ordering_filters_are_refused() {
        let filters = vec![Filter::new("price", FilterOp::Gt, json!(10))];
        assert!(matches!(
            split_filters(&filters),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn equality_pushes_and_contains_stays_in_process() {
        let filters = vec![
            Filter::new("status", FilterOp::Eq, json!("live")),
            Filter::new("status", FilterOp::Ne, json!("draft")),
            Filter::new("title", FilterOp::Contains, json!("hello")),
        ];
        let (pushed, residual) = split_filters(&filters).unwrap();
        assert_eq!(pushed.len(), 2);
        assert_eq!(residual.len(), 1);
        assert_eq!(residual[0].op, FilterOp::Contains);
    }

    #[test]
    fn record_url_encodes_the_key() {
        let adapter = ContentApiAdapter::connect(&datasource("http://cms.local/api")).unwrap();
        let url = adapter.record_url("posts", &json!("a b")).unwrap();
        assert_eq!(url.as_str(), "http://cms.local/api/posts/a%20b");
    }
}
