use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use relay_core::adapters::{Adapter, Filter, ReadBatch, TableInfo, TableSchema};
use relay_core::engine::{CancelFlag, SyncEngine};
use relay_core::mapper::FieldMapper;
use relay_core::models::{
    Conflict, ConflictId, ConflictResolution, ConflictStatus, ConflictStrategy, Datasource,
    DatasourceId, DatasourceKind, FieldMapping, JobId, JobStatus, Record, SyncConfig, SyncConfigId,
    SyncJob, TriggerSource,
};
use relay_core::state::StateStore;
use relay_core::store::{
    ConflictRepository, Database, DatasourceRepository, JobRepository, SyncConfigRepository,
};
use relay_core::Error as CoreError;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    db: Arc<Database>,
    state_store: Arc<StateStore>,
    running: Arc<Mutex<HashMap<String, CancelFlag>>>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: Database, state_store: StateStore) -> Self {
        Self {
            config,
            db: Arc::new(db),
            state_store: Arc::new(state_store),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn engine(&self) -> SyncEngine<'_> {
        SyncEngine::new(&self.db, &self.state_store, self.config.engine_settings())
    }
}

pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/datasources", post(create_datasource).get(list_datasources))
        .route(
            "/datasources/{id}",
            get(get_datasource)
                .put(update_datasource)
                .delete(delete_datasource),
        )
        .route("/datasources/test", post(test_datasource_raw))
        .route("/datasources/{id}/test", post(test_datasource))
        .route("/datasources/{id}/tables", get(list_tables))
        .route("/datasources/{id}/tables/{table}/schema", get(table_schema))
        .route("/datasources/{id}/tables/{table}/data", get(table_data))
        .route("/configs", post(create_config).get(list_configs))
        .route("/configs/{id}", get(get_config).delete(delete_config))
        .route("/configs/{id}/validate", post(validate_config))
        .route("/configs/{id}/jobs", post(trigger_job))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/conflicts", get(list_conflicts))
        .route("/conflicts/{id}", get(get_conflict))
        .route("/conflicts/{id}/resolve", post(resolve_conflict));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhooks/trigger/{config_id}", post(webhook_trigger))
        .nest("/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    running_jobs: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let running = state
        .running
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .len();
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        running_jobs: running,
    })
}

// ---- datasources ----

#[derive(Debug, Deserialize)]
struct DatasourceRequest {
    name: String,
    kind: DatasourceKind,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    credential_ref: Option<String>,
    #[serde(default)]
    api_endpoint: Option<String>,
    #[serde(default)]
    table_prefix: Option<String>,
    #[serde(default = "default_true")]
    is_active: bool,
}

const fn default_true() -> bool {
    true
}

impl DatasourceRequest {
    fn apply(self, datasource: &mut Datasource) {
        datasource.name = self.name;
        datasource.kind = self.kind;
        datasource.host = self.host;
        datasource.port = self.port;
        datasource.database = self.database;
        datasource.username = self.username;
        datasource.credential_ref = self.credential_ref;
        datasource.api_endpoint = self.api_endpoint;
        datasource.table_prefix = self.table_prefix;
        datasource.is_active = self.is_active;
    }
}

async fn create_datasource(
    State(state): State<AppState>,
    Json(request): Json<DatasourceRequest>,
) -> Result<Json<Datasource>, AppError> {
    let mut datasource = Datasource::new(request.name.clone(), request.kind);
    request.apply(&mut datasource);
    DatasourceRepository::new(state.db.conn())
        .create(&datasource)
        .await?;
    Ok(Json(datasource))
}

async fn list_datasources(
    State(state): State<AppState>,
) -> Result<Json<Vec<Datasource>>, AppError> {
    let datasources = DatasourceRepository::new(state.db.conn()).list().await?;
    Ok(Json(datasources))
}

async fn get_datasource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Datasource>, AppError> {
    Ok(Json(fetch_datasource(&state, &id).await?))
}

async fn update_datasource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DatasourceRequest>,
) -> Result<Json<Datasource>, AppError> {
    let mut datasource = fetch_datasource(&state, &id).await?;
    request.apply(&mut datasource);
    DatasourceRepository::new(state.db.conn())
        .update(&datasource)
        .await?;
    Ok(Json(datasource))
}

async fn delete_datasource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_datasource_id(&id)?;
    DatasourceRepository::new(state.db.conn()).delete(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Serialize)]
struct TestResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn test_datasource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TestResponse>, AppError> {
    let datasource = fetch_datasource(&state, &id).await?;
    let outcome = try_connection(&datasource).await;
    DatasourceRepository::new(state.db.conn())
        .record_test(&datasource.id, outcome.is_ok())
        .await?;
    Ok(Json(test_response(outcome)))
}

/// Test connectivity of a datasource that has not been saved yet.
async fn test_datasource_raw(
    Json(request): Json<DatasourceRequest>,
) -> Json<TestResponse> {
    let mut datasource = Datasource::new(request.name.clone(), request.kind);
    request.apply(&mut datasource);
    Json(test_response(try_connection(&datasource).await))
}

async fn try_connection(datasource: &Datasource) -> Result<(), CoreError> {
    match Adapter::connect(datasource).await {
        Ok(adapter) => adapter.test_connection().await,
        Err(error) => Err(error),
    }
}

fn test_response(outcome: Result<(), CoreError>) -> TestResponse {
    TestResponse {
        success: outcome.is_ok(),
        error: outcome.err().map(|error| error.to_string()),
    }
}

async fn list_tables(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TableInfo>>, AppError> {
    let datasource = fetch_datasource(&state, &id).await?;
    let adapter = Adapter::connect(&datasource).await?;
    Ok(Json(adapter.list_tables().await?))
}

#[derive(Debug, Deserialize)]
struct SchemaQuery {
    #[serde(default)]
    refresh: bool,
}

async fn table_schema(
    State(state): State<AppState>,
    Path((id, table)): Path<(String, String)>,
    Query(query): Query<SchemaQuery>,
) -> Result<Json<TableSchema>, AppError> {
    let datasource = fetch_datasource(&state, &id).await?;
    let adapter = Adapter::connect(&datasource).await?;
    Ok(Json(adapter.schema(&table, query.refresh).await?))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
    /// JSON-encoded filter list, e.g. `[{"field":"region","operator":"==","value":"eu"}]`
    #[serde(default)]
    filters: Option<String>,
}

const fn default_limit() -> u64 {
    50
}

async fn table_data(
    State(state): State<AppState>,
    Path((id, table)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ReadBatch>, AppError> {
    let filters: Vec<Filter> = match query.filters.as_deref() {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|error| AppError::bad_request(format!("Invalid filters: {error}")))?,
        None => Vec::new(),
    };
    let datasource = fetch_datasource(&state, &id).await?;
    let adapter = Adapter::connect(&datasource).await?;
    let batch = adapter
        .read_batch(&table, &filters, query.limit.min(500), query.offset)
        .await?;
    Ok(Json(batch))
}

// ---- sync configs ----

#[derive(Debug, Deserialize)]
struct ConfigRequest {
    name: String,
    master_datasource_id: DatasourceId,
    master_table: String,
    slave_datasource_id: DatasourceId,
    slave_table: String,
    field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    master_filters: Vec<Filter>,
    strategy: ConflictStrategy,
    #[serde(default)]
    webhook_url: Option<String>,
    #[serde(default)]
    slave_modified_column: Option<String>,
    #[serde(default)]
    batch_size: Option<u64>,
    #[serde(default)]
    propagate_deletes: bool,
}

async fn create_config(
    State(state): State<AppState>,
    Json(request): Json<ConfigRequest>,
) -> Result<Json<SyncConfig>, AppError> {
    let mut config = SyncConfig::new(
        request.name,
        request.master_datasource_id,
        request.master_table,
        request.slave_datasource_id,
        request.slave_table,
        request.field_mappings,
        request.strategy,
    );
    config.master_filters = request.master_filters;
    config.webhook_url = request.webhook_url;
    config.slave_modified_column = request.slave_modified_column;
    config.batch_size = request.batch_size.unwrap_or(SyncConfig::DEFAULT_BATCH_SIZE);
    config.propagate_deletes = request.propagate_deletes;

    // Mapping expressions must compile before the config is accepted.
    FieldMapper::compile(&config.field_mappings)?;
    for id in [&config.master_datasource_id, &config.slave_datasource_id] {
        if DatasourceRepository::new(state.db.conn())
            .get(id)
            .await?
            .is_none()
        {
            return Err(CoreError::NotFound(format!("Datasource {id}")).into());
        }
    }

    SyncConfigRepository::new(state.db.conn())
        .create(&config)
        .await?;
    Ok(Json(config))
}

async fn list_configs(State(state): State<AppState>) -> Result<Json<Vec<SyncConfig>>, AppError> {
    let configs = SyncConfigRepository::new(state.db.conn()).list().await?;
    Ok(Json(configs))
}

async fn get_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncConfig>, AppError> {
    Ok(Json(fetch_config(&state, &id).await?))
}

async fn delete_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_config_id(&id)?;
    SyncConfigRepository::new(state.db.conn()).delete(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Serialize)]
struct ValidationResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    problems: Vec<String>,
}

/// Check a stored config against the live schemas of both datasources.
async fn validate_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ValidationResponse>, AppError> {
    let config = fetch_config(&state, &id).await?;
    let mut problems = Vec::new();

    if let Err(error) = config.validate() {
        problems.push(error.to_string());
    }
    let mapper = match FieldMapper::compile(&config.field_mappings) {
        Ok(mapper) => Some(mapper),
        Err(error) => {
            problems.push(error.to_string());
            None
        }
    };

    if let Some(mapper) = mapper {
        match connected_adapter(&state, &config.master_datasource_id).await {
            Ok(adapter) => match adapter.schema(&config.master_table, false).await {
                Ok(schema) => {
                    for mapping in &config.field_mappings {
                        // Expressions may reference any column; only
                        // pass-through mappings pin one master column.
                        if mapping.effective_expression().is_none()
                            && schema.column(&mapping.master_column).is_none()
                        {
                            problems.push(format!(
                                "Master column '{}' not found in '{}'",
                                mapping.master_column, config.master_table
                            ));
                        }
                    }
                }
                Err(error) => problems.push(error.to_string()),
            },
            Err(error) => problems.push(format!("Master datasource: {error}")),
        }

        match connected_adapter(&state, &config.slave_datasource_id).await {
            Ok(adapter) => match adapter.schema(&config.slave_table, false).await {
                Ok(schema) => {
                    for column in mapper.slave_columns() {
                        if schema.column(&column).is_none() {
                            problems.push(format!(
                                "Slave column '{column}' not found in '{}'",
                                config.slave_table
                            ));
                        }
                    }
                }
                Err(error) => problems.push(error.to_string()),
            },
            Err(error) => problems.push(format!("Slave datasource: {error}")),
        }
    }

    Ok(Json(ValidationResponse {
        valid: problems.is_empty(),
        problems,
    }))
}

// ---- jobs ----

async fn trigger_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncJob>, AppError> {
    spawn_job(&state, &parse_config_id(&id)?, TriggerSource::Api).await
}

async fn webhook_trigger(
    State(state): State<AppState>,
    Path(config_id): Path<String>,
) -> Result<Json<SyncJob>, AppError> {
    spawn_job(&state, &parse_config_id(&config_id)?, TriggerSource::Webhook).await
}

/// Create a pending job and run it on a background task. The response is
/// the pending job; progress is polled through `GET /v1/jobs/{id}`.
async fn spawn_job(
    state: &AppState,
    config_id: &SyncConfigId,
    trigger: TriggerSource,
) -> Result<Json<SyncJob>, AppError> {
    let job = state.engine().trigger(config_id, trigger).await?;

    let cancel = CancelFlag::new();
    state
        .running
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(job.id.as_str(), cancel.clone());

    let task_state = state.clone();
    let job_id = job.id.clone();
    tokio::spawn(async move {
        let engine = task_state.engine();
        if let Err(error) = engine.run_job(&job_id, &cancel).await {
            tracing::error!(job_id = %job_id, error = %error, "background job errored");
        }
        task_state
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id.as_str());
    });

    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct JobsQuery {
    #[serde(default)]
    config_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Vec<SyncJob>>, AppError> {
    let config_id = query
        .config_id
        .as_deref()
        .map(parse_config_id)
        .transpose()?;
    let jobs = JobRepository::new(state.db.conn())
        .list(
            config_id.as_ref(),
            usize::try_from(query.limit.min(500)).unwrap_or(500),
            usize::try_from(query.offset).unwrap_or(0),
        )
        .await?;
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncJob>, AppError> {
    let id = parse_job_id(&id)?;
    let job = JobRepository::new(state.db.conn())
        .get(&id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Job {id}")))?;
    Ok(Json(job))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_job_id(&id)?;
    let job = JobRepository::new(state.db.conn())
        .get(&id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Job {id}")))?;
    if job.status != JobStatus::Running && job.status != JobStatus::Pending {
        return Err(AppError::bad_request(format!(
            "Job {id} is {}, not cancellable",
            job.status
        )));
    }

    let flag = state
        .running
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id.as_str())
        .cloned();
    match flag {
        Some(flag) => {
            flag.cancel();
            Ok(Json(serde_json::json!({ "cancelling": true })))
        }
        None => Err(AppError::bad_request(format!(
            "Job {id} is not running in this process"
        ))),
    }
}

// ---- conflicts ----

#[derive(Debug, Deserialize)]
struct ConflictsQuery {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    status: Option<ConflictStatus>,
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
}

async fn list_conflicts(
    State(state): State<AppState>,
    Query(query): Query<ConflictsQuery>,
) -> Result<Json<Vec<Conflict>>, AppError> {
    let job_id = query.job_id.as_deref().map(parse_job_id).transpose()?;
    let conflicts = ConflictRepository::new(state.db.conn())
        .list(
            job_id.as_ref(),
            query.status,
            usize::try_from(query.limit.min(500)).unwrap_or(500),
            usize::try_from(query.offset).unwrap_or(0),
        )
        .await?;
    Ok(Json(conflicts))
}

/// Fetching a conflict for review re-arms its captured state so the lease
/// does not expire while a reviewer is looking at it.
async fn get_conflict(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conflict>, AppError> {
    let id = parse_conflict_id(&id)?;
    let conflict = ConflictRepository::new(state.db.conn())
        .get(&id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Conflict {id}")))?;
    state.engine().touch_conflict(&conflict).await?;
    Ok(Json(conflict))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    resolution: ConflictResolution,
    #[serde(default)]
    merged_data: Option<Record>,
}

async fn resolve_conflict(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<Conflict>, AppError> {
    let id = parse_conflict_id(&id)?;
    let resolved = state
        .engine()
        .resolve_conflict(&id, request.resolution, request.merged_data)
        .await?;
    Ok(Json(resolved))
}

// ---- helpers ----

async fn fetch_datasource(state: &AppState, id: &str) -> Result<Datasource, AppError> {
    let id = parse_datasource_id(id)?;
    DatasourceRepository::new(state.db.conn())
        .get(&id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Datasource {id}")).into())
}

async fn fetch_config(state: &AppState, id: &str) -> Result<SyncConfig, AppError> {
    let id = parse_config_id(id)?;
    SyncConfigRepository::new(state.db.conn())
        .get(&id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Sync config {id}")).into())
}

async fn connected_adapter(state: &AppState, id: &DatasourceId) -> Result<Adapter, AppError> {
    let datasource = DatasourceRepository::new(state.db.conn())
        .get(id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Datasource {id}")))?;
    Ok(Adapter::connect(&datasource).await?)
}

fn parse_datasource_id(raw: &str) -> Result<DatasourceId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("Invalid datasource id: {raw}")))
}

fn parse_config_id(raw: &str) -> Result<SyncConfigId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("Invalid config id: {raw}")))
}

fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("Invalid job id: {raw}")))
}

fn parse_conflict_id(raw: &str) -> Result<ConflictId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("Invalid conflict id: {raw}")))
}
