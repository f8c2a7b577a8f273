//! Relay CLI - drive syncs between heterogeneous data stores
//!
//! Manage datasources and sync configs, run jobs in the foreground, and
//! review conflicts from the terminal.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use relay_core::engine::{self, SyncEngine};
use relay_core::models::{
    ConflictResolution, ConflictStatus, Datasource, DatasourceKind, FieldMapping, Record,
    SyncConfig, TriggerSource,
};
use relay_core::settings::EngineSettings;
use relay_core::state::{LibSqlStateStore, StateStore};
use relay_core::store::{
    ConflictRepository, Database, DatasourceRepository, JobRepository, SyncConfigRepository,
};
use relay_core::SyncJob;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Replicate records from a master store to a slave store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local database file
    #[arg(long, value_name = "PATH", global = true)]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage datasources
    #[command(subcommand)]
    Datasource(DatasourceCommands),
    /// Manage sync configs
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Run a sync config in the foreground
    Run {
        /// Sync config ID
        config_id: String,
        /// Output the finished job as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect job history
    #[command(subcommand)]
    Jobs(JobCommands),
    /// Review and resolve conflicts
    #[command(subcommand)]
    Conflicts(ConflictCommands),
}

#[derive(Subcommand)]
enum DatasourceCommands {
    /// Register a datasource
    Add {
        /// Human-readable name, unique across datasources
        name: String,
        /// Store kind: sql_relational, serverless_relational or content_api
        kind: String,
        /// Hostname, URL or filesystem path, depending on kind
        #[arg(long)]
        host: Option<String>,
        /// TCP port for networked kinds
        #[arg(long)]
        port: Option<u16>,
        /// Database name
        #[arg(long)]
        database: Option<String>,
        /// Username
        #[arg(long)]
        username: Option<String>,
        /// Name of the environment variable holding the secret
        #[arg(long)]
        credential_ref: Option<String>,
        /// Base URL for content-API kinds
        #[arg(long)]
        api_endpoint: Option<String>,
        /// Prefix prepended to every table/resource name
        #[arg(long)]
        table_prefix: Option<String>,
    },
    /// List registered datasources
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Test connectivity of a datasource
    Test {
        /// Datasource ID
        id: String,
    },
    /// Remove a datasource
    Remove {
        /// Datasource ID
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Create a sync config
    Add {
        /// Human-readable name
        name: String,
        /// Master datasource ID
        #[arg(long)]
        master: String,
        /// Table/resource read on the master
        #[arg(long)]
        master_table: String,
        /// Slave datasource ID
        #[arg(long)]
        slave: String,
        /// Table/resource written on the slave
        #[arg(long)]
        slave_table: String,
        /// Field mapping, repeatable: "master_col", "master_col=slave_col"
        /// or "master_col=slave_col={{ expression }}"
        #[arg(long = "map", value_name = "MAPPING", required = true)]
        mappings: Vec<String>,
        /// Master column that identifies the record in both stores
        #[arg(long)]
        key: String,
        /// Conflict strategy: source_wins, target_wins, manual, merge or webhook
        #[arg(long, default_value = "source_wins")]
        strategy: String,
        /// Endpoint consulted by the webhook strategy
        #[arg(long)]
        webhook_url: Option<String>,
        /// Slave column holding a unix-ms modification timestamp (merge strategy)
        #[arg(long)]
        modified_column: Option<String>,
        /// Records fetched per batch
        #[arg(long)]
        batch_size: Option<u64>,
        /// Delete slave records that vanished from the master
        #[arg(long)]
        propagate_deletes: bool,
    },
    /// List sync configs
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a sync config
    Remove {
        /// Sync config ID
        id: String,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List recent jobs
    List {
        /// Only jobs for this sync config
        #[arg(long)]
        config: Option<String>,
        /// Number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one job
    Show {
        /// Job ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConflictCommands {
    /// List conflicts
    List {
        /// Only conflicts detected by this job
        #[arg(long)]
        job: Option<String>,
        /// Filter by status (pending, resolved_master, resolved_slave,
        /// resolved_merged, skipped)
        #[arg(long)]
        status: Option<String>,
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a pending conflict
    Resolve {
        /// Conflict ID
        id: String,
        /// Decision: source, slave, merged or skipped
        resolution: String,
        /// Merged record as JSON, required for `merged`
        #[arg(long, value_name = "JSON")]
        merged_data: Option<String>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] relay_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid mapping '{0}', expected master_col[=slave_col[=expression]]")]
    InvalidMapping(String),
    #[error("Key column '{0}' is not among the mappings")]
    KeyNotMapped(String),
    #[error("Invalid ID: {0}")]
    InvalidId(String),
    #[error("RELAY_STATE_TTL_SECS must be an integer number of seconds")]
    InvalidTtl,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay=warn".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Datasource(command) => run_datasource(command, &db_path).await,
        Commands::Config(command) => run_config(command, &db_path).await,
        Commands::Run { config_id, json } => run_sync(&config_id, json, &db_path).await,
        Commands::Jobs(command) => run_jobs(command, &db_path).await,
        Commands::Conflicts(command) => run_conflicts(command, &db_path).await,
    }
}

async fn run_datasource(command: DatasourceCommands, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let repo = DatasourceRepository::new(db.conn());

    match command {
        DatasourceCommands::Add {
            name,
            kind,
            host,
            port,
            database,
            username,
            credential_ref,
            api_endpoint,
            table_prefix,
        } => {
            let mut datasource = Datasource::new(name, kind.parse::<DatasourceKind>()?);
            datasource.host = host;
            datasource.port = port;
            datasource.database = database;
            datasource.username = username;
            datasource.credential_ref = credential_ref;
            datasource.api_endpoint = api_endpoint;
            datasource.table_prefix = table_prefix;
            repo.create(&datasource).await?;
            println!("{}", datasource.id);
        }
        DatasourceCommands::List { json } => {
            let datasources = repo.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&datasources)?);
            } else {
                for ds in &datasources {
                    let status = if ds.is_active { "active" } else { "inactive" };
                    println!("{}  {}  {}  {}", ds.id, ds.kind, status, ds.name);
                }
            }
        }
        DatasourceCommands::Test { id } => {
            let id = id
                .parse()
                .map_err(|_| CliError::InvalidId(id.clone()))?;
            let datasource = repo
                .get(&id)
                .await?
                .ok_or_else(|| relay_core::Error::NotFound(format!("Datasource {id}")))?;
            let outcome = match relay_core::adapters::Adapter::connect(&datasource).await {
                Ok(adapter) => adapter.test_connection().await,
                Err(error) => Err(error),
            };
            repo.record_test(&id, outcome.is_ok()).await?;
            match outcome {
                Ok(()) => println!("ok"),
                Err(error) => {
                    println!("failed: {error}");
                    std::process::exit(1);
                }
            }
        }
        DatasourceCommands::Remove { id } => {
            let id = id
                .parse()
                .map_err(|_| CliError::InvalidId(id.clone()))?;
            repo.delete(&id).await?;
            println!("deleted");
        }
    }

    Ok(())
}

async fn run_config(command: ConfigCommands, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let repo = SyncConfigRepository::new(db.conn());

    match command {
        ConfigCommands::Add {
            name,
            master,
            master_table,
            slave,
            slave_table,
            mappings,
            key,
            strategy,
            webhook_url,
            modified_column,
            batch_size,
            propagate_deletes,
        } => {
            let field_mappings = parse_mappings(&mappings, &key)?;
            let mut config = SyncConfig::new(
                name,
                master.parse().map_err(|_| CliError::InvalidId(master.clone()))?,
                master_table,
                slave.parse().map_err(|_| CliError::InvalidId(slave.clone()))?,
                slave_table,
                field_mappings,
                strategy.parse()?,
            );
            config.webhook_url = webhook_url;
            config.slave_modified_column = modified_column;
            config.batch_size = batch_size.unwrap_or(SyncConfig::DEFAULT_BATCH_SIZE);
            config.propagate_deletes = propagate_deletes;
            repo.create(&config).await?;
            println!("{}", config.id);
        }
        ConfigCommands::List { json } => {
            let configs = repo.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&configs)?);
            } else {
                for config in &configs {
                    println!(
                        "{}  {}  {} -> {}  {}",
                        config.id,
                        config.strategy,
                        config.master_table,
                        config.slave_table,
                        config.name
                    );
                }
            }
        }
        ConfigCommands::Remove { id } => {
            let id = id
                .parse()
                .map_err(|_| CliError::InvalidId(id.clone()))?;
            repo.delete(&id).await?;
            println!("deleted");
        }
    }

    Ok(())
}

async fn run_sync(config_id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let state = open_state_store().await?;
    let settings = settings_from_env()?;

    let config_id = config_id
        .parse()
        .map_err(|_| CliError::InvalidId(config_id.to_string()))?;
    let job = engine::run_once(&db, &state, settings, &config_id, TriggerSource::Manual).await?;

    print_job(&job, as_json)?;
    Ok(())
}

async fn run_jobs(command: JobCommands, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let repo = JobRepository::new(db.conn());

    match command {
        JobCommands::List {
            config,
            limit,
            json,
        } => {
            let config_id = config
                .map(|raw| raw.parse().map_err(|_| CliError::InvalidId(raw.clone())))
                .transpose()?;
            let jobs = repo.list(config_id.as_ref(), limit, 0).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                for job in &jobs {
                    println!(
                        "{}  {}  processed={} conflicts={} errors={}",
                        job.id,
                        job.status,
                        job.counters.processed,
                        job.counters.conflicts,
                        job.counters.errors
                    );
                }
            }
        }
        JobCommands::Show { id, json } => {
            let id = id
                .parse()
                .map_err(|_| CliError::InvalidId(id.clone()))?;
            let job = repo
                .get(&id)
                .await?
                .ok_or_else(|| relay_core::Error::NotFound(format!("Job {id}")))?;
            print_job(&job, json)?;
        }
    }

    Ok(())
}

async fn run_conflicts(command: ConflictCommands, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;

    match command {
        ConflictCommands::List {
            job,
            status,
            limit,
            json,
        } => {
            let repo = ConflictRepository::new(db.conn());
            let job_id = job
                .map(|raw| raw.parse().map_err(|_| CliError::InvalidId(raw.clone())))
                .transpose()?;
            let status = status
                .map(|raw| raw.parse::<ConflictStatus>())
                .transpose()?;
            let conflicts = repo.list(job_id.as_ref(), status, limit, 0).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&conflicts)?);
            } else {
                for conflict in &conflicts {
                    println!(
                        "{}  {}  key={}  fields={}",
                        conflict.id,
                        conflict.status,
                        conflict.record_key,
                        conflict.conflicting_fields.join(",")
                    );
                }
            }
        }
        ConflictCommands::Resolve {
            id,
            resolution,
            merged_data,
        } => {
            let state = open_state_store().await?;
            let settings = settings_from_env()?;
            let engine = SyncEngine::new(&db, &state, settings);

            let id = id
                .parse()
                .map_err(|_| CliError::InvalidId(id.clone()))?;
            let resolution = resolution.parse::<ConflictResolution>()?;
            let merged: Option<Record> = merged_data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?;
            let resolved = engine.resolve_conflict(&id, resolution, merged).await?;
            println!("{}  {}", resolved.id, resolved.status);
        }
    }

    Ok(())
}

/// Parse `--map` values into field mappings and flag the key column.
///
/// Accepted forms: `col` (pass-through), `master=slave` and
/// `master=slave=expression`; the expression may itself contain `=`.
fn parse_mappings(raw: &[String], key: &str) -> Result<Vec<FieldMapping>, CliError> {
    let mut mappings = Vec::with_capacity(raw.len());
    for entry in raw {
        let mut parts = entry.splitn(3, '=');
        let master = parts
            .next()
            .filter(|part| !part.is_empty())
            .ok_or_else(|| CliError::InvalidMapping(entry.clone()))?;
        let slave = parts.next().unwrap_or(master);
        if slave.is_empty() {
            return Err(CliError::InvalidMapping(entry.clone()));
        }
        let mut mapping = FieldMapping {
            master_column: master.to_string(),
            slave_column: slave.to_string(),
            expression: parts.next().map(str::to_string),
            is_key: master == key,
        };
        if mapping.is_key {
            mapping.expression = None;
        }
        mappings.push(mapping);
    }

    if !mappings.iter().any(|mapping| mapping.is_key) {
        return Err(CliError::KeyNotMapped(key.to_string()));
    }
    Ok(mappings)
}

fn print_job(job: &SyncJob, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(job)?);
        return Ok(());
    }

    println!("job       {}", job.id);
    println!("status    {}", job.status);
    if let Some(total) = job.total_records {
        println!("total     {total}");
    }
    println!("processed {}", job.counters.processed);
    println!("inserted  {}", job.counters.inserted);
    println!("updated   {}", job.counters.updated);
    println!("deleted   {}", job.counters.deleted);
    println!("conflicts {}", job.counters.conflicts);
    println!("errors    {}", job.counters.errors);
    println!("abandoned {}", job.counters.abandoned);
    if let Some(message) = &job.error_message {
        println!("error     {message}");
    }
    Ok(())
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("RELAY_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relay")
        .join("relay.db")
}

async fn open_database(path: &Path) -> Result<Database, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Database::open(path).await?)
}

/// Captured state lives in `RELAY_STATE_DB_PATH` when set, so conflicts
/// survive across CLI invocations; otherwise it is process-local.
async fn open_state_store() -> Result<StateStore, CliError> {
    match env::var("RELAY_STATE_DB_PATH") {
        Ok(path) if !path.trim().is_empty() => {
            Ok(StateStore::LibSql(LibSqlStateStore::open(&path).await?))
        }
        _ => Ok(StateStore::in_memory()),
    }
}

fn settings_from_env() -> Result<EngineSettings, CliError> {
    let mut settings = EngineSettings::default();
    if let Ok(raw) = env::var("RELAY_STATE_TTL_SECS") {
        let secs = raw.parse::<u64>().map_err(|_| CliError::InvalidTtl)?;
        settings.capture_ttl = Duration::from_secs(secs);
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mappings_parse_all_three_forms() {
        let raw = vec![
            "id".to_string(),
            "title=name".to_string(),
            "price=price={{ master.price * 1.1 }}".to_string(),
        ];
        let mappings = parse_mappings(&raw, "id").unwrap();
        assert_eq!(mappings.len(), 3);
        assert!(mappings[0].is_key);
        assert_eq!(mappings[1].slave_column, "name");
        assert_eq!(
            mappings[2].expression.as_deref(),
            Some("{{ master.price * 1.1 }}")
        );
    }

    #[test]
    fn mappings_require_the_key_column() {
        let raw = vec!["title=name".to_string()];
        assert!(matches!(
            parse_mappings(&raw, "id"),
            Err(CliError::KeyNotMapped(_))
        ));
    }

    #[test]
    fn malformed_mappings_are_rejected() {
        for bad in ["", "=slave"] {
            assert!(parse_mappings(&[bad.to_string()], "id").is_err());
        }
    }

    #[test]
    fn db_path_prefers_the_cli_flag() {
        let path = resolve_db_path(Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(path, PathBuf::from("/tmp/x.db"));
    }
}
