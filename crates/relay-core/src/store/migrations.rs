//! Database migrations

use libsql::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }

    if version < CURRENT_VERSION {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            libsql::params![CURRENT_VERSION],
        )
        .await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: initial schema
async fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS datasources (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            host TEXT,
            port INTEGER,
            database_name TEXT,
            username TEXT,
            credential_ref TEXT,
            api_endpoint TEXT,
            table_prefix TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_tested_at INTEGER,
            last_test_success INTEGER,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sync_configs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            master_datasource_id TEXT NOT NULL REFERENCES datasources(id),
            master_table TEXT NOT NULL,
            slave_datasource_id TEXT NOT NULL REFERENCES datasources(id),
            slave_table TEXT NOT NULL,
            field_mappings TEXT NOT NULL,
            master_filters TEXT NOT NULL DEFAULT '[]',
            strategy TEXT NOT NULL,
            webhook_url TEXT,
            slave_modified_column TEXT,
            batch_size INTEGER NOT NULL,
            propagate_deletes INTEGER NOT NULL DEFAULT 0,
            last_synced_at INTEGER,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sync_jobs (
            id TEXT PRIMARY KEY,
            config_id TEXT NOT NULL REFERENCES sync_configs(id),
            status TEXT NOT NULL,
            trigger_source TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            inserted INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            conflicts INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            abandoned INTEGER NOT NULL DEFAULT 0,
            total_records INTEGER,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_jobs_config ON sync_jobs (config_id, created_at DESC)",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS conflicts (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES sync_jobs(id),
            record_key TEXT NOT NULL,
            master_data TEXT NOT NULL,
            slave_data TEXT NOT NULL,
            conflicting_fields TEXT NOT NULL,
            status TEXT NOT NULL,
            resolved_data TEXT,
            created_at INTEGER NOT NULL,
            resolved_at INTEGER
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_conflicts_job ON conflicts (job_id, status)",
        (),
    )
    .await?;

    Ok(())
}
