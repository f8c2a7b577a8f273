//! libSQL state-store backend
//!
//! One table keyed by `{job_id}:{record_key}` with the lease end in its own
//! column so touch and reap never deserialize payloads they do not need.

use libsql::{Builder, Connection};

use crate::error::Result;
use crate::models::{CapturedRecord, JobId};

use super::Lease;

/// Captured records in a libSQL table, durable across restarts
pub struct LibSqlStateStore {
    conn: Connection,
}

impl LibSqlStateStore {
    /// Open (and create if needed) the store at the given path
    pub async fn open(path: &str) -> Result<Self> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        Self::from_connection(conn).await
    }

    /// Build the store over an existing connection
    pub async fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS captured_records (
                storage_key TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                record_key TEXT NOT NULL,
                payload TEXT NOT NULL,
                captured_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            (),
        )
        .await?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_captured_job ON captured_records (job_id, expires_at)",
            (),
        )
        .await?;
        Ok(Self { conn })
    }

    /// Store or overwrite an entry
    pub async fn capture(&self, record: CapturedRecord) -> Result<()> {
        let payload = serde_json::to_string(&record)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO captured_records
                 (storage_key, job_id, record_key, payload, captured_at, expires_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                libsql::params![
                    record.storage_key(),
                    record.job_id.as_str(),
                    record.record_key.clone(),
                    payload,
                    record.captured_at,
                    record.expires_at
                ],
            )
            .await?;
        Ok(())
    }

    /// Read an entry, validating its TTL against the current time
    pub async fn get(&self, job_id: &JobId, record_key: &str) -> Result<Lease> {
        let key = CapturedRecord::key_for(job_id, record_key);
        let mut rows = self
            .conn
            .query(
                "SELECT payload, expires_at FROM captured_records WHERE storage_key = ?",
                libsql::params![key],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(Lease::Missing);
        };
        let mut record: CapturedRecord = serde_json::from_str(&row.get::<String>(0)?)?;
        // The column is authoritative; the payload may predate a touch.
        record.expires_at = row.get::<i64>(1)?;
        if record.is_expired_at(now_ms()) {
            Ok(Lease::Expired(record))
        } else {
            Ok(Lease::Live(record))
        }
    }

    /// Re-arm a live entry's TTL
    pub async fn touch(&self, job_id: &JobId, record_key: &str, ttl_ms: i64) -> Result<bool> {
        let key = CapturedRecord::key_for(job_id, record_key);
        let now = now_ms();
        let affected = self
            .conn
            .execute(
                "UPDATE captured_records SET expires_at = ? \
                 WHERE storage_key = ? AND expires_at > ?",
                libsql::params![now + ttl_ms, key, now],
            )
            .await?;
        Ok(affected > 0)
    }

    /// Delete an entry
    pub async fn remove(&self, job_id: &JobId, record_key: &str) -> Result<bool> {
        let key = CapturedRecord::key_for(job_id, record_key);
        let affected = self
            .conn
            .execute(
                "DELETE FROM captured_records WHERE storage_key = ?",
                libsql::params![key],
            )
            .await?;
        Ok(affected > 0)
    }

    /// Delete and return every expired entry of a job
    pub async fn reap_expired(&self, job_id: &JobId) -> Result<Vec<CapturedRecord>> {
        let now = now_ms();
        let mut rows = self
            .conn
            .query(
                "SELECT payload, expires_at FROM captured_records \
                 WHERE job_id = ? AND expires_at <= ? ORDER BY captured_at",
                libsql::params![job_id.as_str(), now],
            )
            .await?;

        let mut reaped = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut record: CapturedRecord = serde_json::from_str(&row.get::<String>(0)?)?;
            record.expires_at = row.get::<i64>(1)?;
            reaped.push(record);
        }

        self.conn
            .execute(
                "DELETE FROM captured_records WHERE job_id = ? AND expires_at <= ?",
                libsql::params![job_id.as_str(), now],
            )
            .await?;
        Ok(reaped)
    }

    /// Live entries of a job, oldest capture first
    pub async fn live_for_job(&self, job_id: &JobId) -> Result<Vec<CapturedRecord>> {
        let now = now_ms();
        let mut rows = self
            .conn
            .query(
                "SELECT payload, expires_at FROM captured_records \
                 WHERE job_id = ? AND expires_at > ? ORDER BY captured_at",
                libsql::params![job_id.as_str(), now],
            )
            .await?;

        let mut live = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut record: CapturedRecord = serde_json::from_str(&row.get::<String>(0)?)?;
            record.expires_at = row.get::<i64>(1)?;
            live.push(record);
        }
        Ok(live)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use pretty_assertions::assert_eq;

    async fn store() -> LibSqlStateStore {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();
        LibSqlStateStore::from_connection(conn).await.unwrap()
    }

    fn captured(job_id: JobId, key: &str, ttl_ms: i64) -> CapturedRecord {
        CapturedRecord::new(job_id, key, Record::new(), Record::new(), ttl_ms)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capture_get_remove_round_trip() {
        let store = store().await;
        let job_id = JobId::new();
        store.capture(captured(job_id, "1", 60_000)).await.unwrap();

        assert!(matches!(
            store.get(&job_id, "1").await.unwrap(),
            Lease::Live(_)
        ));
        assert!(store.remove(&job_id, "1").await.unwrap());
        assert_eq!(store.get(&job_id, "1").await.unwrap(), Lease::Missing);
        assert!(!store.remove(&job_id, "1").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capture_overwrites_per_key() {
        let store = store().await;
        let job_id = JobId::new();
        let mut first = captured(job_id, "1", 60_000);
        first
            .candidate_record
            .insert("v".to_string(), serde_json::json!(1));
        store.capture(first).await.unwrap();

        let mut second = captured(job_id, "1", 60_000);
        second
            .candidate_record
            .insert("v".to_string(), serde_json::json!(2));
        store.capture(second).await.unwrap();

        let Lease::Live(record) = store.get(&job_id, "1").await.unwrap() else {
            panic!("expected a live lease");
        };
        assert_eq!(
            record.candidate_record.get("v"),
            Some(&serde_json::json!(2))
        );
        assert_eq!(store.live_for_job(&job_id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn touch_extends_the_lease_column() {
        let store = store().await;
        let job_id = JobId::new();
        store.capture(captured(job_id, "1", 5_000)).await.unwrap();

        assert!(store.touch(&job_id, "1", 600_000).await.unwrap());
        let Lease::Live(record) = store.get(&job_id, "1").await.unwrap() else {
            panic!("expected a live lease");
        };
        assert!(record.expires_at > now_ms() + 500_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_entries_are_reaped_per_job() {
        let store = store().await;
        let job_a = JobId::new();
        let job_b = JobId::new();
        store.capture(captured(job_a, "1", -1)).await.unwrap();
        store.capture(captured(job_a, "2", 60_000)).await.unwrap();
        store.capture(captured(job_b, "1", -1)).await.unwrap();

        assert!(matches!(
            store.get(&job_a, "1").await.unwrap(),
            Lease::Expired(_)
        ));

        let reaped = store.reap_expired(&job_a).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].record_key, "1");

        assert_eq!(store.get(&job_a, "1").await.unwrap(), Lease::Missing);
        assert!(matches!(
            store.get(&job_a, "2").await.unwrap(),
            Lease::Live(_)
        ));
        assert!(matches!(
            store.get(&job_b, "1").await.unwrap(),
            Lease::Expired(_)
        ));
    }
}
