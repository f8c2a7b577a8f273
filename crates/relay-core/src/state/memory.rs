//! In-process state-store backend

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{CapturedRecord, JobId};

use super::Lease;

/// Captured records in a mutex-guarded map.
///
/// The reference backend: tests and single-process runs use it directly,
/// and the libSQL backend mirrors its semantics.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, CapturedRecord>>,
}

impl MemoryStateStore {
    /// An empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite an entry
    pub fn capture(&self, record: CapturedRecord) {
        let key = record.storage_key();
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, record);
    }

    /// Read an entry, validating its TTL against the current time
    #[must_use]
    pub fn get(&self, job_id: &JobId, record_key: &str) -> Lease {
        let key = CapturedRecord::key_for(job_id, record_key);
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match entries.get(&key) {
            Some(record) if record.is_expired_at(now_ms()) => Lease::Expired(record.clone()),
            Some(record) => Lease::Live(record.clone()),
            None => Lease::Missing,
        }
    }

    /// Re-arm a live entry's TTL
    pub fn touch(&self, job_id: &JobId, record_key: &str, ttl_ms: i64) -> bool {
        let key = CapturedRecord::key_for(job_id, record_key);
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match entries.get_mut(&key) {
            Some(record) if !record.is_expired_at(now_ms()) => {
                record.expires_at = now_ms() + ttl_ms;
                true
            }
            _ => false,
        }
    }

    /// Delete an entry
    pub fn remove(&self, job_id: &JobId, record_key: &str) -> bool {
        let key = CapturedRecord::key_for(job_id, record_key);
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&key)
            .is_some()
    }

    /// Delete and return every expired entry of a job
    pub fn reap_expired(&self, job_id: &JobId) -> Vec<CapturedRecord> {
        let now = now_ms();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let expired_keys: Vec<String> = entries
            .iter()
            .filter(|(_, record)| record.job_id == *job_id && record.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        let mut reaped: Vec<CapturedRecord> = expired_keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .collect();
        reaped.sort_by_key(|record| record.captured_at);
        reaped
    }

    /// Live entries of a job, oldest capture first
    #[must_use]
    pub fn live_for_job(&self, job_id: &JobId) -> Vec<CapturedRecord> {
        let now = now_ms();
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut live: Vec<CapturedRecord> = entries
            .values()
            .filter(|record| record.job_id == *job_id && !record.is_expired_at(now))
            .cloned()
            .collect();
        live.sort_by_key(|record| record.captured_at);
        live
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

    fn captured(job_id: JobId, key: &str, ttl_ms: i64) -> CapturedRecord {
        CapturedRecord::new(job_id, key, Record::new(), Record::new(), ttl_ms)
    }

    #[test]
    fn capture_then_get_is_live() {
        let store = MemoryStateStore::new();
        let job_id = JobId::new();
        store.capture(captured(job_id, "1", 60_000));
        assert!(matches!(store.get(&job_id, "1"), Lease::Live(_)));
        assert_eq!(store.get(&job_id, "2"), Lease::Missing);
    }

    #[test]
    fn capture_overwrites_the_previous_entry() {
        let store = MemoryStateStore::new();
        let job_id = JobId::new();
        let mut first = captured(job_id, "1", 60_000);
        first
            .master_record
            .insert("v".to_string(), serde_json::json!(1));
        store.capture(first);

        let mut second = captured(job_id, "1", 60_000);
        second
            .master_record
            .insert("v".to_string(), serde_json::json!(2));
        store.capture(second);

        let Lease::Live(record) = store.get(&job_id, "1") else {
            panic!("expected a live lease");
        };
        assert_eq!(record.master_record.get("v"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn expired_entries_surface_as_expired() {
        let store = MemoryStateStore::new();
        let job_id = JobId::new();
        store.capture(captured(job_id, "1", -1));
        assert!(matches!(store.get(&job_id, "1"), Lease::Expired(_)));
    }

    #[test]
    fn touch_rearms_only_live_entries() {
        let store = MemoryStateStore::new();
        let job_id = JobId::new();
        store.capture(captured(job_id, "live", 60_000));
        store.capture(captured(job_id, "dead", -1));

        assert!(store.touch(&job_id, "live", 120_000));
        assert!(!store.touch(&job_id, "dead", 120_000));
        assert!(!store.touch(&job_id, "missing", 120_000));
    }

    #[test]
    fn reap_collects_only_this_jobs_expired_entries() {
        let store = MemoryStateStore::new();
        let job_a = JobId::new();
        let job_b = JobId::new();
        store.capture(captured(job_a, "1", -1));
        store.capture(captured(job_a, "2", 60_000));
        store.capture(captured(job_b, "1", -1));

        let reaped = store.reap_expired(&job_a);
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].record_key, "1");
        // Reaped entries are gone; the other job's entry is untouched.
        assert_eq!(store.get(&job_a, "1"), Lease::Missing);
        assert!(matches!(store.get(&job_b, "1"), Lease::Expired(_)));
    }

    #[test]
    fn jobs_do_not_collide_on_record_keys() {
        let store = MemoryStateStore::new();
        let job_a = JobId::new();
        let job_b = JobId::new();
        store.capture(captured(job_a, "1", 60_000));
        assert!(matches!(store.get(&job_a, "1"), Lease::Live(_)));
        assert_eq!(store.get(&job_b, "1"), Lease::Missing);

        store.remove(&job_a, "1");
        assert_eq!(store.get(&job_a, "1"), Lease::Missing);
    }

    #[test]
    fn live_for_job_orders_by_capture_time() {
        let store = MemoryStateStore::new();
        let job_id = JobId::new();
        let mut first = captured(job_id, "a", 60_000);
        first.captured_at -= 10;
        store.capture(first);
        store.capture(captured(job_id, "b", 60_000));

        let live = store.live_for_job(&job_id);
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].record_key, "a");
    }
}
