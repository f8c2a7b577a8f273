//! Captured record - the transient state-store entity

use serde::{Deserialize, Serialize};

use super::{JobId, Record};

/// A master record snapshot plus its mapped slave candidate, parked in the
/// state store between capture and flush.
///
/// Lives under the key `{job_id}:{record_key}` with a TTL; deletion on flush
/// or TTL expiry, whichever comes first. Expiry is a recovery path and is
/// accounted separately as "abandoned".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRecord {
    /// Owning job
    pub job_id: JobId,
    /// Canonical key of the record within the job
    pub record_key: String,
    /// Master record as read
    pub master_record: Record,
    /// Mapped slave-candidate values (slave column names)
    pub candidate_record: Record,
    /// Capture timestamp (unix ms)
    pub captured_at: i64,
    /// Lease end (unix ms); the record is abandoned past this point
    pub expires_at: i64,
}

impl CapturedRecord {
    /// Capture a record with a lease of `ttl_ms` from now
    #[must_use]
    pub fn new(
        job_id: JobId,
        record_key: impl Into<String>,
        master_record: Record,
        candidate_record: Record,
        ttl_ms: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            job_id,
            record_key: record_key.into(),
            master_record,
            candidate_record,
            captured_at: now,
            expires_at: now + ttl_ms,
        }
    }

    /// Namespaced state-store key: `{job_id}:{record_key}`
    #[must_use]
    pub fn storage_key(&self) -> String {
        Self::key_for(&self.job_id, &self.record_key)
    }

    /// Compose the state-store key for a job/record pair
    #[must_use]
    pub fn key_for(job_id: &JobId, record_key: &str) -> String {
        format!("{job_id}:{record_key}")
    }

    /// Whether the lease has elapsed at `now_ms`
    #[must_use]
    pub const fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_is_namespaced_by_job() {
        let job_id = JobId::new();
        let captured = CapturedRecord::new(job_id, "7", Record::new(), Record::new(), 1000);
        assert_eq!(captured.storage_key(), format!("{job_id}:7"));
    }

    #[test]
    fn expiry_is_relative_to_capture() {
        let captured = CapturedRecord::new(JobId::new(), "1", Record::new(), Record::new(), 1000);
        assert!(!captured.is_expired_at(captured.captured_at));
        assert!(captured.is_expired_at(captured.captured_at + 1000));
    }
}
