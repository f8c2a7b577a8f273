//! Engine tuning knobs

use std::time::Duration;

/// Tuning parameters for a sync run.
///
/// The defaults are safe for production; binaries override them from their
/// own configuration layer.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Lease on captured records awaiting resolution
    pub capture_ttl: Duration,
    /// Bound on each adapter and state-store call
    pub operation_timeout: Duration,
    /// Retries for retryable adapter errors before the job fails
    pub max_retries: u32,
    /// Base delay for exponential retry backoff
    pub retry_base_delay: Duration,
    /// Consecutive per-record errors that abort the job
    pub error_threshold: u64,
    /// Bound on webhook resolution calls
    pub webhook_timeout: Duration,
}

impl EngineSettings {
    /// Default captured-record lease: four hours
    pub const DEFAULT_CAPTURE_TTL: Duration = Duration::from_secs(4 * 60 * 60);

    /// Capture TTL in milliseconds, the unit the state store works in
    #[must_use]
    pub fn capture_ttl_ms(&self) -> i64 {
        i64::try_from(self.capture_ttl.as_millis()).unwrap_or(i64::MAX)
    }

    /// Backoff delay before the given retry attempt (0-based)
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            capture_ttl: Self::DEFAULT_CAPTURE_TTL,
            operation_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            error_threshold: 25,
            webhook_timeout: Duration::from_secs(10),
        }
    }
}
