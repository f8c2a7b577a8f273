//! Data model for relay

mod captured;
mod conflict;
mod datasource;
mod job;
mod record;
mod sync_config;

pub use captured::CapturedRecord;
pub use conflict::{Conflict, ConflictId, ConflictResolution, ConflictStatus};
pub use datasource::{Datasource, DatasourceId, DatasourceKind};
pub use job::{JobCounters, JobId, JobStatus, SyncJob, TriggerSource};
pub use record::{record_key_string, values_equal, Record};
pub use sync_config::{ConflictStrategy, FieldMapping, SyncConfig, SyncConfigId};
