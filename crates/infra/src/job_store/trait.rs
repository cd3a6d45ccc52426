use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use jobtrack_core::{JobRecord, JobRecordId, JobRecordUpdate, NewJobRecord};

/// Job record store operation error.
#[derive(Debug, Clone, Error)]
pub enum JobStoreError {
    #[error("job record not found: {0}")]
    NotFound(JobRecordId),

    /// Another in-flight record with the same dedup name already exists.
    ///
    /// Returned by `insert` when `unique_in_flight` is set; the check and the
    /// insert are one atomic step inside the store.
    #[error("an in-flight job named `{name}` already exists")]
    DuplicateInFlight { name: String },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable table of job records.
///
/// Implementations must be safe to share across threads: queue workers and
/// synchronous callers hit the same store concurrently.
pub trait JobRecordStore: Send + Sync {
    /// Insert a new record, minting its id and `queued_at`.
    ///
    /// When `record.unique_in_flight` is set, the insert fails with
    /// `DuplicateInFlight` if another in-flight record with the same name and
    /// the same flag exists.
    fn insert(&self, record: NewJobRecord) -> Result<JobRecordId, JobStoreError>;

    fn find_by_id(&self, id: JobRecordId) -> Result<Option<JobRecord>, JobStoreError>;

    /// The oldest in-flight record with this name, if any.
    fn find_in_flight_by_name(&self, name: &str) -> Result<Option<JobRecord>, JobStoreError>;

    /// Like [`find_in_flight_by_name`](Self::find_in_flight_by_name), restricted
    /// to records inserted with `unique_in_flight`: exactly the rows a dedup
    /// insert clashes with.
    fn find_unique_in_flight_by_name(
        &self,
        name: &str,
    ) -> Result<Option<JobRecord>, JobStoreError>;

    /// Apply a partial update. Fails with `NotFound` for unknown ids.
    fn update(&self, id: JobRecordId, update: JobRecordUpdate) -> Result<(), JobStoreError>;

    /// Shallow-merge `partial` into the record's `data`.
    fn merge_data(&self, id: JobRecordId, partial: JsonValue) -> Result<(), JobStoreError> {
        self.update(id, JobRecordUpdate::merge_data(partial))
    }
}

impl<S> JobRecordStore for Arc<S>
where
    S: JobRecordStore + ?Sized,
{
    fn insert(&self, record: NewJobRecord) -> Result<JobRecordId, JobStoreError> {
        (**self).insert(record)
    }

    fn find_by_id(&self, id: JobRecordId) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).find_by_id(id)
    }

    fn find_in_flight_by_name(&self, name: &str) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).find_in_flight_by_name(name)
    }

    fn find_unique_in_flight_by_name(
        &self,
        name: &str,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).find_unique_in_flight_by_name(name)
    }

    fn update(&self, id: JobRecordId, update: JobRecordUpdate) -> Result<(), JobStoreError> {
        (**self).update(id, update)
    }

    fn merge_data(&self, id: JobRecordId, partial: JsonValue) -> Result<(), JobStoreError> {
        (**self).merge_data(id, partial)
    }
}
