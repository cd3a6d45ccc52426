//! In-memory job record store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use jobtrack_core::{JobRecord, JobRecordId, JobRecordUpdate, NewJobRecord};

use super::r#trait::{JobRecordStore, JobStoreError};

/// In-memory store.
///
/// The dedup check and the insert happen under a single write lock, which is
/// the in-memory equivalent of the partial unique index the Postgres store
/// relies on.
#[derive(Debug, Default)]
pub struct InMemoryJobRecordStore {
    records: RwLock<HashMap<JobRecordId, JobRecord>>,
}

impl InMemoryJobRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// All records with this name, oldest first.
    pub fn records_named(&self, name: &str) -> Result<Vec<JobRecord>, JobStoreError> {
        let records = self.read()?;
        let mut found: Vec<_> = records.values().filter(|r| r.name == name).cloned().collect();
        found.sort_by_key(|r| (r.queued_at, r.id));
        Ok(found)
    }

    pub fn len(&self) -> Result<usize, JobStoreError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, JobStoreError> {
        Ok(self.read()?.is_empty())
    }

    fn oldest_in_flight(
        &self,
        name: &str,
        unique_only: bool,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        let records = self.read()?;
        Ok(records
            .values()
            .filter(|r| r.name == name && r.is_in_flight())
            .filter(|r| !unique_only || r.unique_in_flight)
            .min_by_key(|r| (r.queued_at, r.id))
            .cloned())
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<JobRecordId, JobRecord>>, JobStoreError>
    {
        self.records
            .read()
            .map_err(|_| JobStoreError::Storage("job record lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<JobRecordId, JobRecord>>, JobStoreError>
    {
        self.records
            .write()
            .map_err(|_| JobStoreError::Storage("job record lock poisoned".to_string()))
    }
}

impl JobRecordStore for InMemoryJobRecordStore {
    fn insert(&self, record: NewJobRecord) -> Result<JobRecordId, JobStoreError> {
        let mut records = self.write()?;

        if record.unique_in_flight {
            let clash = records.values().any(|existing| {
                existing.unique_in_flight && existing.name == record.name && existing.is_in_flight()
            });
            if clash {
                return Err(JobStoreError::DuplicateInFlight { name: record.name });
            }
        }

        let id = JobRecordId::new();
        records.insert(id, record.into_record(id, Utc::now()));
        Ok(id)
    }

    fn find_by_id(&self, id: JobRecordId) -> Result<Option<JobRecord>, JobStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    fn find_in_flight_by_name(&self, name: &str) -> Result<Option<JobRecord>, JobStoreError> {
        self.oldest_in_flight(name, false)
    }

    fn find_unique_in_flight_by_name(
        &self,
        name: &str,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        self.oldest_in_flight(name, true)
    }

    fn update(&self, id: JobRecordId, update: JobRecordUpdate) -> Result<(), JobStoreError> {
        let mut records = self.write()?;
        let record = records.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        record.apply(update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobtrack_core::JobCompletion;
    use serde_json::json;

    #[test]
    fn insert_and_find() {
        let store = InMemoryJobRecordStore::new();
        let id = store
            .insert(NewJobRecord::new("import_42").with_data(json!({"rows": 0})))
            .unwrap();

        let record = store.find_by_id(id).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.name, "import_42");
        assert_eq!(record.data, json!({"rows": 0}));
        assert!(record.is_in_flight());

        assert!(store.find_by_id(JobRecordId::new()).unwrap().is_none());
    }

    #[test]
    fn unique_in_flight_rejects_second_insert() {
        let store = InMemoryJobRecordStore::new();
        store
            .insert(NewJobRecord::new("import_42").unique_in_flight(true))
            .unwrap();

        let err = store
            .insert(NewJobRecord::new("import_42").unique_in_flight(true))
            .unwrap_err();
        assert!(matches!(err, JobStoreError::DuplicateInFlight { name } if name == "import_42"));
        assert_eq!(store.records_named("import_42").unwrap().len(), 1);
    }

    #[test]
    fn non_unique_records_may_share_a_name() {
        let store = InMemoryJobRecordStore::new();
        store
            .insert(NewJobRecord::new("nightly").unique_in_flight(true))
            .unwrap();
        store.insert(NewJobRecord::new("nightly")).unwrap();
        store.insert(NewJobRecord::new("nightly")).unwrap();
        assert_eq!(store.records_named("nightly").unwrap().len(), 3);
    }

    #[test]
    fn unique_lookup_skips_non_unique_rows() {
        let store = InMemoryJobRecordStore::new();
        let plain = store.insert(NewJobRecord::new("nightly")).unwrap();
        assert_eq!(
            store.find_in_flight_by_name("nightly").unwrap().map(|r| r.id),
            Some(plain)
        );
        assert!(store.find_unique_in_flight_by_name("nightly").unwrap().is_none());

        let unique = store
            .insert(NewJobRecord::new("nightly").unique_in_flight(true))
            .unwrap();
        assert_eq!(
            store
                .find_unique_in_flight_by_name("nightly")
                .unwrap()
                .map(|r| r.id),
            Some(unique)
        );
    }

    #[test]
    fn completion_frees_the_name() {
        let store = InMemoryJobRecordStore::new();
        let first = store
            .insert(NewJobRecord::new("import_42").unique_in_flight(true))
            .unwrap();
        store
            .update(first, JobRecordUpdate::complete(JobCompletion::now(true, "done")))
            .unwrap();

        assert!(store.find_in_flight_by_name("import_42").unwrap().is_none());
        let second = store
            .insert(NewJobRecord::new("import_42").unique_in_flight(true))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(
            store.find_in_flight_by_name("import_42").unwrap().map(|r| r.id),
            Some(second)
        );
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let store = InMemoryJobRecordStore::new();
        let id = JobRecordId::new();
        let err = store
            .update(id, JobRecordUpdate::replace_data(json!({})))
            .unwrap_err();
        assert!(matches!(err, JobStoreError::NotFound(missing) if missing == id));
    }

    #[test]
    fn merge_data_is_shallow() {
        let store = InMemoryJobRecordStore::new();
        let id = store
            .insert(NewJobRecord::new("export").with_data(json!({"a": 1, "b": {"x": 1}})))
            .unwrap();

        store.merge_data(id, json!({"b": {"y": 2}, "c": 3})).unwrap();

        let record = store.find_by_id(id).unwrap().unwrap();
        assert_eq!(record.data, json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }

    #[test]
    fn concurrent_unique_inserts_admit_exactly_one() {
        let store = InMemoryJobRecordStore::arc();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.insert(NewJobRecord::new("import_42").unique_in_flight(true))
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count();

        assert_eq!(admitted, 1);
        assert_eq!(store.records_named("import_42").unwrap().len(), 1);
    }
}
