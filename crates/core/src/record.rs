//! The persisted job record and the write shapes stores accept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::JobRecordId;

/// Link from a job record to the business record it works on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelatedRecord {
    pub table: String,
    pub record_id: String,
}

impl RelatedRecord {
    pub fn new(table: impl Into<String>, record_id: impl ToString) -> Self {
        Self {
            table: table.into(),
            record_id: record_id.to_string(),
        }
    }
}

/// Coarse status derived from a record's completion columns.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRecordStatus {
    InFlight,
    Succeeded,
    Failed,
}

/// One tracked execution attempt of a job.
///
/// Rows are inserted once, completed once, and never deleted by the job
/// subsystem. A retry always produces a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobRecordId,
    /// Resolved job name; the deduplication key.
    pub name: String,
    pub queued_at: DateTime<Utc>,
    pub related_table: Option<String>,
    pub related_record_id: Option<String>,
    /// Free-form job data. Only ever replaced wholesale or shallow-merged.
    #[serde(default)]
    pub data: JsonValue,
    /// Durable job snapshot used for requeue/rerun (only when payload storage is on).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialized_payload: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub feedback: Option<String>,
    pub service: Option<String>,
    /// Whether the store must reject another in-flight record with this name.
    #[serde(default)]
    pub unique_in_flight: bool,
}

impl JobRecord {
    /// In-flight means "not completed": no completion time, or the zero sentinel.
    pub fn is_in_flight(&self) -> bool {
        self.completed_at.is_none_or(is_zero_sentinel)
    }

    pub fn is_completed(&self) -> bool {
        !self.is_in_flight()
    }

    pub fn status(&self) -> JobRecordStatus {
        if self.is_in_flight() {
            JobRecordStatus::InFlight
        } else if self.success == Some(true) {
            JobRecordStatus::Succeeded
        } else {
            JobRecordStatus::Failed
        }
    }

    pub fn related(&self) -> Option<RelatedRecord> {
        match (&self.related_table, &self.related_record_id) {
            (Some(table), Some(record_id)) => Some(RelatedRecord {
                table: table.clone(),
                record_id: record_id.clone(),
            }),
            _ => None,
        }
    }

    /// Apply an update in place (used by stores without native JSON operators).
    pub fn apply(&mut self, update: JobRecordUpdate) {
        if let Some(completion) = update.completion {
            self.completed_at = Some(completion.completed_at);
            self.success = Some(completion.success);
            self.feedback = Some(completion.feedback);
        }
        match update.data {
            Some(DataUpdate::Replace(data)) => self.data = data,
            Some(DataUpdate::Merge(partial)) => merge_json(&mut self.data, partial),
            None => {}
        }
    }
}

/// Legacy writers mark "not completed" with the Unix epoch instead of NULL.
pub fn is_zero_sentinel(at: DateTime<Utc>) -> bool {
    at.timestamp() == 0 && at.timestamp_subsec_nanos() == 0
}

/// Shallow-merge `partial` into `target`.
///
/// Object into object merges top-level keys (later wins); anything else
/// replaces the target outright.
pub fn merge_json(target: &mut JsonValue, partial: JsonValue) {
    match (target, partial) {
        (JsonValue::Object(existing), JsonValue::Object(incoming)) => {
            existing.extend(incoming);
        }
        (target, partial) => *target = partial,
    }
}

/// Fields for a record about to be inserted. The store mints the id and
/// `queued_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobRecord {
    pub name: String,
    pub related: Option<RelatedRecord>,
    pub data: JsonValue,
    pub serialized_payload: Option<String>,
    pub service: Option<String>,
    pub unique_in_flight: bool,
}

impl NewJobRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            related: None,
            data: JsonValue::Null,
            serialized_payload: None,
            service: None,
            unique_in_flight: false,
        }
    }

    pub fn unique_in_flight(mut self, unique: bool) -> Self {
        self.unique_in_flight = unique;
        self
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    pub fn into_record(self, id: JobRecordId, queued_at: DateTime<Utc>) -> JobRecord {
        let (related_table, related_record_id) = match self.related {
            Some(related) => (Some(related.table), Some(related.record_id)),
            None => (None, None),
        };
        JobRecord {
            id,
            name: self.name,
            queued_at,
            related_table,
            related_record_id,
            data: self.data,
            serialized_payload: self.serialized_payload,
            completed_at: None,
            success: None,
            feedback: None,
            service: self.service,
            unique_in_flight: self.unique_in_flight,
        }
    }
}

/// Completion columns, written once when a job reports its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCompletion {
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub feedback: String,
}

impl JobCompletion {
    pub fn now(success: bool, feedback: impl Into<String>) -> Self {
        Self {
            completed_at: Utc::now(),
            success,
            feedback: feedback.into(),
        }
    }
}

/// How an update touches the `data` column.
#[derive(Debug, Clone, PartialEq)]
pub enum DataUpdate {
    Replace(JsonValue),
    Merge(JsonValue),
}

/// A partial update of a record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobRecordUpdate {
    pub completion: Option<JobCompletion>,
    pub data: Option<DataUpdate>,
}

impl JobRecordUpdate {
    pub fn complete(completion: JobCompletion) -> Self {
        Self {
            completion: Some(completion),
            data: None,
        }
    }

    pub fn replace_data(data: JsonValue) -> Self {
        Self {
            completion: None,
            data: Some(DataUpdate::Replace(data)),
        }
    }

    pub fn merge_data(partial: JsonValue) -> Self {
        Self {
            completion: None,
            data: Some(DataUpdate::Merge(partial)),
        }
    }

    pub fn with_merged_data(mut self, partial: Option<JsonValue>) -> Self {
        if let Some(partial) = partial {
            self.data = Some(DataUpdate::Merge(partial));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> JobRecord {
        NewJobRecord::new("import_42").into_record(JobRecordId::new(), Utc::now())
    }

    #[test]
    fn fresh_record_is_in_flight() {
        let r = record();
        assert!(r.is_in_flight());
        assert_eq!(r.status(), JobRecordStatus::InFlight);
    }

    #[test]
    fn zero_sentinel_counts_as_in_flight() {
        let mut r = record();
        r.completed_at = DateTime::from_timestamp(0, 0);
        assert!(r.is_in_flight());
    }

    #[test]
    fn completion_sets_status() {
        let mut r = record();
        r.apply(JobRecordUpdate::complete(JobCompletion::now(false, "boom")));
        assert!(r.is_completed());
        assert_eq!(r.status(), JobRecordStatus::Failed);
        assert_eq!(r.feedback.as_deref(), Some("boom"));
    }

    #[test]
    fn merge_keeps_existing_keys() {
        let mut data = json!({"rows": 10, "file": "a.csv"});
        merge_json(&mut data, json!({"rows": 12, "errors": []}));
        assert_eq!(data, json!({"rows": 12, "file": "a.csv", "errors": []}));
    }

    #[test]
    fn merge_into_non_object_replaces() {
        let mut data = JsonValue::Null;
        merge_json(&mut data, json!({"rows": 1}));
        assert_eq!(data, json!({"rows": 1}));
    }

    #[test]
    fn related_requires_both_columns() {
        let mut r = record();
        r.related_table = Some("invoices".into());
        assert_eq!(r.related(), None);
        r.related_record_id = Some("17".into());
        assert_eq!(r.related(), Some(RelatedRecord::new("invoices", 17)));
    }
}
