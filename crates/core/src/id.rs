//! Strongly-typed job record identifier.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Identifier of a job record.
///
/// Minted by the record store on insert and handed out to callers as the
/// tracking id, so it is the only handle a poller ever sees.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobRecordId(Uuid);

impl JobRecordId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered) so ids sort roughly by queue time.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for JobRecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for JobRecordId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<JobRecordId> for Uuid {
    fn from(value: JobRecordId) -> Self {
        value.0
    }
}

impl FromStr for JobRecordId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| CoreError::invalid_id(format!("JobRecordId: {e}")))?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_its_own_display_output() {
        let id = JobRecordId::new();
        let parsed: JobRecordId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_garbage() {
        let err = "not-a-uuid".parse::<JobRecordId>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidId(msg) if msg.starts_with("JobRecordId")));
    }
}
