//! Job record persistence.
//!
//! One row per tracked execution attempt. The store is the only shared mutable
//! resource of the job subsystem, and the one place where "at most one
//! in-flight record per dedup name" is enforced atomically.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryJobRecordStore;
pub use postgres::PostgresJobRecordStore;
pub use r#trait::{JobRecordStore, JobStoreError};
