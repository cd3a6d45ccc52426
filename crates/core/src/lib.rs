//! `jobtrack-core`: job record model and naming primitives.
//!
//! This crate contains the **pure** parts of the job subsystem (no IO): the
//! persisted `JobRecord` shape, its identifier, and the name templates jobs use
//! to build their deduplication keys.

pub mod error;
pub mod id;
pub mod name;
pub mod record;

pub use error::{CoreError, CoreResult};
pub use id::JobRecordId;
pub use name::NameTemplate;
pub use record::{
    DataUpdate, JobCompletion, JobRecord, JobRecordStatus, JobRecordUpdate, NewJobRecord,
    RelatedRecord, is_zero_sentinel, merge_json,
};
