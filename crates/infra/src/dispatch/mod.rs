//! Asynchronous dispatch boundary.
//!
//! The dispatcher is the hand-off point to whatever transport eventually runs
//! queued jobs out of process. The contract is deliberately thin:
//!
//! - **At-least-once**: a dispatched snapshot may be delivered more than once.
//! - **No ordering** across channels, and none promised within one.
//! - **Fire-and-forget**: the acknowledgment only says the transport accepted
//!   the payload, not that the job ran.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_list;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::jobs::JobSnapshot;

pub use in_memory::InMemoryDispatcher;
#[cfg(feature = "redis")]
pub use redis_list::RedisListDispatcher;

/// Transport acknowledgment for one dispatched job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchAck {
    /// Channel the payload was pushed to (after defaulting).
    pub channel: String,
    /// Transport-specific receipt (sequence number, queue length, message id).
    pub receipt: String,
}

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("dispatcher lock poisoned")]
    Poisoned,

    #[error("failed to encode job payload: {0}")]
    Encode(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Hands job snapshots to an asynchronous transport.
pub trait AsyncDispatcher: Send + Sync {
    /// Push `payload` to `channel`, or to the dispatcher's default channel.
    fn dispatch_to_queue(
        &self,
        channel: Option<&str>,
        payload: JobSnapshot,
    ) -> Result<DispatchAck, DispatchError>;
}

impl<D> AsyncDispatcher for Arc<D>
where
    D: AsyncDispatcher + ?Sized,
{
    fn dispatch_to_queue(
        &self,
        channel: Option<&str>,
        payload: JobSnapshot,
    ) -> Result<DispatchAck, DispatchError> {
        (**self).dispatch_to_queue(channel, payload)
    }
}
