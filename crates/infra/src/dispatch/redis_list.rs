//! Redis list-backed dispatcher.
//!
//! Each channel is a Redis list at `{key_prefix}:{channel}`. Dispatch is an
//! `LPUSH` of the JSON-encoded `JobSnapshot`; consumers pop from the other end
//! (`BRPOP`), which gives FIFO per channel. Consumers live outside this crate.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::jobs::JobSnapshot;

use super::{AsyncDispatcher, DispatchAck, DispatchError};

/// Default key prefix for channel lists
const DEFAULT_KEY_PREFIX: &str = "jobtrack:queue";

#[derive(Debug, Clone)]
pub struct RedisListDispatcher {
    client: Arc<redis::Client>,
    key_prefix: String,
    default_channel: String,
}

impl RedisListDispatcher {
    /// Create a dispatcher for `redis_url` (e.g. "redis://localhost:6379").
    pub fn new(
        redis_url: impl AsRef<str>,
        default_channel: impl Into<String>,
        key_prefix: Option<String>,
    ) -> Result<Self, DispatchError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            key_prefix: key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            default_channel: default_channel.into(),
        })
    }

    /// Redis key of the list backing `channel`.
    pub fn list_key(&self, channel: &str) -> String {
        format!("{}:{}", self.key_prefix, channel)
    }
}

impl AsyncDispatcher for RedisListDispatcher {
    #[instrument(skip(self, payload), fields(job_type = %payload.job_type), err)]
    fn dispatch_to_queue(
        &self,
        channel: Option<&str>,
        payload: JobSnapshot,
    ) -> Result<DispatchAck, DispatchError> {
        let channel = channel.unwrap_or(&self.default_channel).to_string();
        let key = self.list_key(&channel);
        let body =
            serde_json::to_string(&payload).map_err(|e| DispatchError::Encode(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let length: i64 = redis::cmd("LPUSH")
            .arg(&key)
            .arg(body)
            .query(&mut conn)
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        debug!(key = %key, length, "job pushed to redis list");

        Ok(DispatchAck {
            channel,
            receipt: length.to_string(),
        })
    }
}
