//! In-memory dispatcher for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::DEFAULT_CHANNEL;
use crate::jobs::JobSnapshot;

use super::{AsyncDispatcher, DispatchAck, DispatchError};

/// FIFO channels held in process memory.
///
/// - No IO
/// - Each channel is a FIFO; nothing is ordered across channels
/// - Consumers (e.g. `QueueWorker`) pull with `pop`
#[derive(Debug)]
pub struct InMemoryDispatcher {
    default_channel: String,
    channels: Mutex<HashMap<String, VecDeque<JobSnapshot>>>,
    next_receipt: AtomicU64,
}

impl InMemoryDispatcher {
    pub fn new() -> Self {
        Self::with_default_channel(DEFAULT_CHANNEL)
    }

    pub fn with_default_channel(channel: impl Into<String>) -> Self {
        Self {
            default_channel: channel.into(),
            channels: Mutex::new(HashMap::new()),
            next_receipt: AtomicU64::new(1),
        }
    }

    pub fn default_channel(&self) -> &str {
        &self.default_channel
    }

    /// Take the oldest payload from `channel`.
    pub fn pop(&self, channel: &str) -> Result<Option<JobSnapshot>, DispatchError> {
        let mut channels = self.channels.lock().map_err(|_| DispatchError::Poisoned)?;
        Ok(channels.get_mut(channel).and_then(VecDeque::pop_front))
    }

    /// Take the oldest payload from the first non-empty channel, in the order given.
    pub fn pop_any<S: AsRef<str>>(
        &self,
        channels: &[S],
    ) -> Result<Option<(String, JobSnapshot)>, DispatchError> {
        let mut queues = self.channels.lock().map_err(|_| DispatchError::Poisoned)?;
        for channel in channels {
            let channel = channel.as_ref();
            if let Some(payload) = queues.get_mut(channel).and_then(VecDeque::pop_front) {
                return Ok(Some((channel.to_string(), payload)));
            }
        }
        Ok(None)
    }

    pub fn len(&self, channel: &str) -> Result<usize, DispatchError> {
        let channels = self.channels.lock().map_err(|_| DispatchError::Poisoned)?;
        Ok(channels.get(channel).map_or(0, VecDeque::len))
    }

    pub fn is_empty(&self) -> Result<bool, DispatchError> {
        let channels = self.channels.lock().map_err(|_| DispatchError::Poisoned)?;
        Ok(channels.values().all(VecDeque::is_empty))
    }

    /// Names of channels that have ever received a payload.
    pub fn channel_names(&self) -> Result<Vec<String>, DispatchError> {
        let channels = self.channels.lock().map_err(|_| DispatchError::Poisoned)?;
        let mut names: Vec<_> = channels.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl Default for InMemoryDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncDispatcher for InMemoryDispatcher {
    fn dispatch_to_queue(
        &self,
        channel: Option<&str>,
        payload: JobSnapshot,
    ) -> Result<DispatchAck, DispatchError> {
        let channel = channel.unwrap_or(&self.default_channel).to_string();
        let receipt = self.next_receipt.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.channels.lock().map_err(|_| DispatchError::Poisoned)?;
        channels.entry(channel.clone()).or_default().push_back(payload);

        Ok(DispatchAck {
            channel,
            receipt: receipt.to_string(),
        })
    }
}
