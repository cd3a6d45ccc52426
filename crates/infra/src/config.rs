//! Job subsystem configuration.
//!
//! Loaded from environment variables with defaults for everything:
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `JOBS_STORE_PAYLOADS` | `true` | Persist job snapshots so records can be requeued/rerun |
//! | `JOBS_TRACKING_URL_BASE` | `/api/jobs` | Prefix of the tracking URL handed to callers |
//! | `JOBS_DEFAULT_CHANNEL` | `default` | Queue channel for jobs that don't name one |
//! | `JOBS_BATCH_FAILURE_POLICY` | `always_succeed` | Outcome of a batch whose members failed |

use thiserror::Error;

use crate::jobs::BatchFailurePolicy;

pub const ENV_STORE_PAYLOADS: &str = "JOBS_STORE_PAYLOADS";
pub const ENV_TRACKING_URL_BASE: &str = "JOBS_TRACKING_URL_BASE";
pub const ENV_DEFAULT_CHANNEL: &str = "JOBS_DEFAULT_CHANNEL";
pub const ENV_BATCH_FAILURE_POLICY: &str = "JOBS_BATCH_FAILURE_POLICY";

pub const DEFAULT_TRACKING_URL_BASE: &str = "/api/jobs";
pub const DEFAULT_CHANNEL: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}: expected a boolean flag, got `{value}`")]
    InvalidFlag { key: &'static str, value: String },

    #[error("{key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobsConfig {
    /// Whether job snapshots are written into `serialized_payload`.
    pub store_payloads: bool,
    pub tracking_url_base: String,
    pub default_channel: String,
    pub batch_failure_policy: BatchFailurePolicy,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            store_payloads: true,
            tracking_url_base: DEFAULT_TRACKING_URL_BASE.to_string(),
            default_channel: DEFAULT_CHANNEL.to_string(),
            batch_failure_policy: BatchFailurePolicy::default(),
        }
    }
}

impl JobsConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (tests, layered config sources).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_STORE_PAYLOADS) {
            config.store_payloads = parse_flag(&value).ok_or(ConfigError::InvalidFlag {
                key: ENV_STORE_PAYLOADS,
                value,
            })?;
        }

        if let Some(value) = lookup(ENV_TRACKING_URL_BASE) {
            config.tracking_url_base = value;
        }

        if let Some(value) = lookup(ENV_DEFAULT_CHANNEL) {
            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: ENV_DEFAULT_CHANNEL,
                    message: "channel name must not be empty".to_string(),
                });
            }
            config.default_channel = value;
        }

        if let Some(value) = lookup(ENV_BATCH_FAILURE_POLICY) {
            config.batch_failure_policy =
                value.parse().map_err(|message| ConfigError::InvalidValue {
                    key: ENV_BATCH_FAILURE_POLICY,
                    message,
                })?;
        }

        Ok(config)
    }

    pub fn with_store_payloads(mut self, store_payloads: bool) -> Self {
        self.store_payloads = store_payloads;
        self
    }

    pub fn with_tracking_url_base(mut self, base: impl Into<String>) -> Self {
        self.tracking_url_base = base.into();
        self
    }

    pub fn with_default_channel(mut self, channel: impl Into<String>) -> Self {
        self.default_channel = channel.into();
        self
    }

    pub fn with_batch_failure_policy(mut self, policy: BatchFailurePolicy) -> Self {
        self.batch_failure_policy = policy;
        self
    }

    /// Tracking URL for a record id rendered as a string.
    pub fn tracking_url(&self, id: impl core::fmt::Display) -> String {
        format!("{}/{}", self.tracking_url_base.trim_end_matches('/'), id)
    }
}

/// Boolean-ish flag parsing (`1/true/yes/on`, `0/false/no/off`, case-insensitive).
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
