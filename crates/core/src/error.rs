//! Core error model.

use thiserror::Error;

/// Result type used across the core crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the pure job model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A name template referenced a placeholder no argument was given for.
    #[error("name template `{template}` has no value for placeholder `{placeholder}`")]
    MissingPlaceholder {
        template: String,
        placeholder: String,
    },

    /// A name template is syntactically broken (unclosed or empty braces).
    #[error("malformed name template `{0}`")]
    MalformedTemplate(String),
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn missing_placeholder(template: impl Into<String>, placeholder: impl Into<String>) -> Self {
        Self::MissingPlaceholder {
            template: template.into(),
            placeholder: placeholder.into(),
        }
    }
}
