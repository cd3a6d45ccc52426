//! Error reporter with a mutable "current context".
//!
//! The context says which business record subsequent log lines belong to. It
//! is shared by every clone of an `ErrorReporter`, so code deep inside a job can
//! attribute its logs without threading the record through each call.
//!
//! Code that runs someone else's work in-line (e.g. a nested job) must not leak
//! context changes back to its caller; `preserve_context` returns a guard that
//! puts the saved context back when dropped, on every exit path.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value as JsonValue;

/// What subsequent log lines are attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportContext {
    pub related_table: Option<String>,
    pub related_record_id: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl ReportContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_record(table: impl Into<String>, record_id: impl ToString) -> Self {
        Self {
            related_table: Some(table.into()),
            related_record_id: Some(record_id.to_string()),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.related_table.is_none() && self.related_record_id.is_none() && self.tags.is_empty()
    }
}

/// Severity of a reported entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Info,
    Warning,
    Error,
}

/// Structured reporter backed by `tracing`.
#[derive(Debug, Clone, Default)]
pub struct ErrorReporter {
    current: Arc<Mutex<ReportContext>>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_context(&self) -> ReportContext {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_current_context(&self, context: ReportContext) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = context;
    }

    pub fn clear_current_context(&self) {
        self.set_current_context(ReportContext::none());
    }

    /// Save the current context; it is restored when the guard drops.
    pub fn preserve_context(&self) -> ContextGuard<'_> {
        ContextGuard {
            reporter: self,
            saved: Some(self.current_context()),
        }
    }

    /// Emit one entry, attributed to the current context.
    pub fn log(&self, kind: ReportKind, message: &str, fields: &JsonValue) {
        let context = self.current_context();
        let related_table = context.related_table.as_deref().unwrap_or("");
        let related_record_id = context.related_record_id.as_deref().unwrap_or("");
        let tags = if context.tags.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&context.tags).unwrap_or_default()
        };

        match kind {
            ReportKind::Info => ::tracing::info!(
                related_table,
                related_record_id,
                tags = %tags,
                fields = %fields,
                "{message}"
            ),
            ReportKind::Warning => ::tracing::warn!(
                related_table,
                related_record_id,
                tags = %tags,
                fields = %fields,
                "{message}"
            ),
            ReportKind::Error => ::tracing::error!(
                related_table,
                related_record_id,
                tags = %tags,
                fields = %fields,
                "{message}"
            ),
        }
    }
}

/// Restores a saved reporter context on drop.
#[derive(Debug)]
#[must_use = "the context is restored when the guard is dropped"]
pub struct ContextGuard<'a> {
    reporter: &'a ErrorReporter,
    saved: Option<ReportContext>,
}

impl ContextGuard<'_> {
    /// The context that will be restored.
    pub fn saved(&self) -> Option<&ReportContext> {
        self.saved.as_ref()
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.reporter.set_current_context(saved);
        }
    }
}
