//! Tracing setup and the error reporter jobs log through.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, formats).
pub mod tracing;

/// Context-carrying reporter used by the job subsystem.
pub mod reporter;

pub use reporter::{ContextGuard, ErrorReporter, ReportContext, ReportKind};
