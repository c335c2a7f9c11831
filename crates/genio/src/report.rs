use tracing::error;

/// Outcome class attached to a failure record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FailureStatus {
    /// Every attempt in the plan failed with a transient error.
    Exhausted,
}

/// One structured entry for the external logging collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Context label the caller attached to the dispatch.
    pub label: String,
    /// Truncated prompt/summary. Never the full request body.
    pub summary: String,
    pub error: String,
    pub attempts: usize,
    pub status: FailureStatus,
}

const SUMMARY_LIMIT: usize = 120;

impl FailureRecord {
    pub fn exhausted(
        label: impl Into<String>,
        summary: &str,
        error: impl Into<String>,
        attempts: usize,
    ) -> Self {
        Self {
            label: label.into(),
            summary: truncate(summary, SUMMARY_LIMIT),
            error: error.into(),
            attempts,
            status: FailureStatus::Exhausted,
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_owned();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{cut}…")
}

/// Fire-and-forget sink for failure records. Implementations must not block
/// the dispatch path or surface errors to it.
pub trait FailureSink: Send + Sync {
    fn record(&self, record: FailureRecord);
}

/// Default sink: one structured log line per record.
pub struct LogFailureSink;

impl FailureSink for LogFailureSink {
    fn record(&self, record: FailureRecord) {
        error!(
            label = %record.label,
            summary = %record.summary,
            cause = %record.error,
            attempts = record.attempts,
            status = ?record.status,
            "generation dispatch failed"
        );
    }
}
