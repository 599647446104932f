// src/error.rs
// Cycle-level error taxonomy. Every variant is recovered at the per-repository
// cycle boundary by the scheduler; none of them may take the process down.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CycleError {
    /// Ledger/context state file could not be written. The cycle aborts and
    /// nothing is marked processed, so a full retry is safe.
    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),

    /// Upstream API unavailable or rate-limited. The cycle is skipped and the
    /// fetch watermark is preserved.
    #[error("upstream unavailable: {0}")]
    Upstream(#[source] anyhow::Error),

    /// AI backend failure (timeout, non-2xx, malformed/empty response). No
    /// fingerprints are committed; the same items are retried next cycle.
    #[error("summarization failure: {0}")]
    Summarization(#[source] anyhow::Error),

    /// Malformed repository entry. The repository is excluded from scheduling
    /// until the config is corrected; others are unaffected.
    #[error("config error: {0}")]
    Config(String),
}

impl CycleError {
    /// Short stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Persistence(_) => "persistence",
            CycleError::Upstream(_) => "upstream",
            CycleError::Summarization(_) => "summarization",
            CycleError::Config(_) => "config",
        }
    }
}

pub type CycleResult<T> = Result<T, CycleError>;
