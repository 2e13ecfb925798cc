// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Errors are classified by how far they propagate:
//   - Skip:             confined to one symbol's task within a run
//   - Transient:        retried once (store writes) or left to the next run
//   - Fatal:            fails the whole run
//   - Cancelled:        engine shutdown; distinguished from Failed, no alarm
//   - Misconfiguration: the trader itself is broken; surfaced via metrics
// =============================================================================

use serde::Serialize;
use thiserror::Error;

use crate::types::Interval;

/// Coarse classification used for dispatch decisions (retry, auto-pause).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Transient,
    Skip,
    Fatal,
    Cancelled,
    Misconfiguration,
}

// =============================================================================
// Per-symbol task errors
// =============================================================================

/// Error produced by a single symbol's task within a run. Never aborts the
/// pass; recorded in `ExecutionResult.errors`.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("insufficient history on {interval}: have {got}, need {need}")]
    InsufficientHistory {
        interval: Interval,
        got: usize,
        need: usize,
    },

    #[error("kline fetch failed: {0}")]
    KlineFetch(String),

    #[error("ticker unavailable for symbol")]
    TickerUnavailable,

    #[error("filter evaluation timed out after {0} ms")]
    EvaluationTimeout(u64),

    #[error("filter evaluation failed: {0}")]
    Evaluation(String),

    #[error("unsupported filter language: {0}")]
    UnsupportedLanguage(String),

    #[error("unknown indicator: {0}")]
    UnknownIndicator(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::InsufficientHistory { .. }
            | TaskError::KlineFetch(_)
            | TaskError::TickerUnavailable
            | TaskError::EvaluationTimeout(_)
            | TaskError::Evaluation(_)
            | TaskError::Panicked(_) => ErrorKind::Skip,
            TaskError::UnsupportedLanguage(_) | TaskError::UnknownIndicator(_) => {
                ErrorKind::Misconfiguration
            }
            TaskError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

// =============================================================================
// Fatal run errors
// =============================================================================

/// Error that fails an entire run. Signals already gathered in memory are
/// still returned to the caller but are considered unpersisted.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("symbol universe provider unavailable: {0}")]
    Universe(String),

    #[error("ticker batch and all per-symbol fallbacks failed: {0}")]
    Tickers(String),

    #[error("signal store batch write failed: {0}")]
    Store(String),

    #[error("trader filter rejected at validation: {0}")]
    Misconfigured(String),

    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Cancelled => ErrorKind::Cancelled,
            RunError::Misconfigured(_) => ErrorKind::Misconfiguration,
            _ => ErrorKind::Fatal,
        }
    }

    /// Stable discriminant used by the dispatcher's consecutive-failure
    /// streak tracking.
    pub fn streak_key(&self) -> &'static str {
        match self {
            RunError::Universe(_) => "universe",
            RunError::Tickers(_) => "tickers",
            RunError::Store(_) => "store",
            RunError::Misconfigured(_) => "misconfiguration",
            RunError::Cancelled => "cancelled",
        }
    }
}
