// =============================================================================
// FilterSandbox — isolated evaluation of user filter programs
// =============================================================================
//
// One evaluation = one filter program against one symbol's market snapshot,
// under a wall-clock deadline. The sandbox exposes a curated indicator
// stdlib and nothing else: no network, no filesystem, no clock beyond the
// snapshot's `now`, no spawning. Safe for concurrent use; programs carry no
// cross-call state.
//
// The evaluator is a build-time choice behind the trait; this build embeds
// the "expr" tree-walking interpreter.
// =============================================================================

pub mod builtins;
pub mod eval;
pub mod parser;

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::engine::snapshot::MarketSnapshot;
use crate::error::TaskError;
use crate::indicators::{self, IndicatorKind};
use crate::sandbox::eval::{EvalError, Value};
use crate::trader::FilterSpec;

/// The enumerated set of filter languages this build understands.
pub const SUPPORTED_LANGUAGES: &[&str] = &["expr"];

/// Outcome of one filter evaluation.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub matched: bool,
    /// Best-effort indicator telemetry, populated only on a match. A
    /// telemetry failure never fails the match.
    pub indicator_data: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    #[error("unsupported filter language: {0}")]
    UnsupportedLanguage(String),

    #[error("filter parse error: {0}")]
    Parse(String),

    #[error("filter evaluation timed out after {0} ms")]
    Timeout(u64),

    #[error("unknown indicator function: {0}")]
    UnknownIndicator(String),

    #[error("filter evaluation failed: {0}")]
    Eval(String),
}

impl SandboxError {
    /// Fold into the per-symbol task error taxonomy.
    pub fn into_task_error(self) -> TaskError {
        match self {
            SandboxError::UnsupportedLanguage(lang) => TaskError::UnsupportedLanguage(lang),
            SandboxError::Timeout(ms) => TaskError::EvaluationTimeout(ms),
            SandboxError::UnknownIndicator(name) => TaskError::UnknownIndicator(name),
            SandboxError::Parse(msg) | SandboxError::Eval(msg) => TaskError::Evaluation(msg),
        }
    }
}

/// Evaluates one trader's filter against one symbol's snapshot.
pub trait FilterSandbox: Send + Sync {
    fn evaluate(
        &self,
        filter: &FilterSpec,
        snapshot: &MarketSnapshot,
        timeout: Duration,
    ) -> Result<Verdict, SandboxError>;

    /// Symbol-independent pre-flight check of language and program shape.
    /// Rejection marks the trader misconfigured before any data is fetched.
    fn validate(&self, filter: &FilterSpec) -> Result<(), SandboxError>;
}

// =============================================================================
// ExprSandbox
// =============================================================================

/// The embedded "expr" interpreter. Stateless; one instance serves all
/// workers concurrently.
#[derive(Debug, Default)]
pub struct ExprSandbox;

impl ExprSandbox {
    pub fn new() -> Self {
        Self
    }
}

impl FilterSandbox for ExprSandbox {
    fn evaluate(
        &self,
        filter: &FilterSpec,
        snapshot: &MarketSnapshot,
        timeout: Duration,
    ) -> Result<Verdict, SandboxError> {
        if !SUPPORTED_LANGUAGES.contains(&filter.language.as_str()) {
            return Err(SandboxError::UnsupportedLanguage(filter.language.clone()));
        }

        // Per-program state is scoped to this evaluation: parse fresh.
        let program =
            parser::parse(&filter.code).map_err(|e| SandboxError::Parse(e.to_string()))?;

        let result = eval::evaluate_program(&program, snapshot, timeout).map_err(|e| match e {
            EvalError::Timeout => SandboxError::Timeout(timeout.as_millis() as u64),
            EvalError::UnknownFunction(name) => SandboxError::UnknownIndicator(name),
            EvalError::FuelExhausted | EvalError::Message(_) => SandboxError::Eval(e.to_string()),
        })?;

        let matched = match result {
            Value::Bool(b) => b,
            other => {
                return Err(SandboxError::Eval(format!(
                    "filter must produce a boolean, got {}",
                    other.type_name()
                )))
            }
        };

        let indicator_data = if matched {
            capture_telemetry(&filter.indicators, snapshot, filter.interval)
        } else {
            None
        };

        Ok(Verdict {
            matched,
            indicator_data,
        })
    }

    fn validate(&self, filter: &FilterSpec) -> Result<(), SandboxError> {
        if !SUPPORTED_LANGUAGES.contains(&filter.language.as_str()) {
            return Err(SandboxError::UnsupportedLanguage(filter.language.clone()));
        }
        parser::parse(&filter.code)
            .map(|_| ())
            .map_err(|e| SandboxError::Parse(e.to_string()))
    }
}

/// Compute declared-indicator telemetry on the primary interval.
/// Best-effort: anything that cannot be computed is simply omitted.
fn capture_telemetry(
    kinds: &[IndicatorKind],
    snapshot: &MarketSnapshot,
    primary: crate::types::Interval,
) -> Option<serde_json::Map<String, serde_json::Value>> {
    if kinds.is_empty() {
        return None;
    }

    let candles = snapshot.klines.get(&primary)?;

    let mut map = serde_json::Map::new();
    for kind in kinds {
        match indicators::default_reading(*kind, candles) {
            Some(reading) => match serde_json::to_value(&reading) {
                Ok(value) => {
                    map.insert(kind.as_str().to_string(), value);
                }
                Err(e) => {
                    debug!(indicator = %kind, error = %e, "telemetry serialisation failed");
                }
            },
            None => {
                debug!(indicator = %kind, symbol = %snapshot.symbol, "telemetry unavailable");
            }
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}
