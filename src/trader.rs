// =============================================================================
// Trader — a user-authored screening strategy
// =============================================================================
//
// A trader couples a filter program (evaluated by the sandbox on every
// matching candle close) with opaque strategy metadata handed to the
// downstream analysis pipeline. The user owns `filter` and `strategy`; the
// engine owns `metrics` and is the only writer of that block.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorKind;
use crate::types::Interval;

fn default_language() -> String {
    "expr".to_string()
}

/// Filter program plus the data requirements it declares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Filter language name from the enumerated set understood by the
    /// sandbox. Unknown names are rejected at evaluation time.
    #[serde(default = "default_language")]
    pub language: String,

    /// The filter program source.
    pub code: String,

    /// Primary interval: the candle-close events this trader subscribes to.
    pub interval: Interval,

    /// Additional read-only context timeframes the filter may reference.
    #[serde(default)]
    pub required_timeframes: Vec<Interval>,

    /// Indicators to capture as telemetry alongside a matching signal.
    #[serde(default)]
    pub indicators: Vec<IndicatorKind>,

    /// Candle history the filter wants per interval. The snapshot builder
    /// requests `max(lookback, default_kline_lookback)`.
    #[serde(default)]
    pub lookback: Option<usize>,

    /// Minimum closed candles required on every interval before the filter
    /// is evaluated at all. Short history skips the symbol.
    #[serde(default)]
    pub min_history: Option<usize>,
}

impl FilterSpec {
    /// Primary interval plus declared extra timeframes, deduplicated, with
    /// the primary always first.
    pub fn required_intervals(&self) -> Vec<Interval> {
        let mut out = vec![self.interval];
        for iv in &self.required_timeframes {
            if !out.contains(iv) {
                out.push(*iv);
            }
        }
        out
    }

    /// Effective minimum history (at least one closed candle).
    pub fn effective_min_history(&self) -> usize {
        self.min_history.unwrap_or(1).max(1)
    }
}

/// Opaque strategy metadata passed through to the analysis pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategySpec {
    #[serde(default)]
    pub instructions: String,

    #[serde(default)]
    pub model_tier: String,

    /// Anything else the analysis side understands; the engine never looks
    /// inside.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Engine-owned run statistics for one trader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraderMetrics {
    #[serde(default)]
    pub executions: u64,
    #[serde(default)]
    pub signals: u64,
    #[serde(default)]
    pub last_run_at: Option<i64>,
    #[serde(default)]
    pub avg_duration_ms: f64,
    #[serde(default)]
    pub error_count: u64,
}

/// Smoothing factor for the rolling average run duration.
const AVG_DURATION_ALPHA: f64 = 0.2;

impl TraderMetrics {
    /// Fold one run's delta into the metrics block. `executions` and
    /// `signals` are monotonically non-decreasing.
    pub fn apply(&mut self, delta: &MetricsDelta) {
        self.executions += delta.executions;
        self.signals += delta.signals;
        self.error_count += delta.errors;
        self.last_run_at = Some(delta.last_run_at);

        let duration = delta.duration_ms as f64;
        if self.avg_duration_ms == 0.0 {
            self.avg_duration_ms = duration;
        } else {
            self.avg_duration_ms =
                AVG_DURATION_ALPHA * duration + (1.0 - AVG_DURATION_ALPHA) * self.avg_duration_ms;
        }
    }
}

/// Per-run metrics update produced by the executor's Reporting phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsDelta {
    pub executions: u64,
    pub signals: u64,
    pub errors: u64,
    pub last_run_at: i64,
    pub duration_ms: i64,
}

/// A user-authored screening strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trader {
    pub id: String,

    /// None marks a built-in, system-owned trader.
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub is_built_in: bool,

    pub filter: FilterSpec,

    #[serde(default)]
    pub strategy: StrategySpec,

    #[serde(default)]
    pub metrics: TraderMetrics,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn filter(interval: Interval, extra: &[Interval]) -> FilterSpec {
        FilterSpec {
            language: "expr".into(),
            code: "true".into(),
            interval,
            required_timeframes: extra.to_vec(),
            indicators: Vec::new(),
            lookback: None,
            min_history: None,
        }
    }

    #[test]
    fn required_intervals_dedups_and_keeps_primary_first() {
        let f = filter(Interval::M5, &[Interval::H1, Interval::M5, Interval::H1]);
        assert_eq!(f.required_intervals(), vec![Interval::M5, Interval::H1]);
    }

    #[test]
    fn effective_min_history_floors_at_one() {
        let mut f = filter(Interval::M5, &[]);
        assert_eq!(f.effective_min_history(), 1);
        f.min_history = Some(0);
        assert_eq!(f.effective_min_history(), 1);
        f.min_history = Some(250);
        assert_eq!(f.effective_min_history(), 250);
    }

    #[test]
    fn metrics_apply_first_run_seeds_average() {
        let mut m = TraderMetrics::default();
        m.apply(&MetricsDelta {
            executions: 1,
            signals: 2,
            errors: 0,
            last_run_at: 1_700_000_100_000,
            duration_ms: 500,
        });
        assert_eq!(m.executions, 1);
        assert_eq!(m.signals, 2);
        assert_eq!(m.last_run_at, Some(1_700_000_100_000));
        assert!((m.avg_duration_ms - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_apply_smooths_duration() {
        let mut m = TraderMetrics::default();
        for d in [100, 200] {
            m.apply(&MetricsDelta {
                executions: 1,
                signals: 0,
                errors: 1,
                last_run_at: 0,
                duration_ms: d,
            });
        }
        assert_eq!(m.executions, 2);
        assert_eq!(m.error_count, 2);
        // 0.2 * 200 + 0.8 * 100 = 120
        assert!((m.avg_duration_ms - 120.0).abs() < 1e-10);
    }

    #[test]
    fn trader_deserialises_with_defaults() {
        let json = r#"{
            "id": "t-1",
            "filter": { "code": "last_close(klines[\"5m\"]) > 0", "interval": "5m" }
        }"#;
        let t: Trader = serde_json::from_str(json).unwrap();
        assert_eq!(t.id, "t-1");
        assert_eq!(t.filter.language, "expr");
        assert_eq!(t.filter.interval, Interval::M5);
        assert!(t.user_id.is_none());
        assert!(!t.enabled);
        assert_eq!(t.metrics.executions, 0);
    }
}
