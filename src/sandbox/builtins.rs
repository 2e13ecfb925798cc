// =============================================================================
// Filter DSL — builtin function registry
// =============================================================================
//
// The curated standard library available to filter programs. The set is
// closed: a call to anything else is UnknownFunction, surfaced as a
// misconfiguration. Builtins are pure; they walk snapshot data and charge the
// evaluation budget proportionally.
//
// Convention: `sma`, `ema`, `rsi`, `roc` return the latest value; their
// `*_series` variants return the full series for use with `crossed_above` /
// `crossed_below` / indexing.
// =============================================================================

use std::sync::Arc;

use crate::indicators::{atr, bollinger, ema, macd, roc, rsi, sma, stochastic, vwap};
use crate::sandbox::eval::{type_error, Budget, EvalError, Value};
use crate::types::Candle;

pub fn call(name: &str, args: &[Value], now: i64, budget: &mut Budget) -> Result<Value, EvalError> {
    match name {
        // --- candle accessors ------------------------------------------------
        "closes" => series_from(args, name, budget, |c| c.close),
        "opens" => series_from(args, name, budget, |c| c.open),
        "highs" => series_from(args, name, budget, |c| c.high),
        "lows" => series_from(args, name, budget, |c| c.low),
        "volumes" => series_from(args, name, budget, |c| c.volume),

        "last_close" => last_field(args, name, |c| c.close),
        "last_open" => last_field(args, name, |c| c.open),
        "last_high" => last_field(args, name, |c| c.high),
        "last_low" => last_field(args, name, |c| c.low),
        "last_volume" => last_field(args, name, |c| c.volume),

        "candle_count" | "len" => {
            arity(args, 1, name)?;
            match &args[0] {
                Value::Candles(c) => Ok(Value::Num(c.len() as f64)),
                Value::Series(s) => Ok(Value::Num(s.len() as f64)),
                other => Err(type_error("candles or series", other)),
            }
        }

        "change_pct" => {
            arity(args, 2, name)?;
            let values = to_series(&args[0], budget)?;
            let n = as_period(&args[1], name)?;
            if values.len() <= n {
                return Err(not_enough(name));
            }
            let base = values[values.len() - 1 - n];
            if base == 0.0 {
                return Err(EvalError::Message(format!("{name}: zero base value")));
            }
            Ok(Value::Num(
                (values[values.len() - 1] - base) / base * 100.0,
            ))
        }

        // --- series helpers --------------------------------------------------
        "last" => {
            arity(args, 1, name)?;
            let values = to_series(&args[0], budget)?;
            values.last().copied().map(Value::Num).ok_or_else(|| not_enough(name))
        }
        "prev" => {
            arity(args, 1, name)?;
            let values = to_series(&args[0], budget)?;
            if values.len() < 2 {
                return Err(not_enough(name));
            }
            Ok(Value::Num(values[values.len() - 2]))
        }
        "highest" => {
            arity(args, 2, name)?;
            window_fold(&args[0], &args[1], name, budget, f64::MIN, f64::max)
        }
        "lowest" => {
            arity(args, 2, name)?;
            window_fold(&args[0], &args[1], name, budget, f64::MAX, f64::min)
        }
        "crossed_above" => crossing(args, name, budget, true),
        "crossed_below" => crossing(args, name, budget, false),

        // --- indicators: latest value ---------------------------------------
        "sma" => latest_of(args, name, budget, sma::sma),
        "ema" => latest_of(args, name, budget, ema::ema),
        "rsi" => latest_of(args, name, budget, rsi::rsi),
        "roc" => latest_of(args, name, budget, roc::roc),

        // --- indicators: full series ----------------------------------------
        "sma_series" => series_of(args, name, budget, sma::sma),
        "ema_series" => series_of(args, name, budget, ema::ema),
        "rsi_series" => series_of(args, name, budget, rsi::rsi),
        "roc_series" => series_of(args, name, budget, roc::roc),

        // --- MACD -------------------------------------------------------------
        "macd" | "macd_signal" | "macd_hist" => {
            arity(args, 4, name)?;
            let values = to_series(&args[0], budget)?;
            let fast = as_period(&args[1], name)?;
            let slow = as_period(&args[2], name)?;
            let signal = as_period(&args[3], name)?;
            budget.charge(values.len() as u64)?;
            let m = macd::macd(&values, fast, slow, signal).ok_or_else(|| not_enough(name))?;
            let series = match name {
                "macd" => m.macd,
                "macd_signal" => m.signal,
                _ => m.histogram,
            };
            series.last().copied().map(Value::Num).ok_or_else(|| not_enough(name))
        }

        // --- Bollinger --------------------------------------------------------
        "bollinger_upper" | "bollinger_middle" | "bollinger_lower" | "bollinger_width" => {
            arity(args, 3, name)?;
            let values = to_series(&args[0], budget)?;
            let period = as_period(&args[1], name)?;
            let num_std = as_num(&args[2], name)?;
            budget.charge(period as u64)?;
            let bb = bollinger::bollinger(&values, period, num_std)
                .ok_or_else(|| not_enough(name))?;
            let value = match name {
                "bollinger_upper" => bb.upper,
                "bollinger_middle" => bb.middle,
                "bollinger_lower" => bb.lower,
                _ => bb.width,
            };
            Ok(Value::Num(value))
        }

        // --- candle-based indicators -----------------------------------------
        "vwap" => {
            arity(args, 2, name)?;
            let candles = as_candles(&args[0])?;
            let period = as_period(&args[1], name)?;
            budget.charge(period as u64)?;
            vwap::vwap(candles, period)
                .map(Value::Num)
                .ok_or_else(|| not_enough(name))
        }
        "atr" => {
            arity(args, 2, name)?;
            let candles = as_candles(&args[0])?;
            let period = as_period(&args[1], name)?;
            budget.charge(candles.len() as u64)?;
            atr::atr(candles, period)
                .map(Value::Num)
                .ok_or_else(|| not_enough(name))
        }
        "stochastic_k" | "stochastic_d" => {
            arity(args, 3, name)?;
            let candles = as_candles(&args[0])?;
            let k_period = as_period(&args[1], name)?;
            let d_period = as_period(&args[2], name)?;
            budget.charge((k_period * d_period) as u64)?;
            let st = stochastic::stochastic(candles, k_period, d_period)
                .ok_or_else(|| not_enough(name))?;
            Ok(Value::Num(if name == "stochastic_k" {
                st.k
            } else {
                st.d
            }))
        }

        // --- numerics ---------------------------------------------------------
        "abs" => {
            arity(args, 1, name)?;
            Ok(Value::Num(as_num(&args[0], name)?.abs()))
        }
        "min" => {
            arity(args, 2, name)?;
            Ok(Value::Num(
                as_num(&args[0], name)?.min(as_num(&args[1], name)?),
            ))
        }
        "max" => {
            arity(args, 2, name)?;
            Ok(Value::Num(
                as_num(&args[0], name)?.max(as_num(&args[1], name)?),
            ))
        }

        // The snapshot's event time, not the wall clock.
        "now" => {
            arity(args, 0, name)?;
            Ok(Value::Num(now as f64))
        }

        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

// =============================================================================
// Coercions and helpers
// =============================================================================

fn arity(args: &[Value], expected: usize, name: &str) -> Result<(), EvalError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(EvalError::Message(format!(
            "{name} expects {expected} argument(s), got {}",
            args.len()
        )))
    }
}

fn not_enough(name: &str) -> EvalError {
    EvalError::Message(format!("{name}: not enough data"))
}

fn as_num(value: &Value, name: &str) -> Result<f64, EvalError> {
    match value {
        Value::Num(n) => Ok(*n),
        other => Err(EvalError::Message(format!(
            "{name}: expected number, got {}",
            other.type_name()
        ))),
    }
}

fn as_period(value: &Value, name: &str) -> Result<usize, EvalError> {
    let n = as_num(value, name)?;
    if n < 1.0 || n.fract() != 0.0 || n > 10_000.0 {
        return Err(EvalError::Message(format!(
            "{name}: period must be a positive integer <= 10000, got {n}"
        )));
    }
    Ok(n as usize)
}

fn as_candles(value: &Value) -> Result<&Arc<Vec<Candle>>, EvalError> {
    match value {
        Value::Candles(c) => Ok(c),
        other => Err(type_error("candles", other)),
    }
}

/// Coerce to a numeric series: a series as-is, candles become their closes.
fn to_series(value: &Value, budget: &mut Budget) -> Result<Vec<f64>, EvalError> {
    match value {
        Value::Series(s) => Ok(s.as_ref().clone()),
        Value::Candles(c) => {
            budget.charge(c.len() as u64)?;
            Ok(c.iter().map(|c| c.close).collect())
        }
        other => Err(type_error("series or candles", other)),
    }
}

fn series_from(
    args: &[Value],
    name: &str,
    budget: &mut Budget,
    field: fn(&Candle) -> f64,
) -> Result<Value, EvalError> {
    arity(args, 1, name)?;
    let candles = as_candles(&args[0])?;
    budget.charge(candles.len() as u64)?;
    Ok(Value::Series(Arc::new(
        candles.iter().map(field).collect(),
    )))
}

fn last_field(args: &[Value], name: &str, field: fn(&Candle) -> f64) -> Result<Value, EvalError> {
    arity(args, 1, name)?;
    let candles = as_candles(&args[0])?;
    candles
        .last()
        .map(|c| Value::Num(field(c)))
        .ok_or_else(|| not_enough(name))
}

fn latest_of(
    args: &[Value],
    name: &str,
    budget: &mut Budget,
    calc: fn(&[f64], usize) -> Vec<f64>,
) -> Result<Value, EvalError> {
    arity(args, 2, name)?;
    let values = to_series(&args[0], budget)?;
    let period = as_period(&args[1], name)?;
    budget.charge(values.len() as u64)?;
    calc(&values, period)
        .last()
        .copied()
        .map(Value::Num)
        .ok_or_else(|| not_enough(name))
}

fn series_of(
    args: &[Value],
    name: &str,
    budget: &mut Budget,
    calc: fn(&[f64], usize) -> Vec<f64>,
) -> Result<Value, EvalError> {
    arity(args, 2, name)?;
    let values = to_series(&args[0], budget)?;
    let period = as_period(&args[1], name)?;
    budget.charge(values.len() as u64)?;
    let series = calc(&values, period);
    if series.is_empty() {
        return Err(not_enough(name));
    }
    Ok(Value::Series(Arc::new(series)))
}

fn window_fold(
    source: &Value,
    window: &Value,
    name: &str,
    budget: &mut Budget,
    init: f64,
    fold: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    let values = to_series(source, budget)?;
    let n = as_period(window, name)?;
    if values.len() < n {
        return Err(not_enough(name));
    }
    let result = values[values.len() - n..]
        .iter()
        .fold(init, |acc, &v| fold(acc, v));
    Ok(Value::Num(result))
}

/// `crossed_above(a, b)`: a was at-or-below b on the previous bar and is
/// strictly above on the latest. `b` may be a series or a constant.
fn crossing(
    args: &[Value],
    name: &str,
    budget: &mut Budget,
    above: bool,
) -> Result<Value, EvalError> {
    arity(args, 2, name)?;
    let a = to_series(&args[0], budget)?;
    if a.len() < 2 {
        return Err(not_enough(name));
    }

    let (b_prev, b_last) = match &args[1] {
        Value::Num(n) => (*n, *n),
        other => {
            let b = to_series(other, budget)?;
            if b.len() < 2 {
                return Err(not_enough(name));
            }
            (b[b.len() - 2], b[b.len() - 1])
        }
    };

    let (a_prev, a_last) = (a[a.len() - 2], a[a.len() - 1]);
    let crossed = if above {
        a_prev <= b_prev && a_last > b_last
    } else {
        a_prev >= b_prev && a_last < b_last
    };
    Ok(Value::Bool(crossed))
}
