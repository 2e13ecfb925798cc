// =============================================================================
// Filter DSL — tree-walking evaluator
// =============================================================================
//
// Evaluation is pure: the only world a program sees is the market snapshot
// bound into its globals (`klines`, `ticker`, `symbol`) and the builtin
// functions. No I/O, no clock beyond the snapshot's `now`, no spawning.
//
// Two budgets bound every evaluation: a wall-clock deadline checked every few
// steps and on every loop iteration, and a hard step-count fuel as a backstop.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::snapshot::MarketSnapshot;
use crate::sandbox::builtins;
use crate::sandbox::parser::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use crate::types::{Candle, Interval, Ticker};

/// Hard step budget per evaluation. Far above what any deadline allows, so
/// the wall clock always wins; purely a backstop against a stalled clock.
const DEFAULT_FUEL: u64 = 1_000_000_000;

/// Deadline check cadence, in evaluation steps.
const DEADLINE_CHECK_MASK: u64 = 63;

// =============================================================================
// Values
// =============================================================================

/// Runtime value inside the sandbox.
#[derive(Debug, Clone)]
pub enum Value {
    Num(f64),
    Bool(bool),
    Str(String),
    Series(Arc<Vec<f64>>),
    Candles(Arc<Vec<Candle>>),
    Klines(Arc<HashMap<Interval, Arc<Vec<Candle>>>>),
    Ticker(Arc<Ticker>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Num(_) => "number",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Series(_) => "series",
            Value::Candles(_) => "candles",
            Value::Klines(_) => "klines",
            Value::Ticker(_) => "ticker",
        }
    }
}

/// Evaluation failure. `Timeout` is special-cased by the executor into a
/// skipped (not failed) symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    Timeout,
    FuelExhausted,
    /// Call to a name outside the builtin registry — a misconfigured filter,
    /// not a market condition.
    UnknownFunction(String),
    Message(String),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Timeout => f.write_str("evaluation deadline exceeded"),
            EvalError::FuelExhausted => f.write_str("evaluation step budget exhausted"),
            EvalError::UnknownFunction(name) => write!(f, "unknown function '{name}'"),
            EvalError::Message(m) => f.write_str(m),
        }
    }
}

pub fn type_error(expected: &str, got: &Value) -> EvalError {
    EvalError::Message(format!("expected {expected}, got {}", got.type_name()))
}

// =============================================================================
// Budget
// =============================================================================

pub struct Budget {
    deadline: Instant,
    fuel: u64,
    steps: u64,
}

impl Budget {
    fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            fuel: DEFAULT_FUEL,
            steps: 0,
        }
    }

    /// One evaluation step: burn fuel and periodically check the clock.
    fn tick(&mut self) -> Result<(), EvalError> {
        if self.fuel == 0 {
            return Err(EvalError::FuelExhausted);
        }
        self.fuel -= 1;
        self.steps += 1;
        if self.steps & DEADLINE_CHECK_MASK == 0 {
            self.check_deadline()?;
        }
        Ok(())
    }

    pub fn check_deadline(&self) -> Result<(), EvalError> {
        if Instant::now() >= self.deadline {
            Err(EvalError::Timeout)
        } else {
            Ok(())
        }
    }

    /// Charge a builtin call proportionally to the data it walks.
    pub fn charge(&mut self, amount: u64) -> Result<(), EvalError> {
        self.fuel = self.fuel.saturating_sub(amount);
        if self.fuel == 0 {
            return Err(EvalError::FuelExhausted);
        }
        self.check_deadline()
    }
}

// =============================================================================
// Interpreter
// =============================================================================

enum Flow {
    Normal(Option<Value>),
    Return(Value),
}

struct Interpreter {
    vars: HashMap<String, Value>,
    budget: Budget,
    now: i64,
}

/// Evaluate a parsed program against a snapshot under a wall-clock deadline.
///
/// The program's result is the value of its `return` statement, or the value
/// of the final trailing expression.
pub fn evaluate_program(
    program: &Program,
    snapshot: &MarketSnapshot,
    timeout: Duration,
) -> Result<Value, EvalError> {
    let mut vars = HashMap::new();
    vars.insert(
        "klines".to_string(),
        Value::Klines(Arc::new(snapshot.klines.clone())),
    );
    vars.insert(
        "ticker".to_string(),
        Value::Ticker(Arc::new(snapshot.ticker.clone())),
    );
    vars.insert("symbol".to_string(), Value::Str(snapshot.symbol.clone()));

    let mut interp = Interpreter {
        vars,
        budget: Budget::new(timeout),
        now: snapshot.now,
    };

    match interp.exec_block(&program.statements)? {
        Flow::Return(value) => Ok(value),
        Flow::Normal(Some(value)) => Ok(value),
        Flow::Normal(None) => Err(EvalError::Message(
            "filter program produced no result; end with an expression or a return".into(),
        )),
    }
}

impl Interpreter {
    fn exec_block(&mut self, statements: &[Stmt]) -> Result<Flow, EvalError> {
        let mut last = None;
        for stmt in statements {
            self.budget.tick()?;
            match stmt {
                Stmt::Let { name, value } => {
                    let value = self.eval(value)?;
                    self.vars.insert(name.clone(), value);
                    last = None;
                }
                Stmt::Assign { name, value } => {
                    if !self.vars.contains_key(name) {
                        return Err(EvalError::Message(format!(
                            "assignment to undeclared variable '{name}'"
                        )));
                    }
                    let value = self.eval(value)?;
                    self.vars.insert(name.clone(), value);
                    last = None;
                }
                Stmt::Return(expr) => {
                    let value = self.eval(expr)?;
                    return Ok(Flow::Return(value));
                }
                Stmt::If {
                    cond,
                    then_block,
                    else_block,
                } => {
                    let chosen = if self.eval_bool(cond)? {
                        Some(then_block)
                    } else {
                        else_block.as_ref()
                    };
                    if let Some(block) = chosen {
                        if let Flow::Return(value) = self.exec_block(block)? {
                            return Ok(Flow::Return(value));
                        }
                    }
                    last = None;
                }
                Stmt::While { cond, body } => {
                    loop {
                        // Every iteration hits the clock so a tight loop
                        // cannot outrun the deadline.
                        self.budget.check_deadline()?;
                        self.budget.tick()?;
                        if !self.eval_bool(cond)? {
                            break;
                        }
                        if let Flow::Return(value) = self.exec_block(body)? {
                            return Ok(Flow::Return(value));
                        }
                    }
                    last = None;
                }
                Stmt::Expr(expr) => {
                    last = Some(self.eval(expr)?);
                }
            }
        }
        Ok(Flow::Normal(last))
    }

    fn eval_bool(&mut self, expr: &Expr) -> Result<bool, EvalError> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(type_error("bool", &other)),
        }
    }

    fn eval_num(&mut self, expr: &Expr) -> Result<f64, EvalError> {
        match self.eval(expr)? {
            Value::Num(n) => Ok(n),
            other => Err(type_error("number", &other)),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        self.budget.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Ident(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::Message(format!("unknown variable '{name}'"))),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Neg => Ok(Value::Num(-self.eval_num(expr)?)),
                UnaryOp::Not => Ok(Value::Bool(!self.eval_bool(expr)?)),
            },
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            Expr::Index { target, index } => self.eval_index(target, index),
            Expr::Field { target, field } => self.eval_field(target, field),
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                builtins::call(name, &values, self.now, &mut self.budget)
            }
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value, EvalError> {
        // Short-circuit logic first.
        match op {
            BinaryOp::And => {
                return Ok(Value::Bool(self.eval_bool(lhs)? && self.eval_bool(rhs)?));
            }
            BinaryOp::Or => {
                return Ok(Value::Bool(self.eval_bool(lhs)? || self.eval_bool(rhs)?));
            }
            _ => {}
        }

        let lhs = self.eval(lhs)?;
        let rhs = self.eval(rhs)?;

        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let (a, b) = match (&lhs, &rhs) {
                    (Value::Num(a), Value::Num(b)) => (*a, *b),
                    _ => {
                        return Err(EvalError::Message(format!(
                            "arithmetic needs numbers, got {} and {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )))
                    }
                };
                let result = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem => a % b,
                    _ => unreachable!(),
                };
                Ok(Value::Num(result))
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let (a, b) = match (&lhs, &rhs) {
                    (Value::Num(a), Value::Num(b)) => (*a, *b),
                    _ => {
                        return Err(EvalError::Message(format!(
                            "comparison needs numbers, got {} and {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )))
                    }
                };
                let result = match op {
                    BinaryOp::Lt => a < b,
                    BinaryOp::Le => a <= b,
                    BinaryOp::Gt => a > b,
                    BinaryOp::Ge => a >= b,
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let equal = match (&lhs, &rhs) {
                    (Value::Num(a), Value::Num(b)) => a == b,
                    (Value::Bool(a), Value::Bool(b)) => a == b,
                    (Value::Str(a), Value::Str(b)) => a == b,
                    _ => {
                        return Err(EvalError::Message(format!(
                            "cannot compare {} with {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )))
                    }
                };
                Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
    }

    fn eval_index(&mut self, target: &Expr, index: &Expr) -> Result<Value, EvalError> {
        let target = self.eval(target)?;
        match target {
            Value::Klines(map) => {
                let key = match self.eval(index)? {
                    Value::Str(s) => s,
                    other => return Err(type_error("interval string", &other)),
                };
                let interval = Interval::parse(&key)
                    .ok_or_else(|| EvalError::Message(format!("unknown interval '{key}'")))?;
                map.get(&interval).map(|c| Value::Candles(Arc::clone(c))).ok_or_else(|| {
                    EvalError::Message(format!(
                        "no {interval} candles in snapshot; declare the timeframe on the trader"
                    ))
                })
            }
            Value::Series(series) => {
                let idx = self.eval_num(index)?;
                if idx < 0.0 || idx.fract() != 0.0 {
                    return Err(EvalError::Message(format!(
                        "series index must be a non-negative integer, got {idx}"
                    )));
                }
                series
                    .get(idx as usize)
                    .copied()
                    .map(Value::Num)
                    .ok_or_else(|| {
                        EvalError::Message(format!(
                            "series index {idx} out of bounds (len {})",
                            series.len()
                        ))
                    })
            }
            other => Err(type_error("klines or series", &other)),
        }
    }

    fn eval_field(&mut self, target: &Expr, field: &str) -> Result<Value, EvalError> {
        let target = self.eval(target)?;
        match target {
            Value::Ticker(ticker) => match field {
                "last_price" => Ok(Value::Num(ticker.last_price)),
                "price_change_percent" | "change_pct" => {
                    Ok(Value::Num(ticker.price_change_percent))
                }
                "quote_volume" => Ok(Value::Num(ticker.quote_volume)),
                "symbol" => Ok(Value::Str(ticker.symbol.clone())),
                other => Err(EvalError::Message(format!(
                    "ticker has no field '{other}'"
                ))),
            },
            other => Err(type_error("ticker", &other)),
        }
    }
}
