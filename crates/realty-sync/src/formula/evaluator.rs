use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Value};

use super::ast::{BinaryOp, Expr, FieldPath, Function, UnaryOp};
use super::EvalError;

/// Intermediate value produced while walking an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Scalar {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(number) => number.as_f64().map_or(Scalar::Null, Scalar::Number),
            Value::String(text) => Scalar::Text(text.clone()),
            Value::Bool(flag) => Scalar::Bool(*flag),
            // Arrays and objects only make sense inside SUM/COUNT.
            Value::Null | Value::Array(_) | Value::Object(_) => Scalar::Null,
        }
    }

    fn number(n: f64) -> Self {
        if n.is_finite() {
            Scalar::Number(n)
        } else {
            Scalar::Null
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view; numeric text counts, everything else does not.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Text(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite()),
            Scalar::Bool(_) | Scalar::Null => None,
        }
    }

    /// Three-valued truthiness: `None` for null.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(flag) => Some(*flag),
            Scalar::Number(n) => Some(*n != 0.0),
            Scalar::Text(text) => Some(!text.is_empty()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(text) => f.write_str(text),
            Scalar::Bool(flag) => write!(f, "{flag}"),
        }
    }
}

pub(crate) struct Evaluator<'a> {
    values: &'a Map<String, Value>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(values: &'a Map<String, Value>) -> Self {
        Self { values }
    }

    pub(crate) fn eval(&self, expr: &Expr) -> Result<Scalar, EvalError> {
        match expr {
            Expr::Number(n) => Ok(Scalar::Number(*n)),
            Expr::Text(text) => Ok(Scalar::Text(text.clone())),
            Expr::Bool(flag) => Ok(Scalar::Bool(*flag)),
            Expr::Null => Ok(Scalar::Null),
            Expr::Field(path) => self.field(path),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Negate => value.as_number().map_or(Scalar::Null, |n| Scalar::number(-n)),
                    UnaryOp::Not => value.truthy().map_or(Scalar::Null, |b| Scalar::Bool(!b)),
                })
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::Call { function, args } => self.call(*function, args),
        }
    }

    fn field(&self, path: &FieldPath) -> Result<Scalar, EvalError> {
        let mut current = self
            .values
            .get(path.root())
            .ok_or_else(|| EvalError::UnknownField(path.root().to_string()))?;

        for segment in &path.segments[1..] {
            match current.as_object().and_then(|object| object.get(segment)) {
                Some(next) => current = next,
                None => return Ok(Scalar::Null),
            }
        }
        Ok(Scalar::from_json(current))
    }

    /// Every value reachable through `path`, flattening arrays on the way.
    /// `None` when the root is present but null.
    fn collection(&self, path: &FieldPath) -> Result<Option<Vec<&'a Value>>, EvalError> {
        let root = self
            .values
            .get(path.root())
            .ok_or_else(|| EvalError::UnknownField(path.root().to_string()))?;
        if root.is_null() {
            return Ok(None);
        }

        let mut frontier = flatten(vec![root]);
        for segment in &path.segments[1..] {
            let next = frontier
                .into_iter()
                .filter_map(|value| value.as_object().and_then(|object| object.get(segment)))
                .collect();
            frontier = flatten(next);
        }
        Ok(Some(frontier))
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Scalar, EvalError> {
        match op {
            BinaryOp::And => {
                let lhs = self.eval(left)?.truthy();
                if lhs == Some(false) {
                    return Ok(Scalar::Bool(false));
                }
                let rhs = self.eval(right)?.truthy();
                Ok(match (lhs, rhs) {
                    (_, Some(false)) => Scalar::Bool(false),
                    (Some(true), Some(true)) => Scalar::Bool(true),
                    _ => Scalar::Null,
                })
            }
            BinaryOp::Or => {
                let lhs = self.eval(left)?.truthy();
                if lhs == Some(true) {
                    return Ok(Scalar::Bool(true));
                }
                let rhs = self.eval(right)?.truthy();
                Ok(match (lhs, rhs) {
                    (_, Some(true)) => Scalar::Bool(true),
                    (Some(false), Some(false)) => Scalar::Bool(false),
                    _ => Scalar::Null,
                })
            }
            _ => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                Ok(apply(op, &lhs, &rhs))
            }
        }
    }

    fn call(&self, function: Function, args: &[Expr]) -> Result<Scalar, EvalError> {
        match function {
            Function::Sum | Function::Count => {
                let Some(Expr::Field(path)) = args.first() else {
                    return Ok(Scalar::Null);
                };
                let items = self.collection(path)?;
                Ok(match (function, items) {
                    (Function::Count, None) => Scalar::Number(0.0),
                    (Function::Count, Some(items)) => {
                        Scalar::Number(items.iter().filter(|item| !item.is_null()).count() as f64)
                    }
                    (_, None) => Scalar::Null,
                    (_, Some(items)) => Scalar::number(
                        items
                            .iter()
                            .filter_map(|item| Scalar::from_json(item).as_number())
                            .sum(),
                    ),
                })
            }
            Function::If => {
                let condition = self.eval(&args[0])?;
                let branch = if condition.truthy() == Some(true) {
                    &args[1]
                } else {
                    &args[2]
                };
                self.eval(branch)
            }
            Function::Round => {
                let value = self.eval(&args[0])?;
                let places = match args.get(1) {
                    Some(expr) => match self.eval(expr)?.as_number() {
                        Some(places) => places.trunc() as i32,
                        None => return Ok(Scalar::Null),
                    },
                    None => 0,
                };
                Ok(value
                    .as_number()
                    .map_or(Scalar::Null, |n| Scalar::number(round_to(n, places))))
            }
            Function::Abs => {
                let value = self.eval(&args[0])?;
                Ok(value.as_number().map_or(Scalar::Null, |n| Scalar::Number(n.abs())))
            }
            Function::Min | Function::Max => {
                let mut best: Option<f64> = None;
                for arg in args {
                    if let Some(n) = self.eval(arg)?.as_number() {
                        best = Some(match (best, function) {
                            (None, _) => n,
                            (Some(current), Function::Min) => current.min(n),
                            (Some(current), _) => current.max(n),
                        });
                    }
                }
                Ok(best.map_or(Scalar::Null, Scalar::Number))
            }
            Function::Coalesce => {
                for arg in args {
                    let value = self.eval(arg)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Scalar::Null)
            }
        }
    }
}

fn flatten(values: Vec<&Value>) -> Vec<&Value> {
    let mut flat = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::Array(items) => flat.extend(items.iter()),
            other => flat.push(other),
        }
    }
    flat
}

fn apply(op: BinaryOp, lhs: &Scalar, rhs: &Scalar) -> Scalar {
    match op {
        BinaryOp::Concat => Scalar::Text(format!("{lhs}{rhs}")),
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
            let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
                return Scalar::Null;
            };
            match op {
                BinaryOp::Add => Scalar::number(a + b),
                BinaryOp::Subtract => Scalar::number(a - b),
                BinaryOp::Multiply => Scalar::number(a * b),
                _ if b == 0.0 => Scalar::Null,
                _ => Scalar::number(a / b),
            }
        }
        BinaryOp::Eq | BinaryOp::NotEq => {
            let equal = match (lhs, rhs) {
                (Scalar::Null, Scalar::Null) => true,
                (Scalar::Null, _) | (_, Scalar::Null) => false,
                _ => compare(lhs, rhs) == Some(Ordering::Equal),
            };
            Scalar::Bool(equal == (op == BinaryOp::Eq))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let Some(ordering) = compare(lhs, rhs) else {
                return Scalar::Null;
            };
            Scalar::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        BinaryOp::And | BinaryOp::Or => Scalar::Null,
    }
}

fn compare(lhs: &Scalar, rhs: &Scalar) -> Option<Ordering> {
    match (lhs, rhs) {
        (Scalar::Null, _) | (_, Scalar::Null) => None,
        (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
        (Scalar::Text(a), Scalar::Text(b)) => match (lhs.as_number(), rhs.as_number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(a.cmp(b)),
        },
        _ => match (lhs.as_number(), rhs.as_number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

/// Half away from zero, which is what operators expect for money.
///
/// `places` is clamped to what an f64 can represent; a value too large to
/// scale already has no fractional digits and is returned as is.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let limit = f64::DIGITS as i32;
    let factor = 10f64.powi(places.clamp(-limit, limit));
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}
