//! Guard and assignment expressions over custom variables.
//!
//! Expressions arrive already compiled (the script compiler owns text
//! parsing), so this module only models and evaluates the tree. Evaluation
//! is side-effect free and never cached: guards are re-evaluated every time
//! navigation consults them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::ExprError;

/// Runtime value of a custom variable or expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
        }
    }

    /// Truthiness used by guards: false, 0 and "" are false.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Text(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
}

impl BinaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// Compiled expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Value),
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// Read access to variables during evaluation.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<Value>;
}

impl Scope for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Expr {
    #[must_use]
    pub fn num(n: f64) -> Self {
        Self::Literal(Value::Number(n))
    }

    #[must_use]
    pub fn boolean(b: bool) -> Self {
        Self::Literal(Value::Bool(b))
    }

    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Literal(Value::Text(s.into()))
    }

    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    #[must_use]
    pub fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    #[must_use]
    pub fn not(inner: Self) -> Self {
        Self::Not(Box::new(inner))
    }

    #[must_use]
    pub fn lt(self, rhs: Self) -> Self {
        Self::binary(BinaryOp::Lt, self, rhs)
    }

    #[must_use]
    pub fn equals(self, rhs: Self) -> Self {
        Self::binary(BinaryOp::Eq, self, rhs)
    }

    #[must_use]
    pub fn gt(self, rhs: Self) -> Self {
        Self::binary(BinaryOp::Gt, self, rhs)
    }

    pub fn eval(&self, scope: &dyn Scope) -> Result<Value, ExprError> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Var(name) => scope
                .lookup(name)
                .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
            Self::Not(inner) => Ok(Value::Bool(!inner.eval(scope)?.is_truthy())),
            Self::Neg(inner) => match inner.eval(scope)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(ExprError::TypeMismatch {
                    op: "-",
                    lhs: other.type_name(),
                    rhs: "none",
                }),
            },
            Self::Binary { op, lhs, rhs } => {
                // Logical operators short-circuit.
                match op {
                    BinaryOp::And => {
                        return Ok(Value::Bool(
                            lhs.eval(scope)?.is_truthy() && rhs.eval(scope)?.is_truthy(),
                        ));
                    }
                    BinaryOp::Or => {
                        return Ok(Value::Bool(
                            lhs.eval(scope)?.is_truthy() || rhs.eval(scope)?.is_truthy(),
                        ));
                    }
                    _ => {}
                }
                apply(*op, lhs.eval(scope)?, rhs.eval(scope)?)
            }
        }
    }

    /// Evaluate as a guard condition.
    pub fn eval_bool(&self, scope: &dyn Scope) -> Result<bool, ExprError> {
        self.eval(scope).map(|v| v.is_truthy())
    }
}

/// Apply a non-logical binary operator to two evaluated operands.
pub fn apply(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ExprError> {
    let mismatch = |l: &Value, r: &Value| ExprError::TypeMismatch {
        op: op.symbol(),
        lhs: l.type_name(),
        rhs: r.type_name(),
    };
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Text(a), b) => Ok(Value::Text(format!("{a}{b}"))),
            _ => Err(mismatch(&lhs, &rhs)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => match op {
                BinaryOp::Sub => Ok(Value::Number(a - b)),
                BinaryOp::Mul => Ok(Value::Number(a * b)),
                _ if *b == 0.0 => Err(ExprError::DivisionByZero),
                _ => Ok(Value::Number(a / b)),
            },
            _ => Err(mismatch(&lhs, &rhs)),
        },
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| mismatch(&lhs, &rhs))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(match op {
            BinaryOp::And => lhs.is_truthy() && rhs.is_truthy(),
            _ => lhs.is_truthy() || rhs.is_truthy(),
        })),
    }
}
