//! Custom variable store shared by commands and guards.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::ExprError;
use crate::expr::{self, BinaryOp, Expr, Scope, Value};

/// Assignment operators accepted by `@set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssignOp {
    #[default]
    #[serde(rename = "=")]
    Assign,
    #[serde(rename = "+=")]
    Add,
    #[serde(rename = "-=")]
    Sub,
    #[serde(rename = "*=")]
    Mul,
    #[serde(rename = "/=")]
    Div,
}

impl AssignOp {
    fn binary(self) -> Option<BinaryOp> {
        match self {
            Self::Assign => None,
            Self::Add => Some(BinaryOp::Add),
            Self::Sub => Some(BinaryOp::Sub),
            Self::Mul => Some(BinaryOp::Mul),
            Self::Div => Some(BinaryOp::Div),
        }
    }
}

/// Serializable copy of every variable, ordered by name.
pub type VariableSnapshot = BTreeMap<String, Value>;

/// Thread-safe name → value map.
#[derive(Debug, Default)]
pub struct VariableStore {
    values: RwLock<HashMap<String, Value>>,
}

impl VariableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.read().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.values.write().insert(name.into(), value);
    }

    /// Evaluate `value` and store it into `name` using `op`.
    ///
    /// Compound operators read the current value first; the read and the
    /// write happen under one lock so concurrent commands never interleave.
    pub fn assign(&self, name: &str, op: AssignOp, value: &Expr) -> Result<Value, ExprError> {
        let rhs = value.eval(self)?;
        let mut values = self.values.write();
        let result = match op.binary() {
            None => rhs,
            Some(bin) => {
                let current = values
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ExprError::UnknownVariable(name.to_string()))?;
                expr::apply(bin, current, rhs)?
            }
        };
        values.insert(name.to_string(), result.clone());
        Ok(result)
    }

    #[must_use]
    pub fn snapshot(&self) -> VariableSnapshot {
        self.values
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn restore(&self, snapshot: &VariableSnapshot) {
        let mut values = self.values.write();
        values.clear();
        values.extend(snapshot.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn clear(&self) {
        self.values.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Scope for VariableStore {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_assignment_reads_current_value() {
        let vars = VariableStore::new();
        vars.assign("i", AssignOp::Assign, &Expr::num(0.0)).unwrap();
        vars.assign("i", AssignOp::Add, &Expr::num(1.0)).unwrap();
        vars.assign("i", AssignOp::Mul, &Expr::num(5.0)).unwrap();
        assert_eq!(vars.get("i"), Some(Value::Number(5.0)));
    }

    #[test]
    fn compound_assignment_on_missing_variable_fails() {
        let vars = VariableStore::new();
        let err = vars
            .assign("ghost", AssignOp::Add, &Expr::num(1.0))
            .unwrap_err();
        assert_eq!(err, ExprError::UnknownVariable("ghost".into()));
        assert!(vars.is_empty());
    }

    #[test]
    fn assignment_may_reference_other_variables() {
        let vars = VariableStore::new();
        vars.set("a", Value::Number(2.0));
        vars.assign("b", AssignOp::Assign, &Expr::var("a")).unwrap();
        assert_eq!(vars.get("b"), Some(Value::Number(2.0)));
    }

    #[test]
    fn snapshot_restore_replaces_everything() {
        let vars = VariableStore::new();
        vars.set("a", Value::Number(1.0));
        let snap = vars.snapshot();
        vars.set("a", Value::Number(9.0));
        vars.set("b", Value::Bool(true));
        vars.restore(&snap);
        assert_eq!(vars.get("a"), Some(Value::Number(1.0)));
        assert_eq!(vars.get("b"), None);
        assert_eq!(vars.len(), 1);
    }
}
