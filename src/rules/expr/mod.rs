//! Condition expressions: a small typed tree compiled once at rule load and
//! evaluated against a work item's context.

pub mod lexer;
pub mod parser;
pub mod eval;

use std::collections::BTreeSet;
use std::time::Duration;
use regex::Regex;
use serde::Serialize;

pub use eval::EvalEnv;
pub use parser::parse_expression;

/// Runtime value of a context variable or literal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    /// Truthiness used when a non-boolean appears in boolean position.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    /// Numeric view: numbers as-is, strings only when they parse cleanly.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            Value::Bool(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Bool(_) => "bool",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Num(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Num(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Num(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    IContains,
    StartsWith,
    EndsWith,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Contains => "contains",
            CmpOp::IContains => "icontains",
            CmpOp::StartsWith => "startswith",
            CmpOp::EndsWith => "endswith",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Predicate {
    /// Blocks until the stage's OOB token is correlated or the deadline passes.
    Oob { timeout: Option<Duration> },
    /// Regex match against a string operand; the pattern is compiled at load.
    Matches { subject: Box<Expr>, regex: Regex },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    VarRef(String),
    Comparison { op: CmpOp, left: Box<Expr>, right: Box<Expr> },
    Logical { op: LogicalOp, left: Box<Expr>, right: Box<Expr> },
    Not(Box<Expr>),
    Predicate(Predicate),
}

impl Expr {
    /// Every variable name the expression reads.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::VarRef(name) => {
                out.insert(name.clone());
            }
            Expr::Comparison { left, right, .. } | Expr::Logical { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::Not(inner) => inner.collect_variables(out),
            Expr::Predicate(Predicate::Matches { subject, .. }) => subject.collect_variables(out),
            Expr::Predicate(Predicate::Oob { .. }) => {}
        }
    }

    pub fn uses_oob(&self) -> bool {
        match self {
            Expr::Predicate(Predicate::Oob { .. }) => true,
            Expr::Predicate(Predicate::Matches { subject, .. }) => subject.uses_oob(),
            Expr::Comparison { left, right, .. } | Expr::Logical { left, right, .. } => {
                left.uses_oob() || right.uses_oob()
            }
            Expr::Not(inner) => inner.uses_oob(),
            Expr::Literal(_) | Expr::VarRef(_) => false,
        }
    }
}
