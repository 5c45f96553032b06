use std::cmp::Ordering;
use std::time::Duration;
use async_trait::async_trait;
use futures::future::BoxFuture;
use crate::errors::PocScanError;
use super::{CmpOp, Expr, LogicalOp, Predicate, Value};

/// Variable lookup and OOB correlation for expression evaluation.
#[async_trait]
pub trait EvalEnv: Send {
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Wait for the current stage's OOB token. `timeout` overrides the
    /// configured deadline.
    async fn wait_oob(&mut self, timeout: Option<Duration>) -> Result<bool, PocScanError>;
}

impl Expr {
    /// Evaluate with short-circuit `&&` / `||`, so an `oob()` on the
    /// unevaluated side never waits.
    pub fn evaluate<'a>(&'a self, env: &'a mut dyn EvalEnv) -> BoxFuture<'a, Result<Value, PocScanError>> {
        Box::pin(async move {
            match self {
                Expr::Literal(v) => Ok(v.clone()),
                Expr::VarRef(name) => env.lookup(name).ok_or_else(|| {
                    PocScanError::RuleDefinition(format!("unresolved variable '{}'", name))
                }),
                Expr::Not(inner) => {
                    let v = inner.evaluate(env).await?;
                    Ok(Value::Bool(!v.truthy()))
                }
                Expr::Logical { op, left, right } => {
                    let l = left.evaluate(env).await?.truthy();
                    match (op, l) {
                        (LogicalOp::And, false) => Ok(Value::Bool(false)),
                        (LogicalOp::Or, true) => Ok(Value::Bool(true)),
                        _ => Ok(Value::Bool(right.evaluate(env).await?.truthy())),
                    }
                }
                Expr::Comparison { op, left, right } => {
                    let l = left.evaluate(env).await?;
                    let r = right.evaluate(env).await?;
                    compare(*op, &l, &r).map(Value::Bool)
                }
                Expr::Predicate(Predicate::Matches { subject, regex }) => {
                    let s = subject.evaluate(env).await?;
                    Ok(Value::Bool(regex.is_match(&s.to_string())))
                }
                Expr::Predicate(Predicate::Oob { timeout }) => {
                    env.wait_oob(*timeout).await.map(Value::Bool)
                }
            }
        })
    }

    pub async fn evaluate_bool(&self, env: &mut dyn EvalEnv) -> Result<bool, PocScanError> {
        Ok(self.evaluate(env).await?.truthy())
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, PocScanError> {
    match op {
        CmpOp::Eq => Ok(values_equal(l, r)),
        CmpOp::Ne => Ok(!values_equal(l, r)),
        CmpOp::Gt | CmpOp::Lt | CmpOp::Ge | CmpOp::Le => {
            let ordering = order(l, r).ok_or_else(|| {
                PocScanError::RuleDefinition(format!(
                    "cannot compare {} '{}' {} {} '{}'",
                    l.type_name(), l, op.symbol(), r.type_name(), r
                ))
            })?;
            Ok(match op {
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Ge => ordering != Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        CmpOp::Contains => Ok(l.to_string().contains(&r.to_string())),
        CmpOp::IContains => Ok(l.to_string().to_lowercase().contains(&r.to_string().to_lowercase())),
        CmpOp::StartsWith => Ok(l.to_string().starts_with(&r.to_string())),
        CmpOp::EndsWith => Ok(l.to_string().ends_with(&r.to_string())),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Num(_), Value::Str(_)) | (Value::Str(_), Value::Num(_)) => {
            match (l.as_number(), r.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => l.to_string() == r.to_string(),
    }
}

fn order(l: &Value, r: &Value) -> Option<Ordering> {
    let numeric = matches!(l, Value::Num(_)) || matches!(r, Value::Num(_));
    match (l, r) {
        (Value::Str(a), Value::Str(b)) if !numeric => {
            match (l.as_number(), r.as_number()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => Some(a.cmp(b)),
            }
        }
        _ => l.as_number()?.partial_cmp(&r.as_number()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::rules::expr::parse_expression;

    struct MapEnv {
        vars: HashMap<String, Value>,
        oob_result: bool,
        oob_calls: usize,
    }

    impl MapEnv {
        fn new(pairs: &[(&str, Value)]) -> Self {
            Self {
                vars: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                oob_result: true,
                oob_calls: 0,
            }
        }
    }

    #[async_trait]
    impl EvalEnv for MapEnv {
        fn lookup(&self, name: &str) -> Option<Value> {
            self.vars.get(name).cloned()
        }

        async fn wait_oob(&mut self, _timeout: Option<Duration>) -> Result<bool, PocScanError> {
            self.oob_calls += 1;
            Ok(self.oob_result)
        }
    }

    async fn eval(src: &str, env: &mut MapEnv) -> Result<bool, PocScanError> {
        parse_expression(src).unwrap().evaluate_bool(env).await
    }

    fn response_env() -> MapEnv {
        MapEnv::new(&[
            ("status", Value::Num(200.0)),
            ("body", Value::from("welcome admin_token=abc")),
            ("version", Value::from("2.4.49")),
            ("count", Value::from("15")),
        ])
    }

    #[tokio::test]
    async fn test_contains_and_status() {
        let mut env = response_env();
        assert!(eval(r#"status == 200 && body contains "admin_token""#, &mut env).await.unwrap());
        assert!(!eval(r#"body contains "login failed""#, &mut env).await.unwrap());
        assert!(eval(r#"body icontains "ADMIN_TOKEN""#, &mut env).await.unwrap());
        assert!(eval(r#"body startswith "welcome" && !(body endswith "x")"#, &mut env).await.unwrap());
    }

    #[tokio::test]
    async fn test_numeric_coercion_between_string_and_number() {
        let mut env = response_env();
        assert!(eval("count > 9", &mut env).await.unwrap());
        assert!(eval("count == 15", &mut env).await.unwrap());
        assert!(eval(r#"status == "200""#, &mut env).await.unwrap());
        assert!(eval(r#"count > "9""#, &mut env).await.unwrap());
    }

    #[tokio::test]
    async fn test_string_ordering_is_lexicographic() {
        let mut env = response_env();
        assert!(eval(r#"version >= "2.4.10""#, &mut env).await.unwrap());
        assert!(eval("version > 1", &mut env).await.is_err());
    }

    #[tokio::test]
    async fn test_regex_predicate() {
        let mut env = response_env();
        assert!(eval(r#"body matches "admin_token=[a-z]+""#, &mut env).await.unwrap());
        assert!(!eval(r#"body matches "^admin""#, &mut env).await.unwrap());
    }

    #[tokio::test]
    async fn test_short_circuit_skips_oob() {
        let mut env = response_env();
        assert!(!eval("false && oob()", &mut env).await.unwrap());
        assert!(eval("true || oob()", &mut env).await.unwrap());
        assert_eq!(env.oob_calls, 0);

        assert!(eval("status == 200 && oob()", &mut env).await.unwrap());
        assert_eq!(env.oob_calls, 1);
    }

    #[tokio::test]
    async fn test_unresolved_variable_is_rule_error() {
        let mut env = response_env();
        let err = eval("missing == 1", &mut env).await.unwrap_err();
        assert!(matches!(err, PocScanError::RuleDefinition(_)));
    }

    #[tokio::test]
    async fn test_bare_identifier_truthiness() {
        let mut env = MapEnv::new(&[("token", Value::from("")), ("flag", Value::Bool(true))]);
        assert!(!eval("token", &mut env).await.unwrap());
        assert!(eval("flag && !token", &mut env).await.unwrap());
    }
}
