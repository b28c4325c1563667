//! Expression evaluation: a depth-first fold over [`Expr`] against a set of
//! variable bindings (spec §9 "Expression trees").

use std::collections::HashMap;

use weave_core::error::{Error, Result};
use weave_core::value::Value;

use crate::ast::{BinOp, Expr, Quantifier, UnaryOp};
use crate::functions;
use crate::query::Program;

/// Runs a nested [`Program`] to completion and returns its projected rows.
/// Implemented by the top-level engine; threaded through so `eval` does not
/// depend on the execution engines.
pub trait SubqueryRunner {
    /// Execute `program` with `outer` bindings visible to correlated filters
    /// and return its `RETURN` projections in order.
    fn run(&self, program: &Program, outer: &EvalContext) -> Result<Vec<Value>>;
}

/// Variable bindings visible while evaluating one expression tree.
#[derive(Clone, Default)]
pub struct EvalContext<'a> {
    vars: HashMap<String, Value>,
    parent: Option<&'a EvalContext<'a>>,
}

impl<'a> EvalContext<'a> {
    /// An empty top-level context.
    pub fn new() -> Self {
        Self { vars: HashMap::new(), parent: None }
    }

    /// A child context that falls back to `self` for unresolved variables,
    /// used when evaluating correlated subqueries.
    pub fn child(&'a self) -> Self {
        Self { vars: HashMap::new(), parent: Some(self) }
    }

    /// Binds `name` to `value` in this context.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Looks up a bound variable, checking parent contexts on miss.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name).or_else(|| self.parent.and_then(|p| p.get(name)))
    }
}

/// Evaluates `expr` under `ctx`. `runner` resolves nested subqueries.
pub fn eval(expr: &Expr, ctx: &EvalContext<'_>, runner: &dyn SubqueryRunner) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Variable(name) => Ok(ctx.get(name).cloned().unwrap_or(Value::Null)),
        Expr::FieldAccess(base, field) => {
            let base_val = eval(base, ctx, runner)?;
            Ok(base_val.get_path(field).cloned().unwrap_or(Value::Null))
        }
        Expr::UnaryOp(op, inner) => {
            let v = eval(inner, ctx, runner)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&v))),
                UnaryOp::Neg => Ok(Value::Double(-as_f64(&v)?)),
            }
        }
        Expr::BinaryOp(BinOp::And, lhs, rhs) => {
            let l = eval(lhs, ctx, runner)?;
            if !truthy(&l) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(rhs, ctx, runner)?)))
        }
        Expr::BinaryOp(BinOp::Or, lhs, rhs) => {
            let l = eval(lhs, ctx, runner)?;
            if truthy(&l) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(rhs, ctx, runner)?)))
        }
        Expr::BinaryOp(op, lhs, rhs) => {
            let l = eval(lhs, ctx, runner)?;
            let r = eval(rhs, ctx, runner)?;
            eval_binop(*op, &l, &r)
        }
        Expr::FunctionCall(name, args) => {
            let arg_vals: Result<Vec<Value>> = args.iter().map(|a| eval(a, ctx, runner)).collect();
            functions::call(name, &arg_vals?, ctx)
        }
        Expr::ArrayLit(items) => {
            let vals: Result<Vec<Value>> = items.iter().map(|i| eval(i, ctx, runner)).collect();
            Ok(Value::Array(vals?))
        }
        Expr::ObjectCtor(fields) => {
            let mut obj = std::collections::BTreeMap::new();
            for (key, value_expr) in fields {
                obj.insert(key.clone(), eval(value_expr, ctx, runner)?);
            }
            Ok(Value::Object(obj))
        }
        Expr::Subquery(program) => {
            let rows = runner.run(program, ctx)?;
            Ok(Value::Array(rows))
        }
        Expr::QuantifiedSubquery { quantifier, binding, subquery, predicate } => {
            let rows = runner.run(subquery, ctx)?;
            let mut any = false;
            let mut all = true;
            for row in &rows {
                let mut child = ctx.child();
                child.bind(binding.clone(), row.clone());
                let holds = truthy(&eval(predicate, &child, runner)?);
                any |= holds;
                all &= holds;
                if matches!(quantifier, Quantifier::Any) && any {
                    break;
                }
                if matches!(quantifier, Quantifier::All) && !all {
                    break;
                }
            }
            Ok(Value::Bool(match quantifier {
                Quantifier::Any => any,
                Quantifier::All => all && !rows.is_empty(),
            }))
        }
    }
}

fn eval_binop(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinOp::Eq => Ok(Value::Bool(l.json_eq(r))),
        BinOp::Neq => Ok(Value::Bool(!l.json_eq(r))),
        BinOp::Lt => Ok(Value::Bool(l.partial_cmp_value(r) == Some(std::cmp::Ordering::Less))),
        BinOp::Le => Ok(Value::Bool(matches!(l.partial_cmp_value(r), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)))),
        BinOp::Gt => Ok(Value::Bool(l.partial_cmp_value(r) == Some(std::cmp::Ordering::Greater))),
        BinOp::Ge => Ok(Value::Bool(matches!(l.partial_cmp_value(r), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)))),
        BinOp::Add => Ok(Value::Double(as_f64(l)? + as_f64(r)?)),
        BinOp::Sub => Ok(Value::Double(as_f64(l)? - as_f64(r)?)),
        BinOp::Mul => Ok(Value::Double(as_f64(l)? * as_f64(r)?)),
        BinOp::Div => {
            let divisor = as_f64(r)?;
            if divisor == 0.0 {
                return Err(Error::runtime("division by zero"));
            }
            Ok(Value::Double(as_f64(l)? / divisor))
        }
        BinOp::In => match r {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|item| item.json_eq(l)))),
            _ => Err(Error::runtime("IN requires an array right-hand side")),
        },
        BinOp::And | BinOp::Or => unreachable!("handled with short-circuit above"),
    }
}

/// AQL truthiness: `null`, `false`, `0`, empty string/array/object are falsy.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Double(d) => *d != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_f64(v: &Value) -> Result<f64> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Double(d) => Ok(*d),
        Value::Null => Ok(0.0),
        other => Err(Error::runtime(format!("expected a number, got {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoSubqueries;
    impl SubqueryRunner for NoSubqueries {
        fn run(&self, _program: &Program, _outer: &EvalContext<'_>) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn arithmetic_and_comparison_evaluate() {
        let expr = Expr::BinaryOp(
            BinOp::Gt,
            Box::new(Expr::BinaryOp(BinOp::Add, Box::new(Expr::Literal(Value::Int(2))), Box::new(Expr::Literal(Value::Int(3))))),
            Box::new(Expr::Literal(Value::Int(4))),
        );
        let ctx = EvalContext::new();
        let result = eval(&expr, &ctx, &NoSubqueries).unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let expr = Expr::BinaryOp(BinOp::Div, Box::new(Expr::Literal(Value::Int(1))), Box::new(Expr::Literal(Value::Int(0))));
        let ctx = EvalContext::new();
        assert!(eval(&expr, &ctx, &NoSubqueries).is_err());
    }

    #[test]
    fn and_short_circuits_without_evaluating_rhs() {
        let expr = Expr::BinaryOp(
            BinOp::And,
            Box::new(Expr::Literal(Value::Bool(false))),
            Box::new(Expr::BinaryOp(BinOp::Div, Box::new(Expr::Literal(Value::Int(1))), Box::new(Expr::Literal(Value::Int(0))))),
        );
        let ctx = EvalContext::new();
        assert_eq!(eval(&expr, &ctx, &NoSubqueries).unwrap(), Value::Bool(false));
    }

    #[test]
    fn field_access_traverses_nested_objects() {
        let mut ctx = EvalContext::new();
        let mut inner = std::collections::BTreeMap::new();
        inner.insert("city".to_string(), Value::String("nyc".to_string()));
        let mut outer = std::collections::BTreeMap::new();
        outer.insert("address".to_string(), Value::Object(inner));
        ctx.bind("u", Value::Object(outer));
        let expr = Expr::FieldAccess(Box::new(Expr::FieldAccess(Box::new(Expr::Variable("u".to_string())), "address".to_string())), "city".to_string());
        assert_eq!(eval(&expr, &ctx, &NoSubqueries).unwrap(), Value::String("nyc".to_string()));
    }

    #[test]
    fn in_checks_array_membership_with_loose_equality() {
        let expr = Expr::BinaryOp(
            BinOp::In,
            Box::new(Expr::Literal(Value::Int(2))),
            Box::new(Expr::ArrayLit(vec![Expr::Literal(Value::Double(1.0)), Expr::Literal(Value::Double(2.0))])),
        );
        let ctx = EvalContext::new();
        assert_eq!(eval(&expr, &ctx, &NoSubqueries).unwrap(), Value::Bool(true));
    }
}
