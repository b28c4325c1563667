//! Built-in function registry (spec §4.6.6 "Expressions and functions").
//!
//! `FULLTEXT(field, query)` is detected ahead of evaluation by
//! `exec::conjunctive::candidate_pks`, which runs it against
//! [`weave_search::FullTextIndex`] and binds the per-row score under a
//! reserved variable (`__bm25_score`) that `BM25()` reads back — see
//! `exec/conjunctive.rs`. By the time a candidate row reaches `call()` here,
//! the predicate has already been satisfied by construction, so `FULLTEXT`
//! just reports a match. `BM25()` errors if asked for outside a
//! `FULLTEXT`-driven row, rather than silently returning a made-up score.

use weave_core::error::{Error, Result};
use weave_core::value::Value;

use crate::eval::EvalContext;

/// Dispatches a call to a built-in by name (case-insensitive).
pub fn call(name: &str, args: &[Value], ctx: &EvalContext<'_>) -> Result<Value> {
    match name.to_ascii_uppercase().as_str() {
        "CONCAT" => Ok(Value::String(args.iter().map(value_to_display_string).collect::<Vec<_>>().concat())),
        "LOWER" => Ok(Value::String(one_str(args, name)?.to_lowercase())),
        "UPPER" => Ok(Value::String(one_str(args, name)?.to_uppercase())),
        "TRIM" => Ok(Value::String(one_str(args, name)?.trim().to_string())),
        "LENGTH" => Ok(Value::Int(length_of(args, name)?)),
        "SUBSTRING" => substring(args, name),
        "ABS" => Ok(Value::Double(one_num(args, name)?.abs())),
        "CEIL" => Ok(Value::Double(one_num(args, name)?.ceil())),
        "FLOOR" => Ok(Value::Double(one_num(args, name)?.floor())),
        "ROUND" => Ok(Value::Double(one_num(args, name)?.round())),
        "SQRT" => Ok(Value::Double(one_num(args, name)?.sqrt())),
        "POW" => {
            let (base, exp) = two_nums(args, name)?;
            Ok(Value::Double(base.powf(exp)))
        }
        "IS_NULL" => Ok(Value::Bool(args.first().map(Value::is_null).unwrap_or(true))),
        "IS_STRING" => Ok(Value::Bool(matches!(args.first(), Some(Value::String(_))))),
        "IS_NUMBER" => Ok(Value::Bool(matches!(args.first(), Some(Value::Int(_) | Value::Double(_))))),
        "IS_ARRAY" => Ok(Value::Bool(matches!(args.first(), Some(Value::Array(_))))),
        "IS_OBJECT" => Ok(Value::Bool(matches!(args.first(), Some(Value::Object(_))))),
        "IS_BOOL" => Ok(Value::Bool(matches!(args.first(), Some(Value::Bool(_))))),
        "FULLTEXT" => {
            // Predicate truth is established by the pushdown that populated
            // the candidate set; at evaluation time this is always true for
            // rows that reached here as FULLTEXT candidates.
            Ok(Value::Bool(true))
        }
        "BM25" => ctx.get("__bm25_score").cloned().ok_or_else(|| Error::runtime("BM25() used outside a FULLTEXT-filtered row")),
        other => Err(Error::invalid(format!("unknown function '{other}'"))),
    }
}

fn value_to_display_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Double(d) => d.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn one_str<'a>(args: &'a [Value], fn_name: &str) -> Result<&'a str> {
    args.first().and_then(Value::as_str).ok_or_else(|| Error::invalid(format!("{fn_name}() requires a string argument")))
}

fn one_num(args: &[Value], fn_name: &str) -> Result<f64> {
    args.first().and_then(Value::as_f64).ok_or_else(|| Error::invalid(format!("{fn_name}() requires a numeric argument")))
}

fn two_nums(args: &[Value], fn_name: &str) -> Result<(f64, f64)> {
    let a = args.first().and_then(Value::as_f64).ok_or_else(|| Error::invalid(format!("{fn_name}() requires two numeric arguments")))?;
    let b = args.get(1).and_then(Value::as_f64).ok_or_else(|| Error::invalid(format!("{fn_name}() requires two numeric arguments")))?;
    Ok((a, b))
}

fn length_of(args: &[Value], fn_name: &str) -> Result<i64> {
    match args.first() {
        Some(Value::String(s)) => Ok(s.chars().count() as i64),
        Some(Value::Array(a)) => Ok(a.len() as i64),
        Some(Value::Object(o)) => Ok(o.len() as i64),
        _ => Err(Error::invalid(format!("{fn_name}() requires a string, array or object argument"))),
    }
}

fn substring(args: &[Value], fn_name: &str) -> Result<Value> {
    let s = one_str(args, fn_name)?;
    let chars: Vec<char> = s.chars().collect();
    let start = args.get(1).and_then(Value::as_f64).ok_or_else(|| Error::invalid(format!("{fn_name}() requires a numeric start index")))? as usize;
    let len = args.get(2).and_then(Value::as_f64).map(|n| n as usize).unwrap_or(chars.len().saturating_sub(start));
    let end = (start + len).min(chars.len());
    if start >= chars.len() {
        return Ok(Value::String(String::new()));
    }
    Ok(Value::String(chars[start..end].iter().collect()))
}
