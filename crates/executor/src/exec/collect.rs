//! `COLLECT` execution (spec §4.6.2): single-pass hash group-by over a
//! conjunctive source, with `COUNT`/`SUM`/`AVG`/`MIN`/`MAX` and an optional
//! `HAVING` post-filter.

use std::collections::HashMap;

use weave_core::error::{Error, Result};
use weave_core::value::Value;

use crate::eval::{self, EvalContext, SubqueryRunner};
use crate::exec::conjunctive::Row;
use crate::query::{AggFunc, CollectClause};

struct Group {
    key_value: Value,
    count: u64,
    sums: HashMap<String, f64>,
    mins: HashMap<String, Value>,
    maxs: HashMap<String, Value>,
}

/// Groups `rows` (already fetched and filtered by the source query) per
/// `clause` and projects the final `RETURN` for each surviving group.
pub fn execute(clause: &CollectClause, var: &str, rows: &[Row], runner: &dyn SubqueryRunner) -> Result<Vec<Value>> {
    let (key_name, key_expr) = &clause.group_key;
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Group> = HashMap::new();

    for row in rows {
        let ctx = row.context(var);
        let key_value = eval::eval(key_expr, &ctx, runner)?;
        let key_str = serde_json::to_string(&key_value).unwrap_or_default();

        let group = groups.entry(key_str.clone()).or_insert_with(|| {
            order.push(key_str.clone());
            Group { key_value: key_value.clone(), count: 0, sums: HashMap::new(), mins: HashMap::new(), maxs: HashMap::new() }
        });
        group.count += 1;

        for (name, func, arg) in &clause.aggregates {
            match func {
                AggFunc::Count => {}
                AggFunc::Sum | AggFunc::Avg => {
                    let arg = arg.as_ref().ok_or_else(|| Error::invalid(format!("{name} requires an argument")))?;
                    let v = eval::eval(arg, &ctx, runner)?.as_f64().unwrap_or(0.0);
                    *group.sums.entry(name.clone()).or_insert(0.0) += v;
                }
                AggFunc::Min => {
                    let arg = arg.as_ref().ok_or_else(|| Error::invalid(format!("{name} requires an argument")))?;
                    let v = eval::eval(arg, &ctx, runner)?;
                    update_extreme(&mut group.mins, name, v, true);
                }
                AggFunc::Max => {
                    let arg = arg.as_ref().ok_or_else(|| Error::invalid(format!("{name} requires an argument")))?;
                    let v = eval::eval(arg, &ctx, runner)?;
                    update_extreme(&mut group.maxs, name, v, false);
                }
            }
        }
    }

    let mut out = Vec::new();
    for key_str in order {
        let group = groups.remove(&key_str).expect("order tracks every inserted key");
        let mut ctx = EvalContext::new();
        ctx.bind(key_name.clone(), group.key_value);
        for (name, func, _) in &clause.aggregates {
            let value = match func {
                AggFunc::Count => Value::Int(group.count as i64),
                AggFunc::Sum => Value::Double(*group.sums.get(name).unwrap_or(&0.0)),
                AggFunc::Avg => {
                    let sum = *group.sums.get(name).unwrap_or(&0.0);
                    Value::Double(if group.count == 0 { 0.0 } else { sum / group.count as f64 })
                }
                AggFunc::Min => group.mins.get(name).cloned().unwrap_or(Value::Null),
                AggFunc::Max => group.maxs.get(name).cloned().unwrap_or(Value::Null),
            };
            ctx.bind(name.clone(), value);
        }

        if let Some(having) = &clause.having {
            if !eval::truthy(&eval::eval(having, &ctx, runner)?) {
                continue;
            }
        }
        out.push(eval::eval(&clause.ret, &ctx, runner)?);
    }
    Ok(out)
}


fn update_extreme(map: &mut HashMap<String, Value>, name: &str, candidate: Value, want_min: bool) {
    match map.get(name) {
        None => {
            map.insert(name.to_string(), candidate);
        }
        Some(current) => {
            let better = match current.partial_cmp_value(&candidate) {
                Some(std::cmp::Ordering::Greater) => want_min,
                Some(std::cmp::Ordering::Less) => !want_min,
                _ => false,
            };
            if better {
                map.insert(name.to_string(), candidate);
            }
        }
    }
}
