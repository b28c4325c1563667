//! Join execution (spec §4.6.2): hash join when an equality join key was
//! detected, nested loop otherwise. `LIMIT` without `SORT` short-circuits
//! as soon as enough rows have been produced.

use std::cmp::Ordering;
use std::collections::HashMap;

use weave_core::deadline::Deadline;
use weave_core::error::Result;
use weave_core::value::Value;
use weave_primitives::index::IndexManager;
use weave_storage::KvStore;

use crate::eval::{self, EvalContext, SubqueryRunner};
use crate::query::{JoinQuery, SortDir};

/// Runs a [`JoinQuery`] end to end.
pub fn execute(q: &JoinQuery, store: &KvStore, _indexes: &IndexManager, runner: &dyn SubqueryRunner, deadline: &Deadline) -> Result<Vec<Value>> {
    let left = &q.for_nodes[0];
    let right = &q.for_nodes[1];

    let left_rows = filtered_side(store, &left.collection, &left.var, &q.left_filters, runner, deadline)?;
    let right_rows = filtered_side(store, &right.collection, &right.var, &q.right_filters, runner, deadline)?;

    let early_out = q.limit.is_some() && q.sort.is_none();
    let limit_count = q.limit.map(|(offset, count)| offset as usize + count as usize);

    let mut joined = Vec::new();
    if let Some((left_field, right_field)) = &q.join_key {
        let (build, probe, build_field, probe_field, build_is_left) = if left_rows.len() <= right_rows.len() {
            (&left_rows, &right_rows, left_field, right_field, true)
        } else {
            (&right_rows, &left_rows, right_field, left_field, false)
        };
        let mut table: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in build.iter().enumerate() {
            if let Some(key) = row.get_path(build_field).map(value_join_key) {
                table.entry(key).or_default().push(i);
            }
        }
        'probe: for probe_row in probe {
            deadline.check()?;
            let Some(key) = probe_row.get_path(probe_field).map(value_join_key) else {
                continue;
            };
            if let Some(indices) = table.get(&key) {
                for &i in indices {
                    let (lv, rv) = if build_is_left { (&build[i], probe_row) } else { (probe_row, &build[i]) };
                    if let Some(row) = combine(q, lv, rv, runner)? {
                        joined.push(row);
                        if early_out && limit_count.map(|n| joined.len() >= n).unwrap_or(false) {
                            break 'probe;
                        }
                    }
                }
            }
        }
    } else {
        'outer: for lv in &left_rows {
            for rv in &right_rows {
                deadline.check()?;
                if let Some(row) = combine(q, lv, rv, runner)? {
                    joined.push(row);
                    if early_out && limit_count.map(|n| joined.len() >= n).unwrap_or(false) {
                        break 'outer;
                    }
                }
            }
        }
    }

    if let Some((expr, dir)) = &q.sort {
        let mut keyed: Vec<(Value, Value)> = Vec::with_capacity(joined.len());
        for row in joined {
            let ctx = join_ctx(q, &row.0, &row.1);
            let key = eval::eval(expr, &ctx, runner)?;
            keyed.push((key, Value::Array(vec![row.0, row.1])));
        }
        keyed.sort_by(|a, b| {
            let ord = a.0.partial_cmp_value(&b.0).unwrap_or(Ordering::Equal);
            if matches!(dir, SortDir::Desc) {
                ord.reverse()
            } else {
                ord
            }
        });
        joined = keyed
            .into_iter()
            .map(|(_, v)| match v {
                Value::Array(mut a) => {
                    let r = a.pop().unwrap();
                    let l = a.pop().unwrap();
                    (l, r)
                }
                _ => unreachable!(),
            })
            .collect();
    }

    if let Some((offset, count)) = q.limit {
        let start = offset as usize;
        let end = start.saturating_add(count as usize);
        joined = joined.into_iter().skip(start).take(end.saturating_sub(start)).collect();
    }

    joined.into_iter().map(|(lv, rv)| eval::eval(&q.ret, &join_ctx(q, &lv, &rv), runner)).collect()
}

fn join_ctx<'a>(q: &JoinQuery, lv: &Value, rv: &Value) -> EvalContext<'a> {
    let mut ctx = EvalContext::new();
    ctx.bind(q.for_nodes[0].var.clone(), lv.clone());
    ctx.bind(q.for_nodes[1].var.clone(), rv.clone());
    ctx
}

fn combine(q: &JoinQuery, lv: &Value, rv: &Value, runner: &dyn SubqueryRunner) -> Result<Option<(Value, Value)>> {
    let mut ctx = join_ctx(q, lv, rv);
    for (name, expr) in &q.let_nodes {
        let value = eval::eval(expr, &ctx, runner)?;
        ctx.bind(name.clone(), value);
    }
    for f in &q.other_filters {
        if !eval::truthy(&eval::eval(f, &ctx, runner)?) {
            return Ok(None);
        }
    }
    Ok(Some((lv.clone(), rv.clone())))
}

fn filtered_side(
    store: &KvStore,
    collection: &str,
    var: &str,
    filters: &[crate::ast::Expr],
    runner: &dyn SubqueryRunner,
    deadline: &Deadline,
) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for pk in super::common::scan_collection_pks(store, collection)? {
        deadline.check()?;
        let Some(entity) = super::common::fetch_entity(store, collection, &pk)? else {
            continue;
        };
        let value = super::common::entity_value(&entity);
        let mut ctx = EvalContext::new();
        ctx.bind(var.to_string(), value.clone());
        let mut keep = true;
        for f in filters {
            if !eval::truthy(&eval::eval(f, &ctx, runner)?) {
                keep = false;
                break;
            }
        }
        if keep {
            out.push(value);
        }
    }
    Ok(out)
}

fn value_join_key(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;
    use weave_core::config::StorageConfig;
    use weave_core::entity::Entity;
    use weave_primitives::index::IndexManager;

    use crate::ast::Expr;
    use crate::query::ForNode;

    struct NoSubqueries;
    impl SubqueryRunner for NoSubqueries {
        fn run(&self, _program: &crate::query::Program, _outer: &EvalContext<'_>) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    fn put(store: &KvStore, collection: &str, fields: BTreeMap<String, Value>) {
        let entity = Entity::new(collection, None, fields);
        let mut batch = weave_storage::WriteBatch::new();
        batch.put(weave_core::key::entity_key(collection, entity.uuid()), serde_json::to_vec(&entity).unwrap());
        store.write_batch(batch).unwrap();
    }

    fn field(var: &str, name: &str) -> Expr {
        Expr::FieldAccess(Box::new(Expr::Variable(var.to_string())), name.to_string())
    }

    #[test]
    fn hash_join_matches_rows_on_the_declared_key() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), StorageConfig::default()).unwrap();
        let indexes = IndexManager::new();

        put(&store, "orders", BTreeMap::from([("user_id".to_string(), Value::Int(1)), ("total".to_string(), Value::Int(10))]));
        put(&store, "orders", BTreeMap::from([("user_id".to_string(), Value::Int(2)), ("total".to_string(), Value::Int(20))]));
        put(&store, "users", BTreeMap::from([("id".to_string(), Value::Int(1)), ("name".to_string(), Value::String("ann".to_string()))]));

        let q = JoinQuery {
            for_nodes: [ForNode { var: "o".to_string(), collection: "orders".to_string() }, ForNode { var: "u".to_string(), collection: "users".to_string() }],
            join_key: Some(("user_id".to_string(), "id".to_string())),
            left_filters: vec![],
            right_filters: vec![],
            other_filters: vec![],
            let_nodes: vec![],
            sort: None,
            limit: None,
            ret: field("u", "name"),
        };
        let deadline = Deadline::none();
        let results = execute(&q, &store, &indexes, &NoSubqueries, &deadline).unwrap();
        assert_eq!(results, vec![Value::String("ann".to_string())]);
    }

    #[test]
    fn nested_loop_join_without_a_key_applies_other_filters() {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), StorageConfig::default()).unwrap();
        let indexes = IndexManager::new();

        put(&store, "a", BTreeMap::from([("n".to_string(), Value::Int(1))]));
        put(&store, "b", BTreeMap::from([("n".to_string(), Value::Int(1))]));
        put(&store, "b", BTreeMap::from([("n".to_string(), Value::Int(2))]));

        let q = JoinQuery {
            for_nodes: [ForNode { var: "x".to_string(), collection: "a".to_string() }, ForNode { var: "y".to_string(), collection: "b".to_string() }],
            join_key: None,
            left_filters: vec![],
            right_filters: vec![],
            other_filters: vec![Expr::BinaryOp(crate::ast::BinOp::Eq, Box::new(field("x", "n")), Box::new(field("y", "n")))],
            let_nodes: vec![],
            sort: None,
            limit: None,
            ret: field("y", "n"),
        };
        let deadline = Deadline::none();
        let results = execute(&q, &store, &indexes, &NoSubqueries, &deadline).unwrap();
        assert_eq!(results, vec![Value::Int(1)]);
    }
}
