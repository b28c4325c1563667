//! Disjunctive execution (spec §4.6.2): union the candidate sets of every
//! DNF disjunct with deduplication, then fetch and post-filter.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use weave_core::deadline::Deadline;
use weave_core::error::Result;
use weave_core::value::Value;
use weave_primitives::index::{IndexKind, IndexManager};
use weave_storage::KvStore;

use crate::ast::Expr;
use crate::eval::{self, EvalContext, SubqueryRunner};
use crate::query::{DisjunctiveQuery, SortDir};

/// Runs a [`DisjunctiveQuery`] end to end.
pub fn execute(q: &DisjunctiveQuery, store: &KvStore, indexes: &IndexManager, runner: &dyn SubqueryRunner, deadline: &Deadline) -> Result<Vec<Value>> {
    let mut seen = BTreeSet::new();
    let mut candidates = Vec::new();
    for disjunct in &q.disjuncts {
        deadline.check()?;
        for pk in candidate_pks_for(disjunct, &q.collection, store, indexes)? {
            if seen.insert(pk.clone()) {
                candidates.push(pk);
            }
        }
    }

    let mut rows = Vec::new();
    for pk in candidates {
        deadline.check()?;
        let Some(entity) = super::common::fetch_entity(store, &q.collection, &pk)? else {
            continue;
        };
        let var_value = super::common::entity_value(&entity);
        if let Some(filter) = &q.post_filter {
            let mut ctx = EvalContext::new();
            ctx.bind(q.var.clone(), var_value.clone());
            if !eval::truthy(&eval::eval(filter, &ctx, runner)?) {
                continue;
            }
        }
        rows.push(var_value);
    }

    if let Some((field, dir)) = &q.order_by {
        rows.sort_by(|a, b| {
            let ord = a.get_path(field).zip(b.get_path(field)).and_then(|(x, y)| x.partial_cmp_value(y)).unwrap_or(Ordering::Equal);
            if matches!(dir, SortDir::Desc) {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    if let Some((offset, count)) = q.limit {
        let start = offset as usize;
        let end = start.saturating_add(count as usize);
        rows = rows.into_iter().skip(start).take(end.saturating_sub(start)).collect();
    }

    rows.into_iter()
        .map(|var_value| {
            let mut ctx = EvalContext::new();
            ctx.bind(q.var.clone(), var_value);
            eval::eval(&q.ret, &ctx, runner)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;
    use weave_core::config::StorageConfig;
    use weave_core::entity::Entity;
    use weave_primitives::index::IndexDef;

    struct NoSubqueries;
    impl SubqueryRunner for NoSubqueries {
        fn run(&self, _program: &crate::query::Program, _outer: &EvalContext<'_>) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    fn store_with(rows: &[(&str, &str)]) -> (tempfile::TempDir, KvStore, IndexManager) {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), StorageConfig::default()).unwrap();
        let mut mgr = IndexManager::new();
        mgr.create_index(IndexDef::equality("users", "country"));
        for (name, country) in rows {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), Value::String(name.to_string()));
            fields.insert("country".to_string(), Value::String(country.to_string()));
            let entity = Entity::new("users", None, fields);
            let mut batch = weave_storage::WriteBatch::new();
            batch.put(weave_core::key::entity_key("users", entity.uuid()), serde_json::to_vec(&entity).unwrap());
            mgr.index_insert(&mut batch, "users", entity.uuid(), &entity.fields).unwrap();
            store.write_batch(batch).unwrap();
        }
        (dir, store, mgr)
    }

    fn eq_disjunct(field: &str, value: &str) -> Disjunct {
        vec![(field.to_string(), Expr::Literal(Value::String(value.to_string())))]
    }

    #[test]
    fn unions_disjuncts_without_duplicates() {
        let (_d, store, mgr) = store_with(&[("ann", "US"), ("bo", "FR"), ("cy", "DE")]);
        let q = DisjunctiveQuery {
            var: "u".to_string(),
            collection: "users".to_string(),
            disjuncts: vec![eq_disjunct("country", "US"), eq_disjunct("country", "FR")],
            post_filter: None,
            order_by: Some(("name".to_string(), SortDir::Asc)),
            limit: None,
            ret: Expr::FieldAccess(Box::new(Expr::Variable("u".to_string())), "name".to_string()),
        };
        let deadline = Deadline::none();
        let results = execute(&q, &store, &mgr, &NoSubqueries, &deadline).unwrap();
        assert_eq!(results, vec![Value::String("ann".to_string()), Value::String("bo".to_string())]);
    }

    #[test]
    fn a_row_matching_two_disjuncts_is_not_duplicated() {
        let (_d, store, mgr) = store_with(&[("ann", "US")]);
        let q = DisjunctiveQuery {
            var: "u".to_string(),
            collection: "users".to_string(),
            disjuncts: vec![eq_disjunct("country", "US"), eq_disjunct("country", "US")],
            post_filter: None,
            order_by: None,
            limit: None,
            ret: Expr::FieldAccess(Box::new(Expr::Variable("u".to_string())), "name".to_string()),
        };
        let deadline = Deadline::none();
        let results = execute(&q, &store, &mgr, &NoSubqueries, &deadline).unwrap();
        assert_eq!(results, vec![Value::String("ann".to_string())]);
    }
}

fn candidate_pks_for(disjunct: &[(String, Expr)], collection: &str, store: &KvStore, indexes: &IndexManager) -> Result<Vec<String>> {
    // Every atom in a conjunct must hold; use the first indexed atom to
    // drive the scan and post-filter the rest.
    let mut chosen: Option<(&str, &Value)> = None;
    let literals: Vec<(&str, Option<&Value>)> = disjunct
        .iter()
        .map(|(field, expr)| (field.as_str(), if let Expr::Literal(v) = expr { Some(v) } else { None }))
        .collect();
    for (field, value) in &literals {
        if let Some(value) = value {
            if indexes.indexes_for(collection).iter().any(|d| d.kind == IndexKind::Equality && d.columns == [field.to_string()]) {
                chosen = Some((field, value));
                break;
            }
        }
    }
    let base = match chosen {
        Some((field, value)) => indexes.lookup_equality(store, collection, field, value)?,
        None => super::common::scan_collection_pks(store, collection)?,
    };

    if disjunct.len() <= 1 {
        return Ok(base);
    }
    let mut out = Vec::new();
    for pk in base {
        let Some(entity) = super::common::fetch_entity(store, collection, &pk)? else {
            continue;
        };
        let value = super::common::entity_value(&entity);
        let all_match = literals.iter().all(|(field, expected)| match expected {
            Some(expected) => value.get_path(field).map(|actual| actual.json_eq(expected)).unwrap_or(false),
            None => true,
        });
        if all_match {
            out.push(pk);
        }
    }
    Ok(out)
}
