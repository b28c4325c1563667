//! Secondary index manager: equality, range and composite indexes layered
//! on the flat KV keyspace (spec §4.2).
//!
//! Grounded on the teacher's index/registry split in `strata-storage`: an
//! index is nothing more than a derived key-space the manager keeps in sync
//! with entity writes, looked up by scanning a prefix rather than following
//! pointers.

use weave_core::error::{Error, Result};
use weave_core::key;
use weave_core::value::Value;
use weave_storage::{KvStore, WriteBatch};

/// The shape of a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Exact-match lookup on one column.
    Equality,
    /// Ordered range lookup on one column.
    Range,
    /// Exact-match lookup on an ordered tuple of columns (full prefix only —
    /// spec §4.2's Open Question on partial-prefix lookups is resolved in
    /// favor of the simpler, documented behavior: no partial-prefix scans).
    Composite,
}

/// One declared secondary index.
#[derive(Debug, Clone)]
pub struct IndexDef {
    /// Collection the index is defined over.
    pub collection: String,
    /// Column name (equality/range) or comma-joined column list (composite).
    pub columns: Vec<String>,
    /// Index shape.
    pub kind: IndexKind,
}

impl IndexDef {
    /// A single-column equality index.
    pub fn equality(collection: impl Into<String>, column: impl Into<String>) -> Self {
        IndexDef {
            collection: collection.into(),
            columns: vec![column.into()],
            kind: IndexKind::Equality,
        }
    }

    /// A single-column range index.
    pub fn range(collection: impl Into<String>, column: impl Into<String>) -> Self {
        IndexDef {
            collection: collection.into(),
            columns: vec![column.into()],
            kind: IndexKind::Range,
        }
    }

    /// A composite index over an ordered column list.
    pub fn composite(collection: impl Into<String>, columns: Vec<String>) -> Self {
        IndexDef {
            collection: collection.into(),
            columns,
            kind: IndexKind::Composite,
        }
    }

    fn column(&self) -> &str {
        &self.columns[0]
    }
}

/// Maintains the declared set of secondary indexes for a store and keeps
/// them consistent with entity writes.
#[derive(Default, Clone)]
pub struct IndexManager {
    indexes: Vec<IndexDef>,
}

impl IndexManager {
    /// An index manager with no indexes declared.
    pub fn new() -> Self {
        IndexManager::default()
    }

    /// Declare an index. Does not backfill existing rows; see
    /// [`IndexManager::rebuild`].
    pub fn create_index(&mut self, def: IndexDef) {
        self.indexes.retain(|d| !same_index(d, &def));
        self.indexes.push(def);
    }

    /// Remove a declared index and delete its key-space from `store`.
    pub fn drop_index(&mut self, store: &KvStore, collection: &str, columns: &[String]) -> Result<()> {
        let Some(pos) = self
            .indexes
            .iter()
            .position(|d| d.collection == collection && d.columns == columns)
        else {
            return Err(Error::not_found(format!(
                "no index on {collection}.{}",
                columns.join(",")
            )));
        };
        let def = self.indexes.remove(pos);
        let scope = match def.kind {
            IndexKind::Equality => key::equality_index_scope(&def.collection, def.column()),
            IndexKind::Range => key::range_index_scope(&def.collection, def.column()),
            IndexKind::Composite => key::composite_index_scope(&def.collection, &def.columns),
        };
        let rows = store.collect_prefix(&scope)?;
        let mut batch = WriteBatch::new();
        for (k, _v) in rows {
            batch.delete(k);
        }
        store.write_batch(batch)
    }

    /// Declared indexes over `collection`.
    pub fn indexes_for(&self, collection: &str) -> Vec<&IndexDef> {
        self.indexes.iter().filter(|d| d.collection == collection).collect()
    }

    /// Queue the index-maintenance ops for inserting `fields` under `pk`
    /// into `batch`. Called by the facade alongside the entity row write, in
    /// the same atomic batch.
    pub fn index_insert(
        &self,
        batch: &mut WriteBatch,
        collection: &str,
        pk: &str,
        fields: &std::collections::BTreeMap<String, Value>,
    ) -> Result<()> {
        for def in self.indexes_for(collection) {
            if let Some(key_bytes) = build_index_key(def, fields, pk)? {
                batch.put(key_bytes, Vec::new());
            }
        }
        Ok(())
    }

    /// Queue the index-maintenance ops for removing `fields` (the entity's
    /// prior state) under `pk` from `batch`.
    pub fn index_delete(
        &self,
        batch: &mut WriteBatch,
        collection: &str,
        pk: &str,
        fields: &std::collections::BTreeMap<String, Value>,
    ) -> Result<()> {
        for def in self.indexes_for(collection) {
            if let Some(key_bytes) = build_index_key(def, fields, pk)? {
                batch.delete(key_bytes);
            }
        }
        Ok(())
    }

    /// Equality lookup: every pk whose `column` equals `value`.
    pub fn lookup_equality(
        &self,
        store: &KvStore,
        collection: &str,
        column: &str,
        value: &Value,
    ) -> Result<Vec<String>> {
        let prefix = key::equality_index_prefix(collection, column, &key::encode_equality(value));
        let mut out = Vec::new();
        store.scan_prefix(&prefix, |k, _v| {
            out.push(pk_suffix(k));
            true
        })?;
        Ok(out)
    }

    /// Range lookup: every pk whose `column` falls in `[lower, upper)`
    /// (either bound may be `None` for unbounded).
    pub fn lookup_range(
        &self,
        store: &KvStore,
        collection: &str,
        column: &str,
        lower: Option<&Value>,
        upper: Option<&Value>,
    ) -> Result<Vec<String>> {
        let scope = key::range_index_scope(collection, column);
        let lower_bytes = lower.map(key::encode_sortable).transpose()?;
        let upper_bytes = upper.map(key::encode_sortable).transpose()?;
        let mut out = Vec::new();
        store.scan_prefix(&scope, |k, _v| {
            let encoded = &k[scope.len()..];
            if let Some(lb) = &lower_bytes {
                if encoded < lb.as_slice() {
                    return true;
                }
            }
            if let Some(ub) = &upper_bytes {
                if encoded >= ub.as_slice() {
                    return true;
                }
            }
            out.push(pk_suffix(k));
            true
        })?;
        Ok(out)
    }

    /// Composite-index lookup: exact match over the full column tuple only
    /// (spec §4.2 Open Question, decided: no partial-prefix lookups).
    pub fn lookup_composite(
        &self,
        store: &KvStore,
        collection: &str,
        columns: &[String],
        values: &[Value],
    ) -> Result<Vec<String>> {
        if columns.len() != values.len() {
            return Err(Error::invalid("composite lookup requires one value per column"));
        }
        let encoded = encode_composite(values)?;
        let prefix = key::composite_index_prefix(collection, columns, &encoded);
        let mut out = Vec::new();
        store.scan_prefix(&prefix, |k, _v| {
            out.push(pk_suffix(k));
            true
        })?;
        Ok(out)
    }

    /// Probes equality selectivity for `column == value` by counting
    /// matches, capped at `max_probe`. Returns `(count, capped)`.
    pub fn estimate_count_equal(&self, store: &KvStore, collection: &str, column: &str, value: &Value, max_probe: usize) -> Result<(usize, bool)> {
        let prefix = key::equality_index_prefix(collection, column, &key::encode_equality(value));
        count_prefix(store, &prefix, max_probe)
    }

    /// Probes composite-index selectivity for the full column tuple,
    /// capped at `max_probe`. Returns `(count, capped)`.
    pub fn estimate_count_equal_composite(&self, store: &KvStore, collection: &str, columns: &[String], values: &[Value], max_probe: usize) -> Result<(usize, bool)> {
        if columns.len() != values.len() {
            return Err(Error::invalid("composite estimate requires one value per column"));
        }
        let encoded = encode_composite(values)?;
        let prefix = key::composite_index_prefix(collection, columns, &encoded);
        count_prefix(store, &prefix, max_probe)
    }

    /// Rebuild every declared index over `collection` from its current
    /// entity rows. Used after `create_index` on a non-empty collection.
    pub fn rebuild(&self, store: &KvStore, collection: &str) -> Result<()> {
        let rows = store.collect_prefix(&key::entity_prefix(collection))?;
        let mut batch = WriteBatch::new();
        for (k, v) in &rows {
            let pk = String::from_utf8_lossy(&k[("ent:".len() + collection.len() + 1)..]).to_string();
            let entity: weave_core::entity::Entity = serde_json::from_slice(v)
                .map_err(|e| Error::internal(format!("corrupt entity row: {e}")))?;
            self.index_insert(&mut batch, collection, &pk, &entity.fields)?;
        }
        store.write_batch(batch)
    }
}

fn count_prefix(store: &KvStore, prefix: &[u8], max_probe: usize) -> Result<(usize, bool)> {
    let mut count = 0usize;
    let mut capped = false;
    store.scan_prefix(prefix, |_k, _v| {
        count += 1;
        if count >= max_probe {
            capped = true;
            return false;
        }
        true
    })?;
    Ok((count, capped))
}

fn same_index(a: &IndexDef, b: &IndexDef) -> bool {
    a.collection == b.collection && a.columns == b.columns && a.kind == b.kind
}

fn build_index_key(
    def: &IndexDef,
    fields: &std::collections::BTreeMap<String, Value>,
    pk: &str,
) -> Result<Option<Vec<u8>>> {
    match def.kind {
        IndexKind::Equality => {
            let Some(value) = fields.get(def.column()) else {
                return Ok(None);
            };
            let encoded = key::encode_equality(value);
            Ok(Some(key::equality_index_key(&def.collection, def.column(), &encoded, pk)))
        }
        IndexKind::Range => {
            let Some(value) = fields.get(def.column()) else {
                return Ok(None);
            };
            let encoded = key::encode_sortable(value)?;
            Ok(Some(key::range_index_key(&def.collection, def.column(), &encoded, pk)))
        }
        IndexKind::Composite => {
            let mut values = Vec::with_capacity(def.columns.len());
            for col in &def.columns {
                match fields.get(col) {
                    Some(v) => values.push(v.clone()),
                    None => return Ok(None),
                }
            }
            let encoded = encode_composite(&values)?;
            Ok(Some(key::composite_index_key(&def.collection, &def.columns, &encoded, pk)))
        }
    }
}

fn encode_composite(values: &[Value]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(key::COMPOSITE_SEPARATOR);
        }
        out.extend(key::encode_sortable(v)?);
    }
    Ok(out)
}

fn pk_suffix(key_bytes: &[u8]) -> String {
    let pos = key_bytes
        .iter()
        .rposition(|&b| b == key::COMPOSITE_SEPARATOR)
        .map(|p| p + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&key_bytes[pos..]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use weave_core::config::StorageConfig;

    fn store() -> (tempfile::TempDir, KvStore) {
        let dir = tempdir().unwrap();
        let store = KvStore::open(dir.path(), StorageConfig::default()).unwrap();
        (dir, store)
    }

    fn fields(pairs: &[(&str, Value)]) -> std::collections::BTreeMap<String, Value> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn equality_lookup_finds_matching_pk() {
        let (_d, store) = store();
        let mut mgr = IndexManager::new();
        mgr.create_index(IndexDef::equality("users", "status"));

        let mut batch = WriteBatch::new();
        mgr.index_insert(&mut batch, "users", "pk1", &fields(&[("status", Value::from("active"))]))
            .unwrap();
        store.write_batch(batch).unwrap();

        let hits = mgr
            .lookup_equality(&store, "users", "status", &Value::from("active"))
            .unwrap();
        assert_eq!(hits, vec!["pk1".to_string()]);
    }

    #[test]
    fn range_lookup_respects_bounds() {
        let (_d, store) = store();
        let mut mgr = IndexManager::new();
        mgr.create_index(IndexDef::range("events", "ts"));

        let mut batch = WriteBatch::new();
        for (pk, ts) in [("a", 1i64), ("b", 5), ("c", 10)] {
            mgr.index_insert(&mut batch, "events", pk, &fields(&[("ts", Value::Int(ts))]))
                .unwrap();
        }
        store.write_batch(batch).unwrap();

        let hits = mgr
            .lookup_range(&store, "events", "ts", Some(&Value::Int(2)), Some(&Value::Int(10)))
            .unwrap();
        assert_eq!(hits, vec!["b".to_string()]);
    }

    #[test]
    fn composite_lookup_requires_full_tuple_match() {
        let (_d, store) = store();
        let mut mgr = IndexManager::new();
        mgr.create_index(IndexDef::composite("orders", vec!["region".into(), "status".into()]));

        let mut batch = WriteBatch::new();
        mgr.index_insert(
            &mut batch,
            "orders",
            "pk1",
            &fields(&[("region", Value::from("eu")), ("status", Value::from("open"))]),
        )
        .unwrap();
        store.write_batch(batch).unwrap();

        let hits = mgr
            .lookup_composite(
                &store,
                "orders",
                &["region".to_string(), "status".to_string()],
                &[Value::from("eu"), Value::from("open")],
            )
            .unwrap();
        assert_eq!(hits, vec!["pk1".to_string()]);
    }

    #[test]
    fn index_delete_removes_the_entry() {
        let (_d, store) = store();
        let mut mgr = IndexManager::new();
        mgr.create_index(IndexDef::equality("users", "status"));

        let f = fields(&[("status", Value::from("active"))]);
        let mut batch = WriteBatch::new();
        mgr.index_insert(&mut batch, "users", "pk1", &f).unwrap();
        store.write_batch(batch).unwrap();

        let mut batch = WriteBatch::new();
        mgr.index_delete(&mut batch, "users", "pk1", &f).unwrap();
        store.write_batch(batch).unwrap();

        let hits = mgr.lookup_equality(&store, "users", "status", &Value::from("active")).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn estimate_count_equal_caps_at_max_probe() {
        let (_d, store) = store();
        let mut mgr = IndexManager::new();
        mgr.create_index(IndexDef::equality("users", "status"));
        let mut batch = WriteBatch::new();
        for i in 0..5 {
            mgr.index_insert(&mut batch, "users", &format!("pk{i}"), &fields(&[("status", Value::from("active"))])).unwrap();
        }
        store.write_batch(batch).unwrap();

        let (count, capped) = mgr.estimate_count_equal(&store, "users", "status", &Value::from("active"), 3).unwrap();
        assert_eq!(count, 3);
        assert!(capped);

        let (count, capped) = mgr.estimate_count_equal(&store, "users", "status", &Value::from("active"), 10).unwrap();
        assert_eq!(count, 5);
        assert!(!capped);
    }

    #[test]
    fn estimate_count_equal_composite_counts_full_tuple_matches() {
        let (_d, store) = store();
        let mut mgr = IndexManager::new();
        mgr.create_index(IndexDef::composite("orders", vec!["region".into(), "status".into()]));
        let mut batch = WriteBatch::new();
        mgr.index_insert(&mut batch, "orders", "pk1", &fields(&[("region", Value::from("eu")), ("status", Value::from("open"))])).unwrap();
        mgr.index_insert(&mut batch, "orders", "pk2", &fields(&[("region", Value::from("eu")), ("status", Value::from("open"))])).unwrap();
        store.write_batch(batch).unwrap();

        let (count, capped) = mgr
            .estimate_count_equal_composite(&store, "orders", &["region".to_string(), "status".to_string()], &[Value::from("eu"), Value::from("open")], 100)
            .unwrap();
        assert_eq!(count, 2);
        assert!(!capped);
    }

    #[test]
    fn drop_index_clears_its_keyspace() {
        let (_d, store) = store();
        let mut mgr = IndexManager::new();
        mgr.create_index(IndexDef::equality("users", "status"));
        let mut batch = WriteBatch::new();
        mgr.index_insert(&mut batch, "users", "pk1", &fields(&[("status", Value::from("active"))]))
            .unwrap();
        store.write_batch(batch).unwrap();

        mgr.drop_index(&store, "users", &["status".to_string()]).unwrap();
        let remaining = store.collect_prefix(b"idx:eq:users:status:").unwrap();
        assert!(remaining.is_empty());
    }
}
