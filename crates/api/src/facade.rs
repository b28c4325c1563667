//! The embedded entry point (spec §6): one struct composing the KV
//! backbone, secondary indexes, vector indexes, the time-series store, the
//! CDC log and the query engine behind a single call surface — the teacher's
//! `facade` idiom of wrapping every primitive behind one struct, minus the
//! run/version/transaction vocabulary that doesn't apply here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use weave_concurrency::Saga;
use weave_core::config::{QueryConfig, WeaveConfig};
use weave_core::entity::Entity;
use weave_core::error::{Error, Result};
use weave_core::key;
use weave_core::value::Value;
use weave_engine::timeseries::TimeseriesStore;
use weave_primitives::cdc::{CdcLog, ChangeOp};
use weave_primitives::graph::{GraphIndex, DEFAULT_EDGE_WEIGHT};
use weave_primitives::index::{IndexDef, IndexKind, IndexManager};
use weave_search::FullTextIndex;
use weave_storage::{KvStore, WriteBatch};

use crate::vector::VectorCollection;

/// The embedded database. Cheap to clone the handles it wraps internally
/// are not exposed; callers hold one `Facade` per open data directory.
pub struct Facade {
    pub(crate) store: Arc<KvStore>,
    pub(crate) indexes: RwLock<IndexManager>,
    pub(crate) vectors: RwLock<BTreeMap<String, VectorCollection>>,
    /// Declared full-text fields per collection (spec §3 "Full-text index").
    pub(crate) fulltext: RwLock<BTreeMap<String, Vec<String>>>,
    pub(crate) timeseries: TimeseriesStore,
    pub(crate) cdc: Arc<CdcLog>,
    query_config: QueryConfig,
    data_dir: PathBuf,
}

impl Facade {
    /// Opens (or creates) a database at `data_dir` under `config`.
    pub fn open(data_dir: impl AsRef<Path>, config: WeaveConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let store = Arc::new(KvStore::open(&data_dir, config.storage)?);
        let cdc = Arc::new(CdcLog::open(&store)?);
        Ok(Facade {
            store,
            indexes: RwLock::new(IndexManager::new()),
            vectors: RwLock::new(BTreeMap::new()),
            fulltext: RwLock::new(BTreeMap::new()),
            timeseries: TimeseriesStore::new(config.timeseries),
            cdc,
            query_config: config.query,
            data_dir,
        })
    }

    /// Runs reduced-AQL `aql_text` and returns one page of results.
    pub fn execute(&self, aql_text: &str, options: weave_executor::ExecuteOptions) -> Result<weave_executor::ExecuteResult> {
        let indexes = self.indexes.read();
        weave_executor::engine::execute_with_default_full_scan(&self.store, &indexes, aql_text, options, self.query_config.allow_full_scan_default)
    }

    /// Declares `field` of `collection` as full-text indexed and backfills
    /// it from existing rows whose `field` is a string.
    pub fn fulltext_init(&self, collection: &str, field: &str) -> Result<()> {
        self.fulltext.write().entry(collection.to_string()).or_default().push(field.to_string());
        let rows = self.store.collect_prefix(&key::entity_prefix(collection))?;
        let mut batch = WriteBatch::new();
        for (_, v) in &rows {
            let entity: Entity = serde_json::from_slice(v).map_err(|e| Error::internal(format!("corrupt entity row: {e}")))?;
            if let Some(Value::String(text)) = entity.fields.get(field) {
                FullTextIndex::index_entity(&mut batch, collection, field, entity.uuid(), text);
            }
        }
        self.store.write_batch(batch)
    }

    /// Inserts a new entity, or updates one in place when `entity` carries
    /// `_key`. Returns the entity's primary key.
    pub fn upsert(&self, collection: &str, entity: Value) -> Result<String> {
        let Value::Object(mut fields) = entity else {
            return Err(Error::invalid("upsert requires a JSON object"));
        };
        let existing_uuid = match fields.get("_key") {
            Some(Value::String(uuid)) => Some(uuid.clone()),
            _ => None,
        };
        fields.remove("_key");

        let prior = match &existing_uuid {
            Some(uuid) => self.fetch_raw(collection, uuid)?,
            None => None,
        };
        let entity = Entity::new(collection, existing_uuid, fields);
        let fulltext_fields = self.fulltext.read().get(collection).cloned().unwrap_or_default();

        let mut batch = WriteBatch::new();
        batch.put(key::entity_key(collection, entity.uuid()), serde_json::to_vec(&entity)?);
        {
            let indexes = self.indexes.read();
            if let Some(prior) = &prior {
                deindex_row(&self.store, &indexes, &mut batch, collection, entity.uuid(), &prior.fields, &fulltext_fields)?;
            }
            index_row(&indexes, &mut batch, collection, entity.uuid(), &entity.fields, &fulltext_fields)?;
        }

        let op = if prior.is_some() { ChangeOp::Update } else { ChangeOp::Insert };
        let before = prior.as_ref().map(Entity::to_value);
        let after = Some(entity.to_value());
        let sequence = self.cdc.commit_with_event(&self.store, batch, collection, entity.uuid(), op, before, after)?;
        tracing::debug!(target: "weave::api", collection, pk = %entity.pk, sequence, "committed upsert");

        if self.vectors.read().contains_key(collection) {
            let mut saga = Saga::new();
            let store = Arc::clone(&self.store);
            let cdc = Arc::clone(&self.cdc);
            let indexes_snapshot = self.indexes.read().clone();
            let collection = collection.to_string();
            let fulltext_fields = fulltext_fields.clone();
            let prior = prior.clone();
            let after_entity = entity.clone();
            saga.step("vector-index-update", move || {
                revert_upsert(&store, &cdc, &indexes_snapshot, &collection, &after_entity.uuid().to_string(), prior, after_entity, &fulltext_fields)
            });

            let mut vectors = self.vectors.write();
            if let Some(coll) = vectors.get_mut(&entity.collection) {
                if let Err(e) = coll.add_entity(&entity.pk, &entity.to_value()) {
                    tracing::warn!(target: "weave::api", collection = %entity.collection, pk = %entity.pk, error = %e, "vector index update failed after commit, compensating");
                    drop(vectors);
                    saga.compensate();
                    return Err(e);
                }
            }
            drop(vectors);
            saga.commit();
        }

        Ok(entity.pk)
    }

    /// Deletes the entity at `pk` (accepts either the bare UUID or the full
    /// `collection:uuid` form). Errors if it doesn't exist.
    pub fn delete(&self, collection: &str, pk: &str) -> Result<()> {
        let uuid = pk.rsplit_once(':').map(|(_, u)| u).unwrap_or(pk);
        let Some(entity) = self.fetch_raw(collection, uuid)? else {
            return Err(Error::not_found(format!("{collection}:{uuid}")));
        };
        let fulltext_fields = self.fulltext.read().get(collection).cloned().unwrap_or_default();

        let mut batch = WriteBatch::new();
        batch.delete(key::entity_key(collection, uuid));
        {
            let indexes = self.indexes.read();
            deindex_row(&self.store, &indexes, &mut batch, collection, uuid, &entity.fields, &fulltext_fields)?;
        }

        let sequence = self.cdc.commit_with_event(&self.store, batch, collection, uuid, ChangeOp::Delete, Some(entity.to_value()), None)?;
        tracing::debug!(target: "weave::api", collection, pk = %entity.pk, sequence, "committed delete");

        if self.vectors.read().contains_key(collection) {
            let mut saga = Saga::new();
            let store = Arc::clone(&self.store);
            let cdc = Arc::clone(&self.cdc);
            let indexes_snapshot = self.indexes.read().clone();
            let collection_owned = collection.to_string();
            let fulltext_fields = fulltext_fields.clone();
            let deleted = entity.clone();
            saga.step("vector-index-removal", move || {
                revert_delete(&store, &cdc, &indexes_snapshot, &collection_owned, &deleted, &fulltext_fields)
            });

            let mut vectors = self.vectors.write();
            if let Some(coll) = vectors.get_mut(collection) {
                if let Err(e) = coll.remove_by_pk(&entity.pk) {
                    tracing::warn!(target: "weave::api", collection, pk = %entity.pk, error = %e, "vector index removal failed after commit, compensating");
                    drop(vectors);
                    saga.compensate();
                    return Err(e);
                }
            }
            drop(vectors);
            saga.commit();
        }
        Ok(())
    }

    /// Declares a secondary index and backfills it from existing rows.
    pub fn create_index(&self, kind: IndexKind, collection: &str, columns: Vec<String>) -> Result<()> {
        let def = match kind {
            IndexKind::Equality => {
                let [column] = take_one(columns, "equality")?;
                IndexDef::equality(collection, column)
            }
            IndexKind::Range => {
                let [column] = take_one(columns, "range")?;
                IndexDef::range(collection, column)
            }
            IndexKind::Composite => IndexDef::composite(collection, columns),
        };
        self.indexes.write().create_index(def);
        tracing::info!(target: "weave::api", collection, ?kind, "backfilling new index");
        self.indexes.read().rebuild(&self.store, collection)
    }

    /// Drops a previously declared index.
    pub fn drop_index(&self, collection: &str, columns: &[String]) -> Result<()> {
        self.indexes.write().drop_index(&self.store, collection, columns)
    }

    /// Flushes and snapshots the store (plus every configured vector index)
    /// to `dir`.
    pub fn checkpoint(&self, dir: impl AsRef<Path>) -> Result<()> {
        self.store.checkpoint(&dir)?;
        for coll in self.vectors.read().values() {
            coll.save_if_configured()?;
        }
        tracing::info!(target: "weave::api", dir = %dir.as_ref().display(), "checkpoint complete");
        Ok(())
    }

    /// Restores the store from a prior [`Facade::checkpoint`].
    pub fn restore(&self, dir: impl AsRef<Path>) -> Result<()> {
        self.store.restore(dir)
    }

    /// Allocates (or reloads) a collection's vector index.
    pub fn vector_init(&self, collection: &str, config: weave_core::config::VectorConfig, vector_field: &str) -> Result<()> {
        let coll = VectorCollection::init(config, vector_field)?;
        self.vectors.write().insert(collection.to_string(), coll);
        Ok(())
    }

    /// Nearest-neighbor search against a previously initialized collection.
    pub fn vector_search(&self, collection: &str, query: &[f32], k: usize, whitelist: Option<&[String]>) -> Result<Vec<weave_engine::vector::SearchHit>> {
        let vectors = self.vectors.read();
        let coll = vectors.get(collection).ok_or_else(|| Error::not_found(format!("no vector index for '{collection}'")))?;
        coll.search(query, k, whitelist)
    }

    /// The directory this facade was opened against.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn fetch_raw(&self, collection: &str, uuid: &str) -> Result<Option<Entity>> {
        match self.store.get(&key::entity_key(collection, uuid))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Queues index/full-text/graph-adjacency maintenance for inserting `fields`
/// under `pk` into `batch`, alongside the entity row write.
fn index_row(
    indexes: &IndexManager,
    batch: &mut WriteBatch,
    collection: &str,
    pk: &str,
    fields: &BTreeMap<String, Value>,
    fulltext_fields: &[String],
) -> Result<()> {
    indexes.index_insert(batch, collection, pk, fields)?;
    for field in fulltext_fields {
        if let Some(Value::String(text)) = fields.get(field) {
            FullTextIndex::index_entity(batch, collection, field, pk, text);
        }
    }
    if let (Some(Value::String(from)), Some(Value::String(to))) = (fields.get("from"), fields.get("to")) {
        GraphIndex::edge_insert(batch, from, to, pk, edge_weight(fields));
    }
    Ok(())
}

/// The inverse of [`index_row`]: removes everything it would have added.
fn deindex_row(
    store: &KvStore,
    indexes: &IndexManager,
    batch: &mut WriteBatch,
    collection: &str,
    pk: &str,
    fields: &BTreeMap<String, Value>,
    fulltext_fields: &[String],
) -> Result<()> {
    indexes.index_delete(batch, collection, pk, fields)?;
    for field in fulltext_fields {
        FullTextIndex::remove_entity(batch, store, collection, field, pk)?;
    }
    if let (Some(Value::String(from)), Some(Value::String(to))) = (fields.get("from"), fields.get("to")) {
        GraphIndex::edge_delete(batch, from, to, pk);
    }
    Ok(())
}

fn edge_weight(fields: &BTreeMap<String, Value>) -> f64 {
    match fields.get("weight") {
        Some(Value::Double(w)) => *w,
        Some(Value::Int(w)) => *w as f64,
        _ => DEFAULT_EDGE_WEIGHT,
    }
}

/// Compensating action for a committed upsert whose subsequent vector-index
/// maintenance failed: restores the prior row (or deletes a brand-new one),
/// as its own CDC event.
fn revert_upsert(
    store: &KvStore,
    cdc: &CdcLog,
    indexes: &IndexManager,
    collection: &str,
    uuid: &str,
    prior: Option<Entity>,
    after: Entity,
    fulltext_fields: &[String],
) -> Result<()> {
    let mut batch = WriteBatch::new();
    deindex_row(store, indexes, &mut batch, collection, uuid, &after.fields, fulltext_fields)?;
    let (op, before, new_value) = match &prior {
        Some(prior) => {
            batch.put(key::entity_key(collection, uuid), serde_json::to_vec(prior)?);
            index_row(indexes, &mut batch, collection, uuid, &prior.fields, fulltext_fields)?;
            (ChangeOp::Update, Some(after.to_value()), Some(prior.to_value()))
        }
        None => {
            batch.delete(key::entity_key(collection, uuid));
            (ChangeOp::Delete, Some(after.to_value()), None)
        }
    };
    cdc.commit_with_event(store, batch, collection, uuid, op, before, new_value)?;
    Ok(())
}

/// Compensating action for a committed delete whose subsequent vector-index
/// removal failed: re-inserts the deleted row as its own CDC event.
fn revert_delete(store: &KvStore, cdc: &CdcLog, indexes: &IndexManager, collection: &str, deleted: &Entity, fulltext_fields: &[String]) -> Result<()> {
    let mut batch = WriteBatch::new();
    batch.put(key::entity_key(collection, deleted.uuid()), serde_json::to_vec(deleted)?);
    index_row(indexes, &mut batch, collection, deleted.uuid(), &deleted.fields, fulltext_fields)?;
    cdc.commit_with_event(store, batch, collection, deleted.uuid(), ChangeOp::Insert, None, Some(deleted.to_value()))?;
    Ok(())
}

fn take_one(mut columns: Vec<String>, kind: &str) -> Result<[String; 1]> {
    if columns.len() != 1 {
        return Err(Error::invalid(format!("{kind} index requires exactly one column")));
    }
    Ok([columns.remove(0)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn facade() -> (tempfile::TempDir, Facade) {
        let dir = tempdir().unwrap();
        let facade = Facade::open(dir.path(), WeaveConfig::default()).unwrap();
        (dir, facade)
    }

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::Object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn upsert_then_query_round_trips_through_the_query_engine() {
        let (_d, db) = facade();
        db.upsert("users", obj(&[("name", Value::String("ann".to_string()))])).unwrap();
        let mut options = weave_executor::ExecuteOptions::default();
        options.allow_full_scan = Some(true);
        let result = db.execute("FOR u IN users RETURN u.name", options).unwrap();
        assert_eq!(result.items, vec![Value::String("ann".to_string())]);
    }

    #[test]
    fn upsert_with_an_existing_key_updates_in_place_and_delete_removes_it() {
        let (_d, db) = facade();
        let pk = db.upsert("users", obj(&[("name", Value::String("ann".to_string()))])).unwrap();
        let uuid = pk.rsplit_once(':').unwrap().1.to_string();

        db.upsert("users", obj(&[("_key", Value::String(uuid.clone())), ("name", Value::String("annette".to_string()))])).unwrap();
        let mut options = weave_executor::ExecuteOptions::default();
        options.allow_full_scan = Some(true);
        let result = db.execute("FOR u IN users RETURN u.name", options.clone()).unwrap();
        assert_eq!(result.items, vec![Value::String("annette".to_string())]);

        db.delete("users", &uuid).unwrap();
        let result = db.execute("FOR u IN users RETURN u.name", options).unwrap();
        assert!(result.items.is_empty());
    }

    #[test]
    fn create_index_backfills_existing_rows() {
        let (_d, db) = facade();
        db.upsert("users", obj(&[("country", Value::String("US".to_string()))])).unwrap();
        db.create_index(IndexKind::Equality, "users", vec!["country".to_string()]).unwrap();
        let matches = db.indexes.read().lookup_equality(&db.store, "users", "country", &Value::String("US".to_string())).unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn delete_of_an_unknown_pk_is_a_not_found_error() {
        let (_d, db) = facade();
        assert!(db.delete("users", "nonexistent").is_err());
    }

    #[test]
    fn fulltext_init_backfills_and_upsert_keeps_the_index_current() {
        let (_d, db) = facade();
        db.upsert("articles", obj(&[("body", Value::String("the quick brown fox".to_string()))])).unwrap();
        db.fulltext_init("articles", "body").unwrap();
        db.upsert("articles", obj(&[("body", Value::String("a slow green turtle".to_string()))])).unwrap();

        let mut options = weave_executor::ExecuteOptions::default();
        options.allow_full_scan = Some(true);
        let result = db.execute("FOR a IN articles FILTER FULLTEXT(a.body, \"fox\") RETURN a.body", options).unwrap();
        assert_eq!(result.items, vec![Value::String("the quick brown fox".to_string())]);
    }

    #[test]
    fn upsert_of_an_edge_entity_makes_it_traversable() {
        let (_d, db) = facade();
        let a = db.upsert("people", obj(&[("name", Value::String("ann".to_string()))])).unwrap();
        let b = db.upsert("people", obj(&[("name", Value::String("bo".to_string()))])).unwrap();
        let a_uuid = a.rsplit_once(':').unwrap().1.to_string();
        let b_uuid = b.rsplit_once(':').unwrap().1.to_string();
        db.upsert("knows", obj(&[("from", Value::String(a_uuid.clone())), ("to", Value::String(b_uuid.clone())), ("weight", Value::Double(2.0))]))
            .unwrap();

        let out = GraphIndex::neighbors(&db.store, &a_uuid, weave_primitives::graph::Direction::Out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, b_uuid);
    }
}
