//! Helpers shared by every execution engine: entity fetch/scan and binding
//! rows into an [`EvalContext`].

use weave_core::entity::Entity;
use weave_core::error::{Error, Result};
use weave_core::key;
use weave_core::value::Value;
use weave_storage::KvStore;

/// Fetches and deserializes one entity row, if present.
pub fn fetch_entity(store: &KvStore, collection: &str, pk: &str) -> Result<Option<Entity>> {
    let Some(bytes) = store.get(&key::entity_key(collection, pk))? else {
        return Ok(None);
    };
    let entity: Entity = serde_json::from_slice(&bytes).map_err(|e| Error::internal(format!("corrupt entity row: {e}")))?;
    Ok(Some(entity))
}

/// Fetches an entity addressed by its full `{collection}:{uuid}` primary
/// key, as stored in graph adjacency rows.
pub fn fetch_entity_by_pk(store: &KvStore, pk: &str) -> Result<Option<Entity>> {
    let Some((collection, uuid)) = pk.split_once(':') else {
        return Ok(None);
    };
    fetch_entity(store, collection, uuid)
}

/// Every primary key (bare uuid) stored under `collection`.
pub fn scan_collection_pks(store: &KvStore, collection: &str) -> Result<Vec<String>> {
    let prefix = key::entity_prefix(collection);
    let rows = store.collect_prefix(&prefix)?;
    Ok(rows.into_iter().map(|(k, _v)| String::from_utf8_lossy(&k[prefix.len()..]).to_string()).collect())
}

/// Projects `entity` as the `Value` bound to its loop variable.
pub fn entity_value(entity: &Entity) -> Value {
    entity.to_value()
}
