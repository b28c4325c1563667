//! Vector index operations (spec §4.3, §6 `vector_init`/`vector_search`).
//!
//! One [`weave_engine::vector::HnswIndex`] per collection, held behind its
//! own lock so readers stay concurrent while writers (`vector_init`, and
//! the index maintenance folded into [`crate::facade::Facade::upsert`] /
//! [`crate::facade::Facade::delete`]) serialize, matching the "process-wide
//! shared singleton per collection" resource rule.

use std::path::Path;

use weave_core::config::VectorConfig;
use weave_core::error::{Error, Result};
use weave_core::value::Value;
use weave_engine::vector::{self, HnswIndex, SearchHit};

/// One collection's vector index plus the bookkeeping `vector_init` needs
/// (which entity field carries the embedding, and where to persist).
pub struct VectorCollection {
    pub(crate) index: HnswIndex,
    pub(crate) config: VectorConfig,
    pub(crate) field: String,
}

impl VectorCollection {
    /// Allocates a new index, or restores one from `config.save_path` when
    /// `load_on_startup` is set and the file exists (spec §4.3 `init`).
    pub fn init(config: VectorConfig, field: impl Into<String>) -> Result<Self> {
        let field = field.into();
        if config.dimension == 0 {
            return Err(Error::invalid("vector_init requires a non-zero dimension"));
        }
        let loaded = match &config.save_path {
            Some(path) if config.load_on_startup && Path::new(path).exists() => Some(vector::load(path)?),
            _ => None,
        };
        let index = match loaded {
            Some(index) => {
                if index.dimension() != config.dimension || index.metric() != config.metric {
                    return Err(Error::invalid(format!(
                        "saved index at {:?} has dimension/metric {}/{:?}, configuration requested {}/{:?}",
                        config.save_path,
                        index.dimension(),
                        index.metric(),
                        config.dimension,
                        config.metric
                    )));
                }
                index
            }
            None => HnswIndex::new(config.dimension, config.metric, config.hnsw_m, config.hnsw_ef_construction, config.ef_search),
        };
        Ok(VectorCollection { index, config, field })
    }

    /// Extracts the configured vector field from `entity` and indexes it
    /// under `pk`, replacing any prior vector for the same `pk`.
    pub fn add_entity(&mut self, pk: &str, entity: &Value) -> Result<()> {
        let Some(Value::Array(items)) = entity.get_path(&self.field) else {
            return Ok(());
        };
        let mut vec = Vec::with_capacity(items.len());
        for item in items {
            let n = item.as_f64().ok_or_else(|| Error::invalid(format!("vector field '{}' must hold only numbers", self.field)))?;
            vec.push(n as f32);
        }
        self.index.insert(pk, vec)
    }

    /// Removes `pk` from the index, a no-op if it was never indexed.
    pub fn remove_by_pk(&mut self, pk: &str) -> Result<()> {
        self.index.remove_by_pk(pk)
    }

    /// Top-`k` nearest neighbors, optionally restricted to `whitelist`.
    /// Over-fetches when a whitelist is given so filtering still leaves
    /// close to `k` results (spec §4.3 `search_knn`).
    pub fn search(&self, query: &[f32], k: usize, whitelist: Option<&[String]>) -> Result<Vec<SearchHit>> {
        let Some(allowed) = whitelist else {
            return self.index.search(query, k);
        };
        let k_prime = k.max(allowed.len().min(4 * k.max(1)));
        let hits = self.index.search(query, k_prime)?;
        let allowed: std::collections::HashSet<&str> = allowed.iter().map(String::as_str).collect();
        Ok(hits.into_iter().filter(|h| allowed.contains(h.pk.as_str())).take(k).collect())
    }

    /// Persists the index to `config.save_path`, if one is configured.
    pub fn save_if_configured(&self) -> Result<()> {
        if let Some(path) = &self.config.save_path {
            vector::save(&self.index, path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::config::DistanceMetric;

    fn cfg(dim: usize) -> VectorConfig {
        VectorConfig { object_name: "docs".to_string(), dimension: dim, metric: DistanceMetric::L2, ..VectorConfig::default() }
    }

    #[test]
    fn add_entity_extracts_the_configured_field() {
        let mut coll = VectorCollection::init(cfg(2), "embedding").unwrap();
        let entity = Value::Object(std::collections::BTreeMap::from([(
            "embedding".to_string(),
            Value::Array(vec![Value::Double(1.0), Value::Double(2.0)]),
        )]));
        coll.add_entity("docs:a", &entity).unwrap();
        let hits = coll.search(&[1.0, 2.0], 1, None).unwrap();
        assert_eq!(hits[0].pk, "docs:a");
    }

    #[test]
    fn search_with_a_whitelist_filters_results() {
        let mut coll = VectorCollection::init(cfg(1), "embedding").unwrap();
        for (pk, v) in [("a", 0.0), ("b", 1.0), ("c", 2.0)] {
            let entity = Value::Object(std::collections::BTreeMap::from([("embedding".to_string(), Value::Array(vec![Value::Double(v)]))]));
            coll.add_entity(pk, &entity).unwrap();
        }
        let hits = coll.search(&[0.0], 3, Some(&["b".to_string()])).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk, "b");
    }
}
