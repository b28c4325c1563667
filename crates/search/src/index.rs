//! Full-text index (spec §3 "Full-text index — token postings with BM25
//! statistics, treated as an equality index of tokens plus a
//! per-document-length side table"). Grounded on the teacher's
//! `InvertedIndex`/`PostingEntry` document-frequency bookkeeping, but
//! persisted through the KV backbone's equality-index keyspace instead of
//! an in-process `DashMap`, so it survives a restart the same way every
//! other secondary index does.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use weave_core::error::Result;
use weave_core::key;
use weave_storage::{KvStore, WriteBatch};

use crate::scorer::ScorerContext;
use crate::tokenizer::tokenize;

fn ft_column(field: &str) -> String {
    format!("ft:{field}")
}

fn side_table_key(collection: &str, field: &str, pk: &str) -> Vec<u8> {
    format!("ftdoc:{collection}:{field}:{pk}").into_bytes()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SideTableEntry {
    doc_len: u32,
    tokens: Vec<String>,
}

/// Maintains token postings for one `(collection, field)` pair plus the
/// per-document length side table BM25 needs.
pub struct FullTextIndex;

impl FullTextIndex {
    /// Queue postings for `text` under `field` of entity `pk`, replacing
    /// any previously indexed text for the same `pk` in this batch's
    /// preceding reads. Callers must `remove_entity` first if `pk` was
    /// already indexed and the batch does not otherwise guarantee a single
    /// pass (see [`Self::reindex_entity`] for the common replace case).
    pub fn index_entity(batch: &mut WriteBatch, collection: &str, field: &str, pk: &str, text: &str) {
        let tokens = tokenize(text);
        let doc_len = tokens.len() as u32;
        let column = ft_column(field);

        let mut seen = std::collections::BTreeSet::new();
        for token in &tokens {
            if !seen.insert(token.clone()) {
                continue;
            }
            let key = key::equality_index_key(collection, &column, token.as_bytes(), pk);
            batch.put(key, Vec::new());
        }

        let entry = SideTableEntry { doc_len, tokens };
        let side_key = side_table_key(collection, field, pk);
        batch.put(side_key, serde_json::to_vec(&entry).unwrap_or_default());
    }

    /// Queue removal of every posting and the side-table row previously
    /// written by [`Self::index_entity`] for `pk`.
    pub fn remove_entity(batch: &mut WriteBatch, store: &KvStore, collection: &str, field: &str, pk: &str) -> Result<()> {
        let side_key = side_table_key(collection, field, pk);
        let existing = store.get(&side_key)?;
        let Some(bytes) = existing else { return Ok(()) };
        let entry: SideTableEntry = serde_json::from_slice(&bytes)?;

        let column = ft_column(field);
        let mut seen = std::collections::BTreeSet::new();
        for token in &entry.tokens {
            if !seen.insert(token.clone()) {
                continue;
            }
            let key = key::equality_index_key(collection, &column, token.as_bytes(), pk);
            batch.delete(key);
        }
        batch.delete(side_key);
        Ok(())
    }

    /// Replace any previously indexed text for `pk` with `text` in one
    /// batch: old postings are removed first, then the new ones queued.
    pub fn reindex_entity(
        batch: &mut WriteBatch,
        store: &KvStore,
        collection: &str,
        field: &str,
        pk: &str,
        text: &str,
    ) -> Result<()> {
        Self::remove_entity(batch, store, collection, field, pk)?;
        Self::index_entity(batch, collection, field, pk, text);
        Ok(())
    }

    /// Candidate primary keys containing any query term, each paired with
    /// its BM25 score against `query`, sorted by descending score and
    /// capped at `limit`.
    pub fn search(
        store: &KvStore,
        collection: &str,
        field: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        let column = ft_column(field);
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut ctx = ScorerContext::new(0);
        let mut candidate_terms: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for term in &query_terms {
            let prefix = key::equality_index_prefix(collection, &column, term.as_bytes());
            let matches = store.collect_prefix(&prefix)?;
            ctx.add_doc_freq(term, matches.len());
            let mut pks = Vec::with_capacity(matches.len());
            for (k, _v) in matches {
                if let Some(pk) = pk_suffix(&k) {
                    pks.push(pk);
                }
            }
            candidate_terms.insert(term.clone(), pks);
        }

        let mut candidate_pks: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for pks in candidate_terms.values() {
            candidate_pks.extend(pks.iter().cloned());
        }
        if candidate_pks.is_empty() {
            return Ok(Vec::new());
        }

        let mut total_len = 0u64;
        let mut total_docs = 0u64;
        let side_prefix = format!("ftdoc:{collection}:{field}:").into_bytes();
        store.scan_prefix(&side_prefix, |_k, v| {
            if let Ok(entry) = serde_json::from_slice::<SideTableEntry>(v) {
                total_len += entry.doc_len as u64;
                total_docs += 1;
            }
            true
        })?;
        ctx.avg_doc_len = if total_docs > 0 { total_len as f32 / total_docs as f32 } else { 0.0 };
        ctx.total_docs = total_docs as usize;

        let mut scored: Vec<(String, f32)> = Vec::new();
        for pk in candidate_pks {
            let side_key = side_table_key(collection, field, &pk);
            let Some(bytes) = store.get(&side_key)? else { continue };
            let entry: SideTableEntry = serde_json::from_slice(&bytes)?;
            let doc_len = entry.doc_len.max(1) as f32;

            let mut tf_counts: BTreeMap<&str, u32> = BTreeMap::new();
            for t in &entry.tokens {
                *tf_counts.entry(t.as_str()).or_insert(0) += 1;
            }

            let score = bm25_score(&query_terms, &tf_counts, doc_len, &ctx);
            if score > 0.0 {
                scored.push((pk, score));
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

const K1: f32 = 1.2;
const B: f32 = 0.75;

fn bm25_score(query_terms: &[String], tf_counts: &BTreeMap<&str, u32>, doc_len: f32, ctx: &ScorerContext) -> f32 {
    let avg_len = ctx.avg_doc_len.max(1.0);
    let mut score = 0.0;
    for term in query_terms {
        let tf = tf_counts.get(term.as_str()).copied().unwrap_or(0) as f32;
        if tf == 0.0 {
            continue;
        }
        let idf = ctx.idf(term);
        let tf_component = (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * doc_len / avg_len));
        score += idf * tf_component;
    }
    score
}

fn pk_suffix(key: &[u8]) -> Option<String> {
    let pos = key.iter().rposition(|&b| b == 0u8)?;
    Some(String::from_utf8_lossy(&key[pos + 1..]).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use weave_core::config::StorageConfig;

    fn store() -> (tempfile::TempDir, KvStore) {
        let dir = tempdir().unwrap();
        let kv = KvStore::open(dir.path(), StorageConfig::default()).unwrap();
        (dir, kv)
    }

    #[test]
    fn search_finds_matching_document_by_term() {
        let (_d, kv) = store();
        let mut batch = WriteBatch::new();
        FullTextIndex::index_entity(&mut batch, "articles", "body", "a1", "the quick brown fox");
        FullTextIndex::index_entity(&mut batch, "articles", "body", "a2", "a slow green turtle");
        kv.write_batch(batch).unwrap();

        let hits = FullTextIndex::search(&kv, "articles", "body", "fox", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a1");
    }

    #[test]
    fn rarer_term_ranks_above_common_term_match() {
        let (_d, kv) = store();
        let mut batch = WriteBatch::new();
        for i in 0..9 {
            FullTextIndex::index_entity(&mut batch, "articles", "body", &format!("common{i}"), "common word here");
        }
        FullTextIndex::index_entity(&mut batch, "articles", "body", "rare1", "rare word here");
        kv.write_batch(batch).unwrap();

        let hits = FullTextIndex::search(&kv, "articles", "body", "rare", 10).unwrap();
        assert_eq!(hits[0].0, "rare1");
    }

    #[test]
    fn reindex_replaces_old_postings() {
        let (_d, kv) = store();
        let mut batch = WriteBatch::new();
        FullTextIndex::index_entity(&mut batch, "articles", "body", "a1", "alpha beta");
        kv.write_batch(batch).unwrap();

        let mut batch = WriteBatch::new();
        FullTextIndex::reindex_entity(&mut batch, &kv, "articles", "body", "a1", "gamma delta").unwrap();
        kv.write_batch(batch).unwrap();

        assert!(FullTextIndex::search(&kv, "articles", "body", "alpha", 10).unwrap().is_empty());
        assert_eq!(FullTextIndex::search(&kv, "articles", "body", "gamma", 10).unwrap().len(), 1);
    }

    #[test]
    fn remove_entity_clears_postings_and_side_table() {
        let (_d, kv) = store();
        let mut batch = WriteBatch::new();
        FullTextIndex::index_entity(&mut batch, "articles", "body", "a1", "alpha beta");
        kv.write_batch(batch).unwrap();

        let mut batch = WriteBatch::new();
        FullTextIndex::remove_entity(&mut batch, &kv, "articles", "body", "a1").unwrap();
        kv.write_batch(batch).unwrap();

        assert!(FullTextIndex::search(&kv, "articles", "body", "alpha", 10).unwrap().is_empty());
    }

    #[test]
    fn empty_query_returns_no_hits() {
        let (_d, kv) = store();
        assert!(FullTextIndex::search(&kv, "articles", "body", "   ", 10).unwrap().is_empty());
    }
}
