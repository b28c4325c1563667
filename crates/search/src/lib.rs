//! Full-text search: a token index persisted through the KV backbone's
//! equality-index keyspace, scored with BM25 (spec §3, §4.6.5 `FULLTEXT`).

#![warn(missing_docs)]

pub mod index;
pub mod scorer;
pub mod tokenizer;

pub use index::FullTextIndex;
pub use scorer::{BM25LiteScorer, Scorer, ScorerContext, SearchDoc};
pub use tokenizer::{tokenize, tokenize_unique};
