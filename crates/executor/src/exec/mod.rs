//! Execution engines, one per [`crate::query::Query`] arm, plus the
//! `COLLECT` group-by stage layered over a conjunctive source.

pub mod collect;
pub mod common;
pub mod conjunctive;
pub mod disjunctive;
pub mod join;
pub mod traversal;
