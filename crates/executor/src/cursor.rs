//! Pagination cursors (spec §6 "Cursor format"): a keyset/seek record, not
//! a row offset, base64-encoded so it is opaque to callers and validated on
//! decode against the query that produced it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use weave_core::error::{Error, Result};
use weave_core::value::Value;

use crate::query::SortDir;

/// Decoded cursor state: resumes a sorted (or, absent a `SORT`, pk-ordered)
/// scan from the last row delivered rather than a row count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cursor {
    /// Column the originating query sorted by, if any. A decode against a
    /// query sorting by a different column is rejected.
    pub sort_column: Option<String>,
    /// The last delivered row's value at `sort_column`, if any.
    pub last_value: Option<Value>,
    /// The last delivered row's primary key (`_key`), the tiebreak when
    /// `sort_column` ties or is absent.
    pub last_pk: Option<String>,
    /// Sort direction in effect when the cursor was issued.
    pub direction: SortDir,
    /// The `LIMIT` count in effect when the cursor was issued.
    pub effective_limit: u64,
}

impl Cursor {
    /// Encodes this cursor as an opaque base64 token.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("Cursor always serializes");
        BASE64.encode(json)
    }

    /// Decodes and validates a token against the current query's sort
    /// column.
    pub fn decode(token: &str, expected_sort_column: Option<&str>) -> Result<Cursor> {
        let bytes = BASE64.decode(token).map_err(|e| Error::invalid(format!("malformed cursor: {e}")))?;
        let cursor: Cursor = serde_json::from_slice(&bytes).map_err(|e| Error::invalid(format!("malformed cursor: {e}")))?;
        if cursor.sort_column.as_deref() != expected_sort_column {
            return Err(Error::invalid("cursor was issued for a different sort order"));
        }
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64() {
        let c = Cursor {
            sort_column: Some("name".to_string()),
            last_value: Some(Value::String("ann".to_string())),
            last_pk: Some("users:abc".to_string()),
            direction: SortDir::Asc,
            effective_limit: 20,
        };
        let token = c.encode();
        let decoded = Cursor::decode(&token, Some("name")).unwrap();
        assert_eq!(decoded, c);
    }

    #[test]
    fn rejects_cursor_for_a_different_sort_column() {
        let c = Cursor { sort_column: Some("name".to_string()), last_value: None, last_pk: None, direction: SortDir::Asc, effective_limit: 10 };
        let token = c.encode();
        assert!(Cursor::decode(&token, Some("age")).is_err());
    }

    #[test]
    fn rejects_malformed_token() {
        assert!(Cursor::decode("not-base64!!", None).is_err());
    }
}
