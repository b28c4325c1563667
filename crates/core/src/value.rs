//! The unified value type shared by entities, the expression evaluator and
//! the wire-level JSON boundary.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A scalar, array, or nested object. Vectors are plain `Array` of `Double`
/// under a field the vector index is configured to read (spec §3, §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit IEEE-754 float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Field map, order-independent.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Best-effort JSON type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric value as `f64` if this is `Int` or `Double`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Borrow as `&str` if this is `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow as `&[Value]` if this is `Array`.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    /// Read a dotted field path (`"a.b.c"`) through nested objects/arrays.
    /// Array segments may be numeric indices.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        for segment in path.split('.') {
            cur = match cur {
                Value::Object(map) => map.get(segment)?,
                Value::Array(arr) => {
                    let idx: usize = segment.parse().ok()?;
                    arr.get(idx)?
                }
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Extract a fixed-dimension float vector from this value (expected to
    /// be an `Array` of numeric values), per spec §4.3 `add_entity`.
    pub fn as_vector(&self) -> Option<Vec<f32>> {
        let arr = self.as_array()?;
        let mut out = Vec::with_capacity(arr.len());
        for v in arr {
            out.push(v.as_f64()? as f32);
        }
        Some(out)
    }

    /// JSON-style equality used by `IN`/`==` comparisons (spec §4.6.5).
    pub fn json_eq(&self, other: &Value) -> bool {
        match (self.loose_numeric(), other.loose_numeric()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Value::Null, Value::Null) => true,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::String(a), Value::String(b)) => a == b,
                (Value::Array(a), Value::Array(b)) => {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.json_eq(y))
                }
                (Value::Object(a), Value::Object(b)) => {
                    a.len() == b.len()
                        && a.iter()
                            .all(|(k, v)| b.get(k).is_some_and(|bv| v.json_eq(bv)))
                }
                _ => false,
            },
        }
    }

    fn loose_numeric(&self) -> Option<f64> {
        self.as_f64()
    }

    /// Ordering used by `SORT`/range scans across mixed numeric/string
    /// values; `None` when the comparison is undefined (different
    /// non-numeric types).
    pub fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
        match (self.loose_numeric(), other.loose_numeric()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => match (self, other) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
                (Value::Null, Value::Null) => Some(Ordering::Equal),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(_) | Value::Object(_) => {
                write!(f, "{}", serde_json::to_string(self).unwrap_or_default())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_access_through_nested_object() {
        let mut inner = BTreeMap::new();
        inner.insert("city".to_string(), Value::String("Berlin".into()));
        let mut outer = BTreeMap::new();
        outer.insert("address".to_string(), Value::Object(inner));
        let v = Value::Object(outer);
        assert_eq!(
            v.get_path("address.city"),
            Some(&Value::String("Berlin".into()))
        );
        assert_eq!(v.get_path("address.zip"), None);
    }

    #[test]
    fn json_eq_mixed_numeric() {
        assert!(Value::Int(3).json_eq(&Value::Double(3.0)));
        assert!(!Value::Int(3).json_eq(&Value::String("3".into())));
    }

    #[test]
    fn vector_extraction() {
        let v = Value::Array(vec![Value::Double(1.0), Value::Int(2), Value::Double(3.5)]);
        assert_eq!(v.as_vector(), Some(vec![1.0f32, 2.0, 3.5]));
    }
}
