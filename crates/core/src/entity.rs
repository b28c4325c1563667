//! The `Entity` document type (spec §3, "Entity").

use crate::key;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A document with a primary key and a field map. Ordered (`BTreeMap`) so
/// serialized field order is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical `{collection}:{uuid}` primary key.
    pub pk: String,
    /// Collection this entity belongs to.
    pub collection: String,
    /// Field map. Always carries `_key` echoing the entity's UUID.
    pub fields: BTreeMap<String, Value>,
}

impl Entity {
    /// Build a new entity, assigning a fresh UUID if `uuid` is `None`.
    pub fn new(collection: &str, uuid: Option<String>, mut fields: BTreeMap<String, Value>) -> Self {
        let uuid = uuid.unwrap_or_else(key::new_uuid);
        fields.insert("_key".to_string(), Value::String(uuid.clone()));
        let pk = key::entity_pk(collection, &uuid);
        Entity {
            pk,
            collection: collection.to_string(),
            fields,
        }
    }

    /// The bare UUID portion of the primary key.
    pub fn uuid(&self) -> &str {
        self.pk
            .rsplit_once(':')
            .map(|(_, u)| u)
            .unwrap_or(&self.pk)
    }

    /// Look up a field by dotted path, e.g. `"address.city"`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some((head, rest)) = path.split_once('.') {
            self.fields.get(head)?.get_path(rest)
        } else {
            self.fields.get(path)
        }
    }

    /// Serialize as a `Value::Object` (used for `RETURN`/projection).
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entity_gets_key_field_and_pk() {
        let e = Entity::new("users", None, BTreeMap::new());
        assert!(e.pk.starts_with("users:"));
        assert_eq!(e.fields.get("_key").unwrap().as_str(), Some(e.uuid()));
    }

    #[test]
    fn nested_field_lookup() {
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), Value::String("Berlin".into()));
        let mut fields = BTreeMap::new();
        fields.insert("address".to_string(), Value::Object(address));
        let e = Entity::new("users", Some("u1".into()), fields);
        assert_eq!(e.get("address.city"), Some(&Value::String("Berlin".into())));
    }
}
