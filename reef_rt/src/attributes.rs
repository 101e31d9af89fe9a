//! Attributes persist alongside the object graph without living inside
//! any object's property block; the engine loads them with the graph and
//! serializes back only those whose owner still exists.

use parking_lot::RwLock;

use reef_core::{MapT, ObjectId, ReefError, ReefResult, SetT};

use crate::object::value::ReefValue;

/// Key of a persisted attribute record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeKey {
    pub owner: ObjectId,
    pub declaring_type: Box<str>,
    pub name: Box<str>,
}

#[derive(Debug, Default)]
pub struct AttributeStore {
    inner: RwLock<MapT<AttributeKey, ReefValue>>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the persisted `[owner, type, name, value]` quadruples.
    pub fn load(&self, data: &ReefValue) -> ReefResult<()> {
        let records = match data {
            ReefValue::Null => return Ok(()),
            ReefValue::List(records) => records,
            _ => {
                return Err(ReefError::InvalidObjectGraph {
                    reason: "the attributes section must be a list".into(),
                })
            }
        };

        let mut inner = self.inner.write();
        for record in records {
            let fields = record.as_list().ok_or_else(|| ReefError::InvalidObjectGraph {
                reason: "an attribute record must be a list".into(),
            })?;
            match fields {
                [owner, declaring_type, name, value] => {
                    let key = AttributeKey {
                        owner: attribute_field(owner)?.into(),
                        declaring_type: attribute_field(declaring_type)?.into(),
                        name: attribute_field(name)?.into(),
                    };
                    inner.insert(key, value.clone());
                }
                _ => {
                    return Err(ReefError::InvalidObjectGraph {
                        reason: "an attribute record must have four fields".into(),
                    })
                }
            }
        }

        Ok(())
    }

    pub fn get(&self, key: &AttributeKey) -> Option<ReefValue> {
        self.inner.read().get(key).cloned()
    }

    /// Set an attribute; a null value removes the record.
    pub fn set(&self, key: AttributeKey, value: ReefValue) {
        let mut inner = self.inner.write();
        if value.is_null() {
            inner.remove(&key);
        } else {
            inner.insert(key, value);
        }
    }

    /// Serialize back to the persisted form, keeping only attributes
    /// whose owner is still alive.
    pub fn serialize(&self, live: &SetT<ObjectId>) -> ReefValue {
        let inner = self.inner.read();
        ReefValue::List(
            inner
                .iter()
                .filter(|(key, _)| live.contains(&key.owner))
                .map(|(key, value)| {
                    ReefValue::List(vec![
                        ReefValue::string(key.owner.as_str()),
                        ReefValue::string(&*key.declaring_type),
                        ReefValue::string(&*key.name),
                        value.clone(),
                    ])
                })
                .collect(),
        )
    }
}

fn attribute_field(value: &ReefValue) -> ReefResult<&str> {
    value.as_str().ok_or_else(|| ReefError::InvalidObjectGraph {
        reason: "attribute record fields must be strings".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(owner: &str, name: &str) -> AttributeKey {
        AttributeKey {
            owner: owner.into(),
            declaring_type: "Sample".into(),
            name: name.into(),
        }
    }

    #[test]
    fn load_and_serialize_round_trip() {
        let store = AttributeStore::new();
        let record = ReefValue::List(vec![
            ReefValue::string("obj-1"),
            ReefValue::string("Sample"),
            ReefValue::string("state"),
            ReefValue::Int(3),
        ]);
        store.load(&ReefValue::List(vec![record.clone()])).unwrap();

        assert_eq!(store.get(&key("obj-1", "state")), Some(ReefValue::Int(3)));

        let mut live = SetT::default();
        live.insert(ObjectId::from("obj-1"));
        assert_eq!(
            store.serialize(&live),
            ReefValue::List(vec![record])
        );

        // A dead owner drops out of the serialized form.
        let nobody = SetT::default();
        assert_eq!(store.serialize(&nobody), ReefValue::List(Vec::new()));
    }

    #[test]
    fn setting_null_removes_the_record() {
        let store = AttributeStore::new();
        store.set(key("obj-1", "state"), ReefValue::Int(1));
        store.set(key("obj-1", "state"), ReefValue::Null);
        assert_eq!(store.get(&key("obj-1", "state")), None);
    }
}
