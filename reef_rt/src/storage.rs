//! The object store: a registry of live objects by identity, plus the
//! graph materialization pass that turns already-deserialized data into
//! objects.

use std::sync::atomic::{AtomicBool, Ordering};

use ahash::RandomState;
use dashmap::DashMap;

use reef_core::{ObjectId, ReefError, ReefResult};

use crate::exec::Executor;
use crate::object::instance::{ObjectRef, ReefObject};
use crate::object::serialize::{SYS_ID, SYS_KEY, SYS_NAME, SYS_TYPE};
use crate::object::value::{ReefValue, ValueMap};

/// Objects created during a materialization pass, children first, paired
/// with the parameters found in their graph nodes.
pub type Materialized = Vec<(ObjectRef, ValueMap)>;

/// Registry of live objects.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: DashMap<ObjectId, ObjectRef, RandomState>,
    initializing: AtomicBool,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn get(&self, id: &ObjectId) -> Option<ObjectRef> {
        self.objects.get(id).map(|entry| entry.value().clone())
    }

    pub fn put(&self, object: ObjectRef) {
        self.objects.insert(object.object_id().clone(), object);
    }

    pub fn remove(&self, id: &ObjectId) -> Option<ObjectRef> {
        self.objects.remove(id).map(|(_, object)| object)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.iter().map(|entry| entry.key().clone()).collect()
    }

    /// True while a whole graph is being materialized. Initialization
    /// plans computed in this state contain no constructor steps.
    pub fn initializing(&self) -> bool {
        self.initializing.load(Ordering::Acquire)
    }

    pub(crate) fn set_initializing(&self, value: bool) {
        self.initializing.store(value, Ordering::Release);
    }

    /// Materialize an object node tree.
    ///
    /// Identities already present in the store are reused, so reloading a
    /// snapshot reconciles to the same live objects. Returns the root
    /// together with every materialized object (children first) and its
    /// parameters; driving the initialization plans is the caller's job.
    pub fn load(
        &self,
        executor: &Executor,
        data: &ReefValue,
        owner: Option<&ObjectRef>,
    ) -> ReefResult<(Option<ObjectRef>, Materialized)> {
        let mut created = Materialized::new();

        let is_root = owner.is_none();
        if is_root {
            self.set_initializing(true);
        }
        let result = self.load_node(executor, data, owner, &mut created);
        if is_root {
            self.set_initializing(false);
        }

        Ok((result?, created))
    }

    fn load_node(
        &self,
        executor: &Executor,
        data: &ReefValue,
        owner: Option<&ObjectRef>,
        created: &mut Materialized,
    ) -> ReefResult<Option<ObjectRef>> {
        let map = match data {
            ReefValue::Null => return Ok(None),
            ReefValue::Map(map) => map,
            _ => {
                return Err(ReefError::InvalidObjectGraph {
                    reason: "an object node must be a mapping".into(),
                })
            }
        };

        let marker = map.get(SYS_KEY).and_then(ReefValue::as_map).ok_or_else(|| {
            ReefError::InvalidObjectGraph {
                reason: format!("an object node must carry a `{}` marker", SYS_KEY),
            }
        })?;
        let type_name = marker.get(SYS_TYPE).and_then(ReefValue::as_str).ok_or_else(|| {
            ReefError::InvalidObjectGraph {
                reason: "an object marker must name its type".into(),
            }
        })?;
        let object_id = marker.get(SYS_ID).and_then(ReefValue::as_str).map(ObjectId::from);
        let name = marker.get(SYS_NAME).and_then(ReefValue::as_str);

        let object = match object_id.as_ref().and_then(|id| self.get(id)) {
            Some(existing) => existing,
            None => {
                let class = executor.class_loader().load_class(type_base_name(type_name))?;
                let object = ReefObject::create(
                    &class,
                    owner,
                    object_id,
                    name,
                    executor.class_loader().as_ref(),
                    true,
                );
                self.put(object.clone());
                object
            }
        };

        let mut params = ValueMap::default();
        for (key, value) in map {
            if key == SYS_KEY {
                continue;
            }
            params.insert(
                key.clone(),
                self.load_value(executor, value, &object, created)?,
            );
        }

        created.push((object.clone(), params));
        Ok(Some(object))
    }

    fn load_value(
        &self,
        executor: &Executor,
        value: &ReefValue,
        owner: &ObjectRef,
        created: &mut Materialized,
    ) -> ReefResult<ReefValue> {
        match value {
            ReefValue::Map(map) if has_object_marker(map) => {
                let object = self.load_node(executor, value, Some(owner), created)?;
                Ok(object.map(ReefValue::Object).unwrap_or(ReefValue::Null))
            }
            ReefValue::Map(map) => {
                let mut out = ValueMap::default();
                for (key, value) in map {
                    out.insert(
                        key.clone(),
                        self.load_value(executor, value, owner, created)?,
                    );
                }
                Ok(ReefValue::Map(out))
            }
            ReefValue::List(items) => items
                .iter()
                .map(|item| self.load_value(executor, item, owner, created))
                .collect::<ReefResult<Vec<_>>>()
                .map(ReefValue::List),
            other => Ok(other.clone()),
        }
    }
}

/// A mapping is an object node when its marker block carries both an id
/// and a type.
pub(crate) fn has_object_marker(map: &ValueMap) -> bool {
    map.get(SYS_KEY)
        .and_then(ReefValue::as_map)
        .map_or(false, |marker| {
            marker.get(SYS_ID).is_some() && marker.get(SYS_TYPE).is_some()
        })
}

/// Serialized type strings carry `name/version`; the loader resolves by
/// name.
fn type_base_name(type_string: &str) -> &str {
    type_string.split('/').next().unwrap_or(type_string)
}
