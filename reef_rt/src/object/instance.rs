use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use reef_core::{MapT, ObjectId, ReefError, ReefResult, SetT};

use crate::context::Context;
use crate::contracts::{PropertyDefault, PropertySpec, PropertyUsage};
use crate::loader::ClassLoader;
use crate::object::class::ReefClass;
use crate::object::value::{ReefValue, ValueMap};

/// Shared handle to a live object (or to one of its ancestor slices).
pub type ObjectRef = Arc<ReefObject>;

/// The runtime instance of a [`ReefClass`].
///
/// A multiply-inherited object is decomposed into one storage slice per
/// distinct ancestor class. Slices share the `object_id`; diamond paths
/// resolve to the same slice. Ancestor slices reach the most-derived
/// instance through a weak `this` back-reference, so the only strong edges
/// run down the (acyclic) ancestry.
pub struct ReefObject {
    object_id: ObjectId,
    class: Arc<ReefClass>,
    name: RwLock<Option<Box<str>>>,
    parents: Vec<ObjectRef>,
    this: RwLock<Option<Weak<ReefObject>>>,
    owner: Option<Weak<ReefObject>>,
    properties: RwLock<ValueMap>,
    initialized: AtomicBool,
    from_snapshot: bool,
    config: ValueMap,
}

impl ReefObject {
    /// Create an object of `class`, decomposing its ancestry into slices.
    ///
    /// `object_id` is generated when absent (fresh construction) and
    /// reused when supplied (deserialization). `owner` is recorded as a
    /// non-owning back-reference for diagnostics.
    pub fn create(
        class: &Arc<ReefClass>,
        owner: Option<&ObjectRef>,
        object_id: Option<ObjectId>,
        name: Option<&str>,
        loader: &dyn ClassLoader,
        from_snapshot: bool,
    ) -> ObjectRef {
        let object_id =
            object_id.unwrap_or_else(|| ObjectId::new(uuid::Uuid::new_v4().simple().to_string()));
        let owner = owner.map(|owner| Arc::downgrade(&owner.real_this()));

        let mut known: MapT<String, ObjectRef> = MapT::default();
        let root = Self::create_slice(class, &owner, &object_id, name, loader, from_snapshot, &mut known);

        let back = Arc::downgrade(&root);
        for slice in known.values() {
            if !Arc::ptr_eq(slice, &root) {
                *slice.this.write() = Some(back.clone());
            }
        }

        root
    }

    fn create_slice(
        class: &Arc<ReefClass>,
        owner: &Option<Weak<ReefObject>>,
        object_id: &ObjectId,
        name: Option<&str>,
        loader: &dyn ClassLoader,
        from_snapshot: bool,
        known: &mut MapT<String, ObjectRef>,
    ) -> ObjectRef {
        let mut parents = Vec::with_capacity(class.parents().len());
        for parent_class in class.parents() {
            let slice = match known.get(parent_class.name()) {
                Some(slice) => slice.clone(),
                None => Self::create_slice(
                    parent_class,
                    owner,
                    object_id,
                    None,
                    loader,
                    from_snapshot,
                    known,
                ),
            };
            parents.push(slice);
        }

        let slice = Arc::new(ReefObject {
            object_id: object_id.clone(),
            class: class.clone(),
            name: RwLock::new(name.map(Into::into)),
            parents,
            this: RwLock::new(None),
            owner: owner.clone(),
            properties: RwLock::new(ValueMap::default()),
            initialized: AtomicBool::new(false),
            from_snapshot,
            config: loader.class_config(class.name()),
        });

        known.insert(class.name().to_string(), slice.clone());
        slice
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn class(&self) -> &Arc<ReefClass> {
        &self.class
    }

    pub fn parents(&self) -> &[ObjectRef] {
        &self.parents
    }

    pub fn owner(&self) -> Option<ObjectRef> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub(crate) fn from_snapshot(&self) -> bool {
        self.from_snapshot
    }

    pub(crate) fn config(&self) -> &ValueMap {
        &self.config
    }

    /// The most-derived object this slice belongs to.
    pub fn real_this(self: &Arc<Self>) -> ObjectRef {
        match self.this.read().as_ref().and_then(Weak::upgrade) {
            Some(this) => this,
            None => self.clone(),
        }
    }

    /// The display name of the (most-derived) object.
    pub fn name(self: &Arc<Self>) -> Option<Box<str>> {
        self.real_this().name.read().clone()
    }

    pub(crate) fn display_name(&self) -> Option<Box<str>> {
        self.name.read().clone()
    }

    /// Every slice reachable from this one, breadth-first, most-derived
    /// first; each distinct ancestor class appears once.
    pub fn slices(self: &Arc<Self>) -> Vec<ObjectRef> {
        let mut seen: SetT<String> = SetT::default();
        let mut queue: VecDeque<ObjectRef> = VecDeque::new();
        let mut out = Vec::new();

        queue.push_back(self.clone());
        while let Some(slice) = queue.pop_front() {
            if !seen.insert(slice.class().name().to_string()) {
                continue;
            }
            queue.extend(slice.parents.iter().cloned());
            out.push(slice);
        }

        out
    }

    /// Find the slice of this object whose class is `target`.
    pub fn cast(self: &Arc<Self>, target: &Arc<ReefClass>) -> ReefResult<ObjectRef> {
        for slice in self.slices() {
            if slice.class().as_ref() == target.as_ref() {
                return Ok(slice);
            }
        }

        Err(ReefError::InvalidCast {
            type_name: self.class.type_string(),
            target: target.type_string(),
        })
    }

    /// Resolve the scope a caller operates in: a caller type compatible
    /// with this object narrows access to that type's slice.
    fn caller_scope(
        self: &Arc<Self>,
        start: &Arc<ReefClass>,
        context: Option<&Context>,
    ) -> (Arc<ReefClass>, bool) {
        if let Some(caller) = context.and_then(Context::current_type) {
            if caller.is_compatible_with(self) {
                return (caller, true);
            }
        }

        (start.clone(), false)
    }

    /// Read a property under the declaration-scoping rules.
    pub fn get_property(self: &Arc<Self>, name: &str, context: Option<&Context>) -> ReefResult<ReefValue> {
        let (start_type, derived) = self.caller_scope(&self.class, context);

        if !start_type.find_properties(name).is_empty() {
            let real = self.real_this();
            let spec = real.class().find_single_property(name).ok_or_else(|| {
                ReefError::PropertyRead {
                    name: name.to_string(),
                    type_name: start_type.name().to_string(),
                }
            })?;

            if spec.usage() == PropertyUsage::Static {
                match spec.declaring_type() {
                    Some(declaring) => declaring.get_static(name),
                    None => Err(ReefError::PropertyRead {
                        name: name.to_string(),
                        type_name: start_type.name().to_string(),
                    }),
                }
            } else {
                real.property_value(name)
            }
        } else if derived {
            self.cast(&start_type)?.property_value(name)
        } else {
            Err(ReefError::PropertyRead {
                name: name.to_string(),
                type_name: start_type.name().to_string(),
            })
        }
    }

    fn property_value(&self, name: &str) -> ReefResult<ReefValue> {
        self.properties.read().get(name).cloned().ok_or_else(|| {
            ReefError::UninitializedPropertyAccess {
                name: name.to_string(),
                type_name: self.class.name().to_string(),
            }
        })
    }

    pub(crate) fn raw_property(&self, name: &str) -> Option<ReefValue> {
        self.properties.read().get(name).cloned()
    }

    /// Every declaration of `name` across this object's ancestry,
    /// most-derived first.
    fn list_property_specs(self: &Arc<Self>, name: &str) -> Vec<Arc<PropertySpec>> {
        self.slices()
            .iter()
            .filter_map(|slice| slice.class().own_property(name).cloned())
            .collect()
    }

    /// Write a property, running the contract of every declaration from
    /// the most derived down: non-ultimate declarations validate, the
    /// ultimate one transforms, and a single finalize pass runs when more
    /// than one declaration exists. `dry_run` performs the whole pipeline
    /// but withholds the store.
    pub fn set_property(
        self: &Arc<Self>,
        name: &str,
        value: Option<ReefValue>,
        context: &Context,
        dry_run: bool,
    ) -> ReefResult<()> {
        let real = self.real_this();
        let (start_type, derived) = self.caller_scope(real.class(), Some(context));
        let caller = context.current_type();

        if !start_type.find_properties(name).is_empty() {
            let ultimate = real.class().find_single_property(name).ok_or_else(|| {
                ReefError::PropertyWrite {
                    name: name.to_string(),
                    type_name: start_type.name().to_string(),
                }
            })?;
            let specs = real.list_property_specs(name);
            let single = specs.len() == 1;

            let mut staged = value;
            for spec in &specs {
                if caller.is_some()
                    && !context.allow_property_writes()
                    && (!spec.usage().is_writable() || !derived)
                {
                    return Err(ReefError::NoWriteAccess {
                        name: name.to_string(),
                    });
                }

                let default = if spec.usage() == PropertyUsage::Static {
                    PropertyDefault::None
                } else {
                    match self.config.get(name) {
                        Some(value) => PropertyDefault::Value(value.clone()),
                        None => spec.default().clone(),
                    }
                };

                if Arc::ptr_eq(spec, &ultimate) {
                    let input = staged.take();
                    staged = Some(spec.contract().transform(
                        name, input, &real, context, &default, single,
                    )?);
                } else {
                    spec.contract()
                        .validate(name, staged.as_ref(), &real, context, &default)?;
                }
            }

            let mut value = staged.unwrap_or(ReefValue::Null);
            if !single {
                value = ultimate.contract().finalize(name, value, &real, context)?;
            }

            if ultimate.usage() == PropertyUsage::Static {
                match ultimate.declaring_type() {
                    Some(declaring) => declaring.set_static(name, value, dry_run),
                    None => {
                        return Err(ReefError::PropertyWrite {
                            name: name.to_string(),
                            type_name: start_type.name().to_string(),
                        })
                    }
                }
            } else if !dry_run {
                real.properties.write().insert(name.to_string(), value);
            }

            Ok(())
        } else if derived {
            if !dry_run {
                self.cast(&start_type)?
                    .properties
                    .write()
                    .insert(name.to_string(), value.unwrap_or(ReefValue::Null));
            }
            Ok(())
        } else {
            Err(ReefError::PropertyWrite {
                name: name.to_string(),
                type_name: start_type.name().to_string(),
            })
        }
    }
}

impl fmt::Debug for ReefObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}/{} {}>",
            self.class.name(),
            self.class.version(),
            self.object_id
        )
    }
}
