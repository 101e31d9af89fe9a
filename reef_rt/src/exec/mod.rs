//! The executor: method invocation, context wiring, graph load and
//! orphan cleanup.

use std::sync::{Arc, Weak};
use std::thread;

use tracing::{trace, warn};

use reef_core::{ObjectId, ReefError, ReefResult, SetT};

use crate::attributes::AttributeStore;
use crate::context::{Context, FrameSeed};
use crate::contracts::PropertySpec;
use crate::loader::ClassLoader;
use crate::object::class::{MethodBody, MethodUsage, ReefMethod, DESTROY_METHOD, LIFECYCLE_PREFIX};
use crate::object::instance::{ObjectRef, ReefObject};
use crate::object::serialize::{SYS_ID, SYS_KEY};
use crate::object::value::{ReefValue, ValueMap};
use crate::storage::{has_object_marker, ObjectStore};

use self::locks::MethodLocks;

pub(crate) mod locks;

#[cfg(test)]
mod tests;

/// Reserved sections of the graph load format.
pub const DM_OBJECTS: &str = "Objects";
pub const DM_OBJECTS_COPY: &str = "ObjectsCopy";
pub const DM_ATTRIBUTES: &str = "Attributes";

/// The engine entry point: owns the object and attribute stores, the root
/// context and the method locks, and dispatches every method invocation.
pub struct Executor {
    class_loader: Arc<dyn ClassLoader>,
    object_store: ObjectStore,
    attribute_store: Arc<AttributeStore>,
    root_context: Context,
    locks: MethodLocks,
}

impl Executor {
    pub fn new(class_loader: Arc<dyn ClassLoader>) -> Arc<Self> {
        let attribute_store = Arc::new(AttributeStore::new());
        Arc::new_cyclic(|me: &Weak<Executor>| Executor {
            class_loader: class_loader.clone(),
            object_store: ObjectStore::new(),
            attribute_store: attribute_store.clone(),
            root_context: Context::root(me.clone(), class_loader.clone(), attribute_store.clone()),
            locks: MethodLocks::default(),
        })
    }

    pub fn class_loader(&self) -> &Arc<dyn ClassLoader> {
        &self.class_loader
    }

    pub fn object_store(&self) -> &ObjectStore {
        &self.object_store
    }

    pub fn attribute_store(&self) -> &Arc<AttributeStore> {
        &self.attribute_store
    }

    pub fn root_context(&self) -> &Context {
        &self.root_context
    }

    /// Invoke `method` on `this`.
    ///
    /// A call without a context (or one that has not yet passed the stub)
    /// first gets a stub frame; fresh external calls are marked
    /// actions-only unless the method is a lifecycle hook. The real
    /// dispatch enforces the actions-only gate, canonicalizes arguments,
    /// serializes on the per-(method, object) lock, binds arguments and
    /// runs the body.
    pub fn invoke_method(
        &self,
        method: &Arc<ReefMethod>,
        this: &ObjectRef,
        context: Option<&Context>,
        args: &[ReefValue],
        kwargs: &ValueMap,
        skip_stub: bool,
    ) -> ReefResult<ReefValue> {
        match context {
            Some(context) if skip_stub => self.dispatch(method, this, context, args, kwargs),
            _ => {
                let actions_only =
                    context.is_none() && !method.name().starts_with(LIFECYCLE_PREFIX);
                let method_context =
                    self.create_method_context(this, method, context, actions_only, true);
                self.dispatch(method, this, &method_context, args, kwargs)
            }
        }
    }

    fn dispatch(
        &self,
        method: &Arc<ReefMethod>,
        this: &ObjectRef,
        context: &Context,
        args: &[ReefValue],
        kwargs: &ValueMap,
    ) -> ReefResult<ReefValue> {
        if context.actions_only() && method.usage() != MethodUsage::Action {
            return Err(ReefError::NotAnAction {
                method: method.name().to_string(),
            });
        }

        let context = self.create_method_context(this, method, Some(context), false, false);
        let this = this.real_this();

        let (args, kwargs) = match method.arguments() {
            Some(scheme) => (
                Vec::new(),
                canonize_parameters(scheme, method.name(), args, kwargs)?,
            ),
            None => (args.to_vec(), kwargs.clone()),
        };

        let _lock = self
            .locks
            .acquire(Arc::as_ptr(method) as *const () as usize, this.object_id());

        // Positional slots are numbered from 2, matching the expression
        // language's convention of reserving slot 1 for the receiver.
        for (index, arg) in args.iter().enumerate() {
            context.set((index + 2).to_string(), arg.clone());
        }
        for (name, value) in &kwargs {
            context.set(name.clone(), value.clone());
        }

        let run = || match method.body() {
            None => Ok(ReefValue::Null),
            Some(MethodBody::Native(native)) => {
                let receiver = match method.declaring_type() {
                    Some(declaring) => this.cast(&declaring)?,
                    None => this.clone(),
                };
                native(self, &context, &receiver, &args, &kwargs)
            }
            Some(MethodBody::Expression(body)) => body.execute(self, &context),
        };

        if method.no_trace() {
            run()
        } else {
            self.trace_method(&context, &args, &kwargs, run)
        }
    }

    fn trace_method(
        &self,
        context: &Context,
        args: &[ReefValue],
        kwargs: &ValueMap,
        run: impl FnOnce() -> ReefResult<ReefValue>,
    ) -> ReefResult<ReefValue> {
        let method_name = context
            .current_method()
            .map(|method| method.qualified_name())
            .unwrap_or_else(|| "<unknown>".to_string());
        let params = args
            .iter()
            .map(|arg| arg.to_string())
            .chain(
                kwargs
                    .iter()
                    .map(|(name, value)| format!("{} => {}", name, value)),
            )
            .collect::<Vec<_>>()
            .join(", ");
        let caller = context
            .caller_context()
            .and_then(|caller| caller.current_method())
            .map(|method| format!(" called from {}", method.qualified_name()))
            .unwrap_or_default();
        let task = thread::current().id();

        trace!("{:?}: begin execution {}({}){}", task, method_name, params, caller);
        match run() {
            Ok(result) => {
                trace!("{:?}: end execution {} with result {}", task, method_name, result);
                Ok(result)
            }
            Err(error) => {
                trace!("{:?}: end execution {} with exception {}", task, method_name, error);
                Err(error)
            }
        }
    }

    /// A context scoped to an object: the root context plus the object as
    /// the current this/type.
    pub fn create_object_context(&self, object: &ObjectRef) -> Context {
        let real = object.real_this();
        let current_type = real.class().clone();
        self.root_context.with_frame(FrameSeed {
            current_this: Some(real),
            current_type: Some(current_type),
            ..FrameSeed::default()
        })
    }

    fn create_method_context(
        &self,
        this: &ObjectRef,
        method: &Arc<ReefMethod>,
        context: Option<&Context>,
        actions_only: bool,
        skip_frame: bool,
    ) -> Context {
        // Caller resolution walks past stub frames.
        let mut caller = context.cloned();
        while caller.as_ref().map_or(false, |caller| caller.skip_frame()) {
            caller = caller.as_ref().and_then(|caller| caller.caller_context());
        }

        self.create_object_context(this).with_frame(FrameSeed {
            current_method: Some(method.clone()),
            current_type: method.declaring_type(),
            caller_context: caller,
            actions_only: Some(actions_only),
            skip_frame,
            allow_property_writes: context.and_then(Context::allow_property_writes_raw),
            ..FrameSeed::default()
        })
    }

    /// Construct a fresh object of `class_name` and run its full
    /// initialization protocol (including the legacy constructor path).
    pub fn create_object(
        &self,
        class_name: &str,
        params: &ValueMap,
        owner: Option<&ObjectRef>,
        name: Option<&str>,
    ) -> ReefResult<ObjectRef> {
        let class = self.class_loader.load_class(class_name)?;
        let object = ReefObject::create(
            &class,
            owner,
            None,
            name,
            self.class_loader.as_ref(),
            false,
        );
        self.object_store.put(object.clone());

        let mut used_names = SetT::default();
        for step in object.initialize(&self.object_store, &self.root_context, params, &mut used_names)? {
            step(self)?;
        }

        Ok(object)
    }

    /// Load a persisted graph: the attributes section, then the object
    /// section, then drive every materialized object's initialization
    /// plan, children first. Returns a handle on the root object, if any.
    pub fn load(self: &Arc<Self>, data: &ReefValue) -> ReefResult<Option<ObjectHandle>> {
        let map = data.as_map().ok_or_else(|| ReefError::InvalidObjectGraph {
            reason: "the model must be a mapping".into(),
        })?;

        self.attribute_store
            .load(map.get(DM_ATTRIBUTES).unwrap_or(&ReefValue::Null))?;

        let objects = map.get(DM_OBJECTS).unwrap_or(&ReefValue::Null);
        let (root, created) = self.object_store.load(self.as_ref(), objects, None)?;

        for (object, params) in &created {
            let mut used_names = SetT::default();
            for step in
                object.initialize(&self.object_store, &self.root_context, params, &mut used_names)?
            {
                step(self.as_ref())?;
            }
        }

        Ok(root.map(|object| ObjectHandle {
            object,
            executor: self.clone(),
        }))
    }

    /// Destroy objects that the previous snapshot knew but the live store
    /// no longer contains. Destructor failures are logged and muted so
    /// that one failing destructor never blocks cleanup of the rest.
    pub fn cleanup(&self, data: &ReefValue) -> ReefResult<()> {
        let objects_copy = match data.as_map().and_then(|map| map.get(DM_OBJECTS_COPY)) {
            Some(value) if !value.is_null() => value,
            _ => return Ok(()),
        };

        let scratch = ObjectStore::new();
        let (_, created) = scratch.load(self, objects_copy, None)?;

        // Keep the scratch store in its initializing state while plans
        // are driven: properties resolve, constructors never fire.
        scratch.set_initializing(true);
        for (object, params) in &created {
            let mut used_names = SetT::default();
            for step in object.initialize(&scratch, &self.root_context, params, &mut used_names)? {
                step(self)?;
            }
        }
        scratch.set_initializing(false);

        let mut seen: SetT<ObjectId> = SetT::default();
        for object_id in potential_object_ids(objects_copy) {
            if !seen.insert(object_id.clone()) {
                continue;
            }
            if !scratch.has(&object_id) || self.object_store.has(&object_id) {
                continue;
            }
            let Some(object) = scratch.get(&object_id) else {
                continue;
            };

            for method in object
                .class()
                .find_methods(&|method| method.name() == DESTROY_METHOD)
            {
                if let Err(error) =
                    self.invoke_method(&method, &object, None, &[], &ValueMap::default(), false)
                {
                    warn!(
                        "muted exception during execution of .destroy on {:?}: {}",
                        object, error
                    );
                }
            }
        }

        Ok(())
    }
}

/// Fold positional arguments into named ones following the declared
/// argument order.
fn canonize_parameters(
    scheme: &[Arc<PropertySpec>],
    method_name: &str,
    args: &[ReefValue],
    kwargs: &ValueMap,
) -> ReefResult<ValueMap> {
    let mut merged = kwargs.clone();
    for (index, arg) in args.iter().enumerate() {
        let spec = scheme.get(index).ok_or_else(|| ReefError::ArgumentMismatch {
            method: method_name.to_string(),
        })?;
        merged.insert(spec.name().to_string(), arg.clone());
    }
    Ok(merged)
}

/// Enumerate every object identity mentioned anywhere in a snapshot by
/// its structural id+type marker pair, descending into mappings and
/// (non-string) sequences.
fn potential_object_ids(data: &ReefValue) -> Vec<ObjectId> {
    fn walk(data: &ReefValue, out: &mut Vec<ObjectId>) {
        match data {
            ReefValue::Map(map) => {
                for value in map.values() {
                    walk(value, out);
                }
                if has_object_marker(map) {
                    if let Some(id) = map
                        .get(SYS_KEY)
                        .and_then(ReefValue::as_map)
                        .and_then(|marker| marker.get(SYS_ID))
                        .and_then(ReefValue::as_str)
                    {
                        out.push(ObjectId::from(id));
                    }
                }
            }
            ReefValue::List(items) => {
                for item in items {
                    walk(item, out);
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(data, &mut out);
    out
}

/// External facade over a loaded object: callers invoke actions through
/// it without holding a context of their own.
pub struct ObjectHandle {
    object: ObjectRef,
    executor: Arc<Executor>,
}

impl ObjectHandle {
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// Resolve `method_name` on the object's class and invoke it as an
    /// external call.
    pub fn invoke(
        &self,
        method_name: &str,
        args: &[ReefValue],
        kwargs: &ValueMap,
    ) -> ReefResult<ReefValue> {
        let method = self
            .object
            .class()
            .find_single_method(method_name)
            .ok_or_else(|| ReefError::UnknownMethod {
                type_name: self.object.class().name().to_string(),
                name: method_name.to_string(),
            })?;

        self.executor
            .invoke_method(&method, &self.object, None, args, kwargs, false)
    }
}
