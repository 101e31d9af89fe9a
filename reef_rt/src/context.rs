//! The execution context chain: a parent-linked environment threaded
//! through every call. Lookups walk from the innermost frame outward; a
//! frame never mutates its ancestors.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::attributes::AttributeStore;
use crate::exec::Executor;
use crate::loader::ClassLoader;
use crate::object::class::{ReefClass, ReefMethod};
use crate::object::instance::ObjectRef;
use crate::object::value::{ReefValue, ValueMap};

#[derive(Clone)]
pub struct Context {
    frame: Arc<Frame>,
}

/// Engine-relevant fields of a freshly derived frame. Everything left at
/// its default is inherited through the chain walk.
#[derive(Default)]
pub(crate) struct FrameSeed {
    pub current_method: Option<Arc<ReefMethod>>,
    pub current_this: Option<ObjectRef>,
    pub current_type: Option<Arc<ReefClass>>,
    pub caller_context: Option<Context>,
    pub actions_only: Option<bool>,
    pub skip_frame: bool,
    pub allow_property_writes: Option<bool>,
}

struct Frame {
    parent: Option<Context>,
    executor: Option<Weak<Executor>>,
    class_loader: Option<Arc<dyn ClassLoader>>,
    attribute_store: Option<Arc<AttributeStore>>,
    bindings: RwLock<ValueMap>,
    current_method: Option<Arc<ReefMethod>>,
    current_this: Option<ObjectRef>,
    current_type: Option<Arc<ReefClass>>,
    caller_context: Option<Context>,
    actions_only: Option<bool>,
    skip_frame: bool,
    allow_property_writes: Option<bool>,
}

impl Context {
    /// The one root context of an executor.
    pub(crate) fn root(
        executor: Weak<Executor>,
        class_loader: Arc<dyn ClassLoader>,
        attribute_store: Arc<AttributeStore>,
    ) -> Self {
        Self {
            frame: Arc::new(Frame {
                parent: None,
                executor: Some(executor),
                class_loader: Some(class_loader),
                attribute_store: Some(attribute_store),
                bindings: RwLock::new(ValueMap::default()),
                current_method: None,
                current_this: None,
                current_type: None,
                caller_context: None,
                actions_only: None,
                skip_frame: false,
                allow_property_writes: None,
            }),
        }
    }

    pub fn create_child(&self) -> Self {
        self.with_frame(FrameSeed::default())
    }

    pub(crate) fn with_frame(&self, seed: FrameSeed) -> Self {
        Self {
            frame: Arc::new(Frame {
                parent: Some(self.clone()),
                executor: None,
                class_loader: None,
                attribute_store: None,
                bindings: RwLock::new(ValueMap::default()),
                current_method: seed.current_method,
                current_this: seed.current_this,
                current_type: seed.current_type,
                caller_context: seed.caller_context,
                actions_only: seed.actions_only,
                skip_frame: seed.skip_frame,
                allow_property_writes: seed.allow_property_writes,
            }),
        }
    }

    fn find<T>(&self, select: impl Fn(&Frame) -> Option<T>) -> Option<T> {
        let mut cursor = Some(self.clone());
        while let Some(context) = cursor {
            if let Some(found) = select(&context.frame) {
                return Some(found);
            }
            cursor = context.frame.parent.clone();
        }
        None
    }

    /// Resolve a named (or numbered positional) binding.
    pub fn get(&self, name: &str) -> Option<ReefValue> {
        self.find(|frame| frame.bindings.read().get(name).cloned())
    }

    /// Bind a value in this frame.
    pub fn set<S>(&self, name: S, value: ReefValue)
    where
        S: Into<String>,
    {
        self.frame.bindings.write().insert(name.into(), value);
    }

    pub fn executor(&self) -> Option<Arc<Executor>> {
        self.find(|frame| frame.executor.clone())
            .and_then(|executor| executor.upgrade())
    }

    pub fn class_loader(&self) -> Option<Arc<dyn ClassLoader>> {
        self.find(|frame| frame.class_loader.clone())
    }

    pub fn attribute_store(&self) -> Option<Arc<AttributeStore>> {
        self.find(|frame| frame.attribute_store.clone())
    }

    pub fn current_method(&self) -> Option<Arc<ReefMethod>> {
        self.find(|frame| frame.current_method.clone())
    }

    pub fn current_this(&self) -> Option<ObjectRef> {
        self.find(|frame| frame.current_this.clone())
    }

    pub fn current_type(&self) -> Option<Arc<ReefClass>> {
        self.find(|frame| frame.current_type.clone())
    }

    pub fn caller_context(&self) -> Option<Context> {
        self.find(|frame| frame.caller_context.clone())
    }

    pub fn actions_only(&self) -> bool {
        self.find(|frame| frame.actions_only).unwrap_or(false)
    }

    /// Whether this very frame is a stub frame that caller resolution
    /// should walk past.
    pub(crate) fn skip_frame(&self) -> bool {
        self.frame.skip_frame
    }

    pub fn allow_property_writes(&self) -> bool {
        self.allow_property_writes_raw().unwrap_or(false)
    }

    pub(crate) fn allow_property_writes_raw(&self) -> Option<bool> {
        self.find(|frame| frame.allow_property_writes)
    }
}
