use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use reef_core::{MapT, ReefError, ReefResult, SetT};

use crate::context::Context;
use crate::contracts::PropertySpec;
use crate::exec::Executor;
use crate::object::instance::ObjectRef;
use crate::object::value::{ReefValue, ValueMap};

/// Method names beginning with this prefix are lifecycle hooks (`.init`,
/// `.destroy`) rather than user-invocable actions.
pub const LIFECYCLE_PREFIX: &str = ".";

/// The language-level constructor, invoked last during initialization.
pub const INIT_METHOD: &str = ".init";

/// The destructor, invoked on orphaned objects during cleanup.
pub const DESTROY_METHOD: &str = ".destroy";

/// The legacy constructor, invoked only on freshly created objects.
pub const LEGACY_INIT_METHOD: &str = "__init__";

/// How a method may be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodUsage {
    /// Reachable only from other method bodies.
    Runtime,

    /// Additionally invocable from an actions-only (external) context.
    Action,
}

impl Default for MethodUsage {
    fn default() -> Self {
        Self::Runtime
    }
}

/// A declarative method body, evaluated by the external expression engine
/// against the invocation context. The engine does not inspect how the
/// body is built; it only asks for a value.
pub trait ExpressionBody: Send + Sync {
    fn execute(&self, executor: &Executor, context: &Context) -> ReefResult<ReefValue>;
}

impl<F> ExpressionBody for F
where
    F: Fn(&Executor, &Context) -> ReefResult<ReefValue> + Send + Sync,
{
    fn execute(&self, executor: &Executor, context: &Context) -> ReefResult<ReefValue> {
        (self)(executor, context)
    }
}

/// A native method implementation. Receives the receiver cast to the
/// method's declaring class, plus the canonicalized arguments.
pub type NativeFn = Arc<
    dyn Fn(&Executor, &Context, &ObjectRef, &[ReefValue], &ValueMap) -> ReefResult<ReefValue>
        + Send
        + Sync,
>;

/// The two kinds of method bodies the executor can dispatch on.
#[derive(Clone)]
pub enum MethodBody {
    Native(NativeFn),
    Expression(Arc<dyn ExpressionBody>),
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(inner) => f.debug_tuple("Native").field(&Arc::as_ptr(inner)).finish(),
            Self::Expression(inner) => f
                .debug_tuple("Expression")
                .field(&Arc::as_ptr(inner))
                .finish(),
        }
    }
}

/// A method declaration bound to its declaring class.
pub struct ReefMethod {
    pub(crate) name: Box<str>,
    pub(crate) usage: MethodUsage,
    pub(crate) arguments: Option<Vec<Arc<PropertySpec>>>,
    pub(crate) body: Option<MethodBody>,
    pub(crate) no_trace: bool,
    pub(crate) declaring_type: RwLock<Weak<ReefClass>>,
}

impl ReefMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage(&self) -> MethodUsage {
        self.usage
    }

    /// The declared argument scheme, in declaration order, when one exists.
    pub fn arguments(&self) -> Option<&[Arc<PropertySpec>]> {
        self.arguments.as_deref()
    }

    pub fn argument(&self, name: &str) -> Option<&Arc<PropertySpec>> {
        self.arguments
            .as_ref()?
            .iter()
            .find(|spec| spec.name() == name)
    }

    pub fn body(&self) -> Option<&MethodBody> {
        self.body.as_ref()
    }

    pub fn no_trace(&self) -> bool {
        self.no_trace
    }

    pub fn declaring_type(&self) -> Option<Arc<ReefClass>> {
        self.declaring_type.read().upgrade()
    }

    pub(crate) fn bind_declaring_type(&self, class: &Arc<ReefClass>) {
        *self.declaring_type.write() = Arc::downgrade(class);
    }

    pub fn qualified_name(&self) -> String {
        match self.declaring_type() {
            Some(class) => format!("{}::{}", class.name(), self.name),
            None => self.name.to_string(),
        }
    }
}

impl fmt::Debug for ReefMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReefMethod")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .finish()
    }
}

/// Immutable class descriptor.
///
/// Classes form a DAG through `parents`; diamonds are permitted and
/// resolved to a single storage slice per distinct ancestor when an object
/// is constructed.
pub struct ReefClass {
    pub(crate) name: Box<str>,
    pub(crate) version: Box<str>,
    pub(crate) parents: Vec<Arc<ReefClass>>,
    pub(crate) properties: MapT<String, Arc<PropertySpec>>,
    pub(crate) methods: MapT<String, Arc<ReefMethod>>,
    pub(crate) statics: RwLock<ValueMap>,
}

impl ReefClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The fully qualified `name/version` form used in serialized graphs.
    pub fn type_string(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    pub fn parents(&self) -> &[Arc<ReefClass>] {
        &self.parents
    }

    pub fn properties(&self) -> &MapT<String, Arc<PropertySpec>> {
        &self.properties
    }

    pub fn methods(&self) -> &MapT<String, Arc<ReefMethod>> {
        &self.methods
    }

    /// A property declared directly on this class.
    pub fn own_property(&self, name: &str) -> Option<&Arc<PropertySpec>> {
        self.properties.get(name)
    }

    /// A method declared directly on this class.
    pub fn own_method(&self, name: &str) -> Option<&Arc<ReefMethod>> {
        self.methods.get(name)
    }

    /// Breadth-first ancestry walk, most-derived first; each distinct
    /// class is visited once even across diamond paths.
    pub fn ancestors(self: &Arc<Self>) -> Vec<Arc<ReefClass>> {
        let mut seen: SetT<String> = SetT::default();
        let mut queue: VecDeque<Arc<ReefClass>> = VecDeque::new();
        let mut out = Vec::new();

        queue.push_back(self.clone());
        while let Some(class) = queue.pop_front() {
            if !seen.insert(class.type_string()) {
                continue;
            }
            queue.extend(class.parents.iter().cloned());
            out.push(class);
        }

        out
    }

    /// Whether `object` is an instance of this class (directly or through
    /// any inheritance path).
    pub fn is_compatible_with(self: &Arc<Self>, object: &ObjectRef) -> bool {
        object
            .class()
            .ancestors()
            .iter()
            .any(|class| class.as_ref() == self.as_ref())
    }

    /// Every declaration of `name` across the ancestry, most-derived
    /// first.
    pub fn find_properties(self: &Arc<Self>, name: &str) -> Vec<Arc<PropertySpec>> {
        self.ancestors()
            .iter()
            .filter_map(|class| class.own_property(name).cloned())
            .collect()
    }

    /// The most-derived declaration of `name` visible from this class.
    pub fn find_single_property(self: &Arc<Self>, name: &str) -> Option<Arc<PropertySpec>> {
        self.ancestors()
            .iter()
            .find_map(|class| class.own_property(name).cloned())
    }

    pub fn find_single_method(self: &Arc<Self>, name: &str) -> Option<Arc<ReefMethod>> {
        self.ancestors()
            .iter()
            .find_map(|class| class.own_method(name).cloned())
    }

    /// Every method in the ancestry matching `predicate`, most-derived
    /// declarations first.
    pub fn find_methods(self: &Arc<Self>, predicate: &dyn Fn(&ReefMethod) -> bool) -> Vec<Arc<ReefMethod>> {
        self.ancestors()
            .iter()
            .flat_map(|class| class.methods.values())
            .filter(|method| predicate(method))
            .cloned()
            .collect()
    }

    /// Read this class's shared (static) property storage.
    pub fn get_static(&self, name: &str) -> ReefResult<ReefValue> {
        self.statics.read().get(name).cloned().ok_or_else(|| {
            ReefError::UninitializedPropertyAccess {
                name: name.to_string(),
                type_name: self.name.to_string(),
            }
        })
    }

    pub(crate) fn set_static(&self, name: &str, value: ReefValue, dry_run: bool) {
        if !dry_run {
            self.statics.write().insert(name.to_string(), value);
        }
    }
}

impl PartialEq for ReefClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version
    }
}

impl Eq for ReefClass {}

impl fmt::Debug for ReefClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}/{}>", self.name, self.version)
    }
}

impl fmt::Display for ReefClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}
