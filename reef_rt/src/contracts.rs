//! The property contract model: usage kinds, defaults, and the
//! validate/transform/finalize pipeline every property write runs through.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use reef_core::{ReefError, ReefResult};

use crate::context::Context;
use crate::object::class::ReefClass;
use crate::object::instance::ObjectRef;
use crate::object::value::ReefValue;

/// Classification of a property controlling when and how it may be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyUsage {
    /// Fixed at deploy time from the package configuration; never settable
    /// by methods.
    Config,

    /// Shared across all instances of the declaring class.
    Static,

    /// Settable at any time; without a default the value is left for an
    /// explicit runtime assignment.
    Runtime,

    /// Ordinary instance property, settable under the write-access rules.
    Writable,
}

impl Default for PropertyUsage {
    fn default() -> Self {
        Self::Writable
    }
}

impl PropertyUsage {
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Runtime | Self::Writable)
    }
}

/// A deferred default-value expression.
///
/// Evaluation may legitimately fail with an uninitialized-property error
/// while the initialization fixpoint is still resolving sibling
/// properties; the fixpoint retries it on the next pass.
pub trait DefaultExpr: Send + Sync {
    fn evaluate(&self, this: &ObjectRef, context: &Context) -> ReefResult<ReefValue>;
}

impl<F> DefaultExpr for F
where
    F: Fn(&ObjectRef, &Context) -> ReefResult<ReefValue> + Send + Sync,
{
    fn evaluate(&self, this: &ObjectRef, context: &Context) -> ReefResult<ReefValue> {
        (self)(this, context)
    }
}

/// A property default: absent, a literal, or an expression evaluated
/// against the owning object.
#[derive(Clone)]
pub enum PropertyDefault {
    None,
    Value(ReefValue),
    Expr(Arc<dyn DefaultExpr>),
}

impl PropertyDefault {
    pub fn is_some(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn resolve(&self, this: &ObjectRef, context: &Context) -> ReefResult<Option<ReefValue>> {
        match self {
            Self::None => Ok(None),
            Self::Value(value) => Ok(Some(value.clone())),
            Self::Expr(expr) => expr.evaluate(this, context).map(Some),
        }
    }
}

impl fmt::Debug for PropertyDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Expr(_) => f.write_str("Expr(..)"),
        }
    }
}

/// The validate/transform/finalize triple applied on every property write.
///
/// When a property is redeclared along the ancestry, `validate` runs for
/// every non-ultimate declaration, `transform` runs once on the
/// most-derived one, and `finalize` runs once at the very end (inlined
/// into `transform` when only a single declaration exists).
pub trait PropertyContract: Send + Sync {
    fn validate(
        &self,
        name: &str,
        value: Option<&ReefValue>,
        this: &ObjectRef,
        context: &Context,
        default: &PropertyDefault,
    ) -> ReefResult<()> {
        let _ = (name, value, this, context, default);
        Ok(())
    }

    fn transform(
        &self,
        name: &str,
        value: Option<ReefValue>,
        this: &ObjectRef,
        context: &Context,
        default: &PropertyDefault,
        finalize: bool,
    ) -> ReefResult<ReefValue>;

    fn finalize(
        &self,
        name: &str,
        value: ReefValue,
        this: &ObjectRef,
        context: &Context,
    ) -> ReefResult<ReefValue> {
        let _ = (name, this, context);
        Ok(value)
    }
}

/// Default substitution shared by contract implementations: a supplied
/// value wins, otherwise the declared default is resolved, otherwise the
/// property is missing a required value.
pub fn transform_default(
    name: &str,
    value: Option<ReefValue>,
    this: &ObjectRef,
    context: &Context,
    default: &PropertyDefault,
) -> ReefResult<ReefValue> {
    match value {
        Some(value) => Ok(value),
        None => match default.resolve(this, context)? {
            Some(value) => Ok(value),
            None => Err(ReefError::ContractViolation {
                property: name.to_string(),
                message: "a value is required and no default is declared".into(),
            }),
        },
    }
}

/// The no-op contract: substitutes the default when no value was supplied
/// and passes everything else through untouched.
pub struct Passthrough;

impl PropertyContract for Passthrough {
    fn transform(
        &self,
        name: &str,
        value: Option<ReefValue>,
        this: &ObjectRef,
        context: &Context,
        default: &PropertyDefault,
        _finalize: bool,
    ) -> ReefResult<ReefValue> {
        transform_default(name, value, this, context, default)
    }
}

/// Serialization behaviour of reference-typed property values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializeHint {
    /// Serialize the referenced object inline.
    Inline,

    /// Collapse the referenced object to its bare id.
    Reference,
}

impl Default for SerializeHint {
    fn default() -> Self {
        Self::Inline
    }
}

/// Declaration of a property (or of a method argument, which follows the
/// same shape).
pub struct PropertySpec {
    name: Box<str>,
    usage: PropertyUsage,
    default: PropertyDefault,
    contract: Arc<dyn PropertyContract>,
    serialize_hint: SerializeHint,
    declaring_type: RwLock<Weak<ReefClass>>,
}

impl PropertySpec {
    pub fn new<S>(name: S, usage: PropertyUsage) -> Self
    where
        S: AsRef<str>,
    {
        Self {
            name: name.as_ref().into(),
            usage,
            default: PropertyDefault::None,
            contract: Arc::new(Passthrough),
            serialize_hint: SerializeHint::default(),
            declaring_type: RwLock::new(Weak::new()),
        }
    }

    pub fn with_default<V>(mut self, value: V) -> Self
    where
        V: Into<ReefValue>,
    {
        self.default = PropertyDefault::Value(value.into());
        self
    }

    pub fn with_default_expr<E>(mut self, expr: E) -> Self
    where
        E: DefaultExpr + 'static,
    {
        self.default = PropertyDefault::Expr(Arc::new(expr));
        self
    }

    pub fn with_contract<C>(mut self, contract: C) -> Self
    where
        C: PropertyContract + 'static,
    {
        self.contract = Arc::new(contract);
        self
    }

    pub fn serialized_as_reference(mut self) -> Self {
        self.serialize_hint = SerializeHint::Reference;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage(&self) -> PropertyUsage {
        self.usage
    }

    pub fn default(&self) -> &PropertyDefault {
        &self.default
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn contract(&self) -> &Arc<dyn PropertyContract> {
        &self.contract
    }

    pub fn serialize_hint(&self) -> SerializeHint {
        self.serialize_hint
    }

    pub fn declaring_type(&self) -> Option<Arc<ReefClass>> {
        self.declaring_type.read().upgrade()
    }

    pub(crate) fn bind_declaring_type(&self, class: &Arc<ReefClass>) {
        *self.declaring_type.write() = Arc::downgrade(class);
    }
}

impl fmt::Debug for PropertySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySpec")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .field("default", &self.default)
            .finish()
    }
}
