use std::fmt;
use std::sync::Arc;

use reef_core::{patma, MapT};

use crate::object::class::ReefClass;
use crate::object::instance::ObjectRef;
use crate::object::serialize::DumpType;

pub type ValueMap = MapT<String, ReefValue>;

/// Representation of any value flowing through the engine: property
/// values, method arguments and results, and whole serialized graphs.
#[derive(Clone, derive_more::From)]
pub enum ReefValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Box<str>),
    List(Vec<ReefValue>),
    Map(ValueMap),

    /// A live object reference.
    Object(ObjectRef),

    /// A live class reference, produced by the mixed serialization mode.
    Type(Arc<ReefClass>),
}

impl From<&str> for ReefValue {
    fn from(st: &str) -> Self {
        Self::Str(st.into())
    }
}

impl From<String> for ReefValue {
    fn from(st: String) -> Self {
        Self::Str(st.into_boxed_str())
    }
}

impl ReefValue {
    pub fn string<S>(st: S) -> Self
    where
        S: AsRef<str>,
    {
        Self::Str(st.as_ref().into())
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, ReefValue::Null)
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        patma!(*v, ReefValue::Bool(v) in self)
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        patma!(*n, ReefValue::Int(n) in self)
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        patma!(st.as_ref(), ReefValue::Str(st) in self)
    }

    #[inline]
    pub fn as_list(&self) -> Option<&[ReefValue]> {
        patma!(items.as_slice(), ReefValue::List(items) in self)
    }

    #[inline]
    pub fn as_map(&self) -> Option<&ValueMap> {
        patma!(map, ReefValue::Map(map) in self)
    }

    #[inline]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        patma!(object, ReefValue::Object(object) in self)
    }

    /// Convert from already-parsed JSON. Integral numbers become `Int`,
    /// everything else maps structurally.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(v) => Self::Bool(*v),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(n) => Self::Int(n),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(st) => Self::Str(st.as_str().into()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value)))
                    .collect(),
            ),
        }
    }

    /// Convert to plain JSON. Object references serialize through
    /// `to_dictionary` and class references collapse to their type string,
    /// so the result carries no live handles.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ReefValue::Null => serde_json::Value::Null,
            ReefValue::Bool(v) => serde_json::Value::Bool(*v),
            ReefValue::Int(n) => serde_json::Value::Number((*n).into()),
            ReefValue::Float(x) => match serde_json::Number::from_f64(*x) {
                Some(n) => serde_json::Value::Number(n),
                None => serde_json::Value::Null,
            },
            ReefValue::Str(st) => serde_json::Value::String(st.to_string()),
            ReefValue::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            ReefValue::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            ReefValue::Object(object) => {
                ReefValue::Map(object.to_dictionary(false, DumpType::Serializable, false)).to_json()
            }
            ReefValue::Type(class) => serde_json::Value::String(class.type_string()),
        }
    }
}

impl PartialEq for ReefValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ReefValue::Null, ReefValue::Null) => true,
            (ReefValue::Bool(a), ReefValue::Bool(b)) => a == b,
            (ReefValue::Int(a), ReefValue::Int(b)) => a == b,
            (ReefValue::Float(a), ReefValue::Float(b)) => a == b,
            (ReefValue::Str(a), ReefValue::Str(b)) => a == b,
            (ReefValue::List(a), ReefValue::List(b)) => a == b,
            (ReefValue::Map(a), ReefValue::Map(b)) => a == b,
            (ReefValue::Object(a), ReefValue::Object(b)) => {
                Arc::ptr_eq(a, b) || a.object_id() == b.object_id()
            }
            (ReefValue::Type(a), ReefValue::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for ReefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReefValue::Null => f.write_str("Null"),
            ReefValue::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            ReefValue::Int(n) => f.debug_tuple("Int").field(n).finish(),
            ReefValue::Float(x) => f.debug_tuple("Float").field(x).finish(),
            ReefValue::Str(st) => f.debug_tuple("Str").field(st).finish(),
            ReefValue::List(items) => f.debug_list().entries(items.iter()).finish(),
            ReefValue::Map(map) => f.debug_map().entries(map.iter()).finish(),
            ReefValue::Object(object) => fmt::Debug::fmt(object, f),
            ReefValue::Type(class) => write!(f, "Type({})", class),
        }
    }
}

impl fmt::Display for ReefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReefValue::Null => f.write_str("null"),
            ReefValue::Bool(v) => write!(f, "{}", v),
            ReefValue::Int(n) => write!(f, "{}", n),
            ReefValue::Float(x) => write!(f, "{}", x),
            ReefValue::Str(st) => f.write_str(st),
            ReefValue::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            ReefValue::Map(map) => {
                f.write_str("{")?;
                for (index, (key, value)) in map.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            ReefValue::Object(object) => write!(f, "{:?}", object),
            ReefValue::Type(class) => write!(f, "{}", class),
        }
    }
}
