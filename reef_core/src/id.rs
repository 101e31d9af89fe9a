use std::fmt;

/// Process-wide unique identity of an object graph node.
///
/// Identities survive serialization: the same id appearing in a later
/// snapshot refers to the same logical object, which is what makes
/// orphan diffing across snapshots possible.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::From)]
#[repr(transparent)]
pub struct ObjectId(Box<str>);

impl ObjectId {
    pub fn new<S>(id: S) -> Self
    where
        S: Into<Box<str>>,
    {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(st: &str) -> Self {
        Self(st.into())
    }
}

impl From<String> for ObjectId {
    fn from(st: String) -> Self {
        Self(st.into_boxed_str())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
