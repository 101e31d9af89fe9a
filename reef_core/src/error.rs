use thiserror::Error;

pub type ReefResult<T> = Result<T, ReefError>;

/// Engine-level failure taxonomy.
///
/// `UninitializedPropertyAccess` is recoverable inside the initialization
/// fixpoint, where it marks a default whose computation depends on a
/// not-yet-resolved property; outside of it the error is fatal.
/// `ContractViolation` is tolerated during initialization only for
/// runtime-usage properties. Everything else propagates to the invoking
/// caller unmodified.
#[derive(Debug, Clone, Error)]
pub enum ReefError {
    #[error("property `{name}` is not readable on `{type_name}`")]
    PropertyRead { name: String, type_name: String },

    #[error("property `{name}` is not writable on `{type_name}`")]
    PropertyWrite { name: String, type_name: String },

    #[error("access to uninitialized property `{name}` of `{type_name}`")]
    UninitializedPropertyAccess { name: String, type_name: String },

    #[error("contract violation on `{property}`: {message}")]
    ContractViolation { property: String, message: String },

    #[error("no write access to property `{name}`")]
    NoWriteAccess { name: String },

    #[error("circular dependency between property default expressions")]
    CircularExpressionDependencies,

    #[error("`{method}` is not an action")]
    NotAnAction { method: String },

    #[error("cannot cast `{type_name}` to `{target}`")]
    InvalidCast { type_name: String, target: String },

    #[error("unknown class `{name}`")]
    UnknownClass { name: String },

    #[error("no method `{name}` on `{type_name}`")]
    UnknownMethod { type_name: String, name: String },

    #[error("arguments do not match the signature of `{method}`")]
    ArgumentMismatch { method: String },

    #[error("malformed object graph: {reason}")]
    InvalidObjectGraph { reason: String },

    #[error("{message}")]
    Raised { message: String },
}

impl ReefError {
    pub fn is_uninitialized_access(&self) -> bool {
        matches!(self, Self::UninitializedPropertyAccess { .. })
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation { .. })
    }

    pub fn is_no_write_access(&self) -> bool {
        matches!(self, Self::NoWriteAccess { .. })
    }
}
