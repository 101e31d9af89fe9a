//! Fundamental types that are shared and used all over the engine.
//!
//! The runtime crate deals almost exclusively in cheap, cloneable handles
//! (`ObjectId`, `Arc`s of descriptors); the complete representations live
//! with the component that owns them. This crate carries the pieces every
//! component needs: identities, the error taxonomy, and the hashed
//! collection aliases.

pub mod error;
pub mod id;

/// The hash map used throughout the engine.
pub type MapT<K, V> = ahash::AHashMap<K, V>;

/// The hash set used throughout the engine.
pub type SetT<T> = ahash::AHashSet<T>;

/// Match a single pattern against an expression, yielding `Some(binding)`
/// on a match and `None` otherwise.
#[macro_export]
macro_rules! patma {
    ($out:expr, $pat:pat in $val:expr) => {
        match $val {
            $pat => Some($out),
            _ => None,
        }
    };
}

pub use {error::*, id::*};
