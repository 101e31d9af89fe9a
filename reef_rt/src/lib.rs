//! `reef_rt` is the execution engine of the Reef orchestration DSL.
//!
//! The engine materializes typed object graphs out of already-deserialized
//! data, enforces property contracts over them, and dispatches methods
//! (constructors, destructors and multiply-inherited procedures) on behalf
//! of concurrent callers. Everything above it (transport, persistence, the
//! expression language itself, package loading) talks to the engine
//! through the narrow traits in [`loader`] and [`object::class`].

pub mod attributes;
pub mod context;
pub mod contracts;
pub mod exec;
pub mod loader;
pub mod object;
pub mod storage;

pub use {
    attributes::{AttributeKey, AttributeStore},
    context::Context,
    contracts::{
        DefaultExpr, Passthrough, PropertyContract, PropertyDefault, PropertySpec, PropertyUsage,
        SerializeHint,
    },
    exec::{Executor, ObjectHandle},
    loader::{ClassLoader, StaticClassLoader},
    object::{
        ClassBuilder, DumpType, ExpressionBody, MethodBody, MethodBuilder, MethodUsage, ObjectRef,
        ReefClass, ReefMethod, ReefObject, ReefValue, ValueMap,
    },
    storage::ObjectStore,
};

#[cfg(test)]
pub(crate) mod test {
    use std::sync::Arc;

    use crate::exec::Executor;
    use crate::loader::StaticClassLoader;

    pub fn setup() -> (Arc<Executor>, Arc<StaticClassLoader>) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let loader = Arc::new(StaticClassLoader::new());
        let executor = Executor::new(loader.clone());

        (executor, loader)
    }
}
