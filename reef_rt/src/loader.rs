//! The package-loading collaborator surface.

use std::sync::Arc;

use parking_lot::RwLock;

use reef_core::{MapT, ReefError, ReefResult};

use crate::object::class::ReefClass;
use crate::object::value::ValueMap;

/// Resolves class names and exposes per-class static configuration. Real
/// deployments back this with a package cache; the engine never asks for
/// more than these two operations.
pub trait ClassLoader: Send + Sync {
    fn load_class(&self, name: &str) -> ReefResult<Arc<ReefClass>>;

    /// Deploy-time configuration for a class; empty when none exists.
    fn class_config(&self, name: &str) -> ValueMap {
        let _ = name;
        ValueMap::default()
    }
}

/// An in-memory class registry, enough for embedders and tests.
#[derive(Default)]
pub struct StaticClassLoader {
    classes: RwLock<MapT<String, Arc<ReefClass>>>,
    configs: RwLock<MapT<String, ValueMap>>,
}

impl StaticClassLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class and (implicitly) its whole ancestry.
    pub fn register(&self, class: Arc<ReefClass>) {
        let mut classes = self.classes.write();
        for ancestor in class.ancestors() {
            classes
                .entry(ancestor.name().to_string())
                .or_insert_with(|| ancestor.clone());
        }
        classes.insert(class.name().to_string(), class);
    }

    pub fn set_config(&self, class_name: &str, config: ValueMap) {
        self.configs.write().insert(class_name.to_string(), config);
    }
}

impl ClassLoader for StaticClassLoader {
    fn load_class(&self, name: &str) -> ReefResult<Arc<ReefClass>> {
        self.classes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ReefError::UnknownClass {
                name: name.to_string(),
            })
    }

    fn class_config(&self, name: &str) -> ValueMap {
        self.configs.read().get(name).cloned().unwrap_or_default()
    }
}
