//! Fluent construction of class descriptors, used by package loaders and
//! tests.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use reef_core::{MapT, ReefResult};

use crate::context::Context;
use crate::contracts::PropertySpec;
use crate::exec::Executor;
use crate::object::class::{ExpressionBody, MethodBody, MethodUsage, ReefClass, ReefMethod};
use crate::object::instance::ObjectRef;
use crate::object::value::{ReefValue, ValueMap};

pub struct ClassBuilder {
    name: Box<str>,
    version: Box<str>,
    parents: Vec<Arc<ReefClass>>,
    properties: MapT<String, Arc<PropertySpec>>,
    methods: MapT<String, Arc<ReefMethod>>,
}

impl ClassBuilder {
    pub fn new<S>(name: S) -> Self
    where
        S: AsRef<str>,
    {
        Self {
            name: name.as_ref().into(),
            version: "0.0.0".into(),
            parents: Vec::new(),
            properties: MapT::default(),
            methods: MapT::default(),
        }
    }

    pub fn version<S>(mut self, version: S) -> Self
    where
        S: AsRef<str>,
    {
        self.version = version.as_ref().into();
        self
    }

    pub fn parent(mut self, class: &Arc<ReefClass>) -> Self {
        self.parents.push(class.clone());
        self
    }

    pub fn property(mut self, spec: PropertySpec) -> Self {
        self.properties.insert(spec.name().to_string(), Arc::new(spec));
        self
    }

    pub fn method(mut self, method: MethodBuilder) -> Self {
        let method = method.build();
        self.methods.insert(method.name().to_string(), method);
        self
    }

    pub fn build(self) -> Arc<ReefClass> {
        let class = Arc::new(ReefClass {
            name: self.name,
            version: self.version,
            parents: self.parents,
            properties: self.properties,
            methods: self.methods,
            statics: RwLock::new(ValueMap::default()),
        });

        for spec in class.properties().values() {
            spec.bind_declaring_type(&class);
        }
        for method in class.methods().values() {
            method.bind_declaring_type(&class);
        }

        class
    }
}

pub struct MethodBuilder {
    name: Box<str>,
    usage: MethodUsage,
    arguments: Option<Vec<Arc<PropertySpec>>>,
    body: Option<MethodBody>,
    no_trace: bool,
}

impl MethodBuilder {
    pub fn new<S>(name: S) -> Self
    where
        S: AsRef<str>,
    {
        Self {
            name: name.as_ref().into(),
            usage: MethodUsage::default(),
            arguments: None,
            body: None,
            no_trace: false,
        }
    }

    /// Mark the method invocable from actions-only (external) contexts.
    pub fn action(mut self) -> Self {
        self.usage = MethodUsage::Action;
        self
    }

    /// Declare a formal argument; declaration order drives positional
    /// canonicalization.
    pub fn argument(mut self, spec: PropertySpec) -> Self {
        self.arguments
            .get_or_insert_with(Vec::new)
            .push(Arc::new(spec));
        self
    }

    pub fn native<F>(mut self, body: F) -> Self
    where
        F: Fn(&Executor, &Context, &ObjectRef, &[ReefValue], &ValueMap) -> ReefResult<ReefValue>
            + Send
            + Sync
            + 'static,
    {
        self.body = Some(MethodBody::Native(Arc::new(body)));
        self
    }

    pub fn expression<B>(mut self, body: B) -> Self
    where
        B: ExpressionBody + 'static,
    {
        self.body = Some(MethodBody::Expression(Arc::new(body)));
        self
    }

    /// Exclude the method from trace logging.
    pub fn untraced(mut self) -> Self {
        self.no_trace = true;
        self
    }

    fn build(self) -> Arc<ReefMethod> {
        Arc::new(ReefMethod {
            name: self.name,
            usage: self.usage,
            arguments: self.arguments,
            body: self.body,
            no_trace: self.no_trace,
            declaring_type: RwLock::new(Weak::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::PropertyUsage;

    #[test]
    fn building_binds_declaring_types() {
        let class = ClassBuilder::new("Built")
            .version("3.0.0")
            .property(PropertySpec::new("field", PropertyUsage::Writable))
            .method(MethodBuilder::new("noop"))
            .build();

        let spec = class.own_property("field").unwrap();
        assert!(Arc::ptr_eq(&spec.declaring_type().unwrap(), &class));

        let method = class.own_method("noop").unwrap();
        assert!(Arc::ptr_eq(&method.declaring_type().unwrap(), &class));
        assert_eq!(method.qualified_name(), "Built::noop");
        assert_eq!(class.type_string(), "Built/3.0.0");
    }
}
