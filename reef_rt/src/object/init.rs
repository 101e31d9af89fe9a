//! The object initialization protocol: a fixpoint pass resolving property
//! values whose defaults may depend on one another, followed by deferred
//! constructor steps the driver executes strictly in order.

use std::sync::Arc;

use reef_core::{ReefError, ReefResult, SetT};

use crate::context::{Context, FrameSeed};
use crate::contracts::PropertyUsage;
use crate::exec::Executor;
use crate::object::class::{ReefMethod, INIT_METHOD, LEGACY_INIT_METHOD};
use crate::object::instance::ReefObject;
use crate::object::value::ValueMap;
use crate::storage::ObjectStore;

/// One deferred step of the initialization protocol.
///
/// Steps carry their own idempotence guard: a constructor step for an
/// already-initialized object is a no-op, which keeps diamond-shared
/// ancestor slices at exactly one constructor invocation even though the
/// planner may emit the step once per inheritance path.
pub type InitStep = Box<dyn FnOnce(&Executor) -> ReefResult<()> + Send>;

impl ReefObject {
    /// Plan the initialization of this object and (transitively) its
    /// ancestor slices.
    ///
    /// Property resolution happens here; constructor invocations are
    /// returned as deferred steps. The driver must execute every step in
    /// order for the protocol's guarantees to hold: the legacy constructor
    /// of a derived object precedes its ancestors' steps, every ancestor's
    /// `.init` precedes the most-derived `.init`, and marking the object
    /// initialized is the final effect.
    pub fn initialize(
        self: &Arc<Self>,
        store: &ObjectStore,
        context: &Context,
        params: &ValueMap,
        used_names: &mut SetT<String>,
    ) -> ReefResult<Vec<InitStep>> {
        let context = context.with_frame(FrameSeed {
            allow_property_writes: Some(true),
            ..FrameSeed::default()
        });

        // Deploy-time configuration is applied first, before anything can
        // observe the object.
        for (name, spec) in self.class().properties() {
            if spec.usage() == PropertyUsage::Config {
                let value = self.config().get(name).cloned();
                self.set_property(name, value, &context, self.initialized())?;
            }
        }

        let init = self.class().own_method(INIT_METHOD).cloned();

        let mut names: Vec<String> = self.class().properties().keys().cloned().collect();
        if let Some(init) = &init {
            if let Some(scheme) = init.arguments() {
                for argument in scheme {
                    if !names.iter().any(|name| name == argument.name()) {
                        names.push(argument.name().to_string());
                    }
                }
            }
        }

        let mut init_args = ValueMap::default();
        let mut last_errors = names.len();
        loop {
            let mut errors = 0;

            for name in &names {
                if used_names.contains(name) {
                    continue;
                }

                let (spec, is_init_arg) = match init.as_ref().and_then(|init| init.argument(name)) {
                    Some(spec) => (spec.clone(), true),
                    None => match self.class().own_property(name) {
                        Some(spec) => (spec.clone(), false),
                        None => continue,
                    },
                };

                match spec.usage() {
                    PropertyUsage::Config | PropertyUsage::Static => {
                        used_names.insert(name.clone());
                        continue;
                    }
                    PropertyUsage::Runtime if !spec.has_default() => {
                        // Left for an explicit runtime assignment.
                        used_names.insert(name.clone());
                        continue;
                    }
                    _ => {}
                }

                let value = if spec.usage() == PropertyUsage::Runtime {
                    None
                } else {
                    params.get(name).cloned()
                };

                let attempt = if is_init_arg {
                    if let Some(value) = value {
                        init_args.insert(name.clone(), value);
                    }
                    Ok(())
                } else {
                    self.set_property(name, value, &context, self.initialized())
                };

                match attempt {
                    Ok(()) => {
                        used_names.insert(name.clone());
                    }
                    Err(error) if error.is_uninitialized_access() => errors += 1,
                    Err(error) if error.is_contract_violation() => {
                        if spec.usage() != PropertyUsage::Runtime {
                            return Err(error);
                        }
                    }
                    Err(error) => return Err(error),
                }
            }

            if errors == 0 {
                break;
            }
            if errors >= last_errors {
                return Err(ReefError::CircularExpressionDependencies);
            }
            last_errors = errors;
        }

        let mut steps: Vec<InitStep> = Vec::new();

        // The legacy constructor runs only for freshly created objects,
        // never while the store is bulk-materializing a graph.
        if !store.initializing() && !self.initialized() && !self.from_snapshot() {
            if let Some(method) = self.class().own_method(LEGACY_INIT_METHOD).cloned() {
                let receiver = self.clone();
                let step_context = context.clone();
                let kwargs = filter_parameters(&method, params);
                steps.push(Box::new(move |executor: &Executor| {
                    if receiver.initialized() {
                        return Ok(());
                    }
                    executor
                        .invoke_method(&method, &receiver, Some(&step_context), &[], &kwargs, false)
                        .map(drop)
                }));
            }
        }

        // Ancestor slices share the resolved-name set, so a property
        // settled by a derived slice is not re-resolved above it.
        for parent in self.parents() {
            steps.extend(parent.initialize(store, &context, params, used_names)?);
        }

        // The language-level constructor runs last and seals the object.
        if !store.initializing() && !self.initialized() {
            let receiver = self.clone();
            let step_context = context.clone();
            steps.push(Box::new(move |executor: &Executor| {
                if receiver.initialized() {
                    return Ok(());
                }
                if let Some(init) = &init {
                    let child = step_context.create_child();
                    executor.invoke_method(
                        init,
                        &receiver.real_this(),
                        Some(&child),
                        &[],
                        &init_args,
                        false,
                    )?;
                }
                receiver.mark_initialized();
                Ok(())
            }));
        }

        Ok(steps)
    }
}

/// Restrict caller-supplied parameters to those the method's signature
/// accepts; methods without a declared scheme accept everything.
fn filter_parameters(method: &ReefMethod, params: &ValueMap) -> ValueMap {
    match method.arguments() {
        Some(_) => params
            .iter()
            .filter(|(name, _)| method.argument(name).is_some())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        None => params.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::contracts::PropertySpec;
    use crate::object::builders::{ClassBuilder, MethodBuilder};
    use crate::object::value::ReefValue;
    use crate::test::setup;

    #[test]
    fn defaults_resolve_through_the_fixpoint() {
        let (executor, loader) = setup();

        let class = ClassBuilder::new("Chained")
            .property(PropertySpec::new("base", PropertyUsage::Writable).with_default(1_i64))
            .property(
                PropertySpec::new("next", PropertyUsage::Writable).with_default_expr(
                    |this: &crate::object::instance::ObjectRef, context: &Context| {
                        let base = this.get_property("base", Some(context))?;
                        match base.as_int() {
                            Some(n) => Ok(ReefValue::Int(n + 1)),
                            None => Ok(ReefValue::Null),
                        }
                    },
                ),
            )
            .build();
        loader.register(class);

        let object = executor
            .create_object("Chained", &ValueMap::default(), None, None)
            .unwrap();

        assert_eq!(object.get_property("next", None).unwrap(), ReefValue::Int(2));
    }

    #[test]
    fn circular_defaults_are_detected() {
        let (executor, loader) = setup();

        let class = ClassBuilder::new("Knot")
            .property(
                PropertySpec::new("left", PropertyUsage::Writable).with_default_expr(
                    |this: &crate::object::instance::ObjectRef, context: &Context| {
                        this.get_property("right", Some(context))
                    },
                ),
            )
            .property(
                PropertySpec::new("right", PropertyUsage::Writable).with_default_expr(
                    |this: &crate::object::instance::ObjectRef, context: &Context| {
                        this.get_property("left", Some(context))
                    },
                ),
            )
            .build();
        loader.register(class);

        let error = executor
            .create_object("Knot", &ValueMap::default(), None, None)
            .unwrap_err();
        assert!(matches!(error, ReefError::CircularExpressionDependencies));
    }

    #[test]
    fn initialization_is_idempotent_once_complete() {
        let (executor, loader) = setup();

        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = constructed.clone();

        let class = ClassBuilder::new("Once")
            .method(MethodBuilder::new(INIT_METHOD).native(move |_, _, _, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ReefValue::Null)
            }))
            .build();
        loader.register(class);

        let object = executor
            .create_object("Once", &ValueMap::default(), None, None)
            .unwrap();
        assert!(object.initialized());
        assert_eq!(constructed.load(Ordering::SeqCst), 1);

        // A second pass over the protocol plans no constructor work.
        let mut used_names = SetT::default();
        let steps = object
            .initialize(
                executor.object_store(),
                executor.root_context(),
                &ValueMap::default(),
                &mut used_names,
            )
            .unwrap();
        for step in steps {
            step(&executor).unwrap();
        }

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn constructors_run_in_protocol_order() {
        let (executor, loader) = setup();

        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let top_log = log.clone();
        let top = ClassBuilder::new("Top")
            .method(MethodBuilder::new(INIT_METHOD).native(move |_, _, _, _, _| {
                top_log.lock().push("top .init");
                Ok(ReefValue::Null)
            }))
            .build();

        let legacy_log = log.clone();
        let bottom_log = log.clone();
        let bottom = ClassBuilder::new("Bottom")
            .parent(&top)
            .method(
                MethodBuilder::new(LEGACY_INIT_METHOD).native(move |_, _, _, _, _| {
                    legacy_log.lock().push("bottom __init__");
                    Ok(ReefValue::Null)
                }),
            )
            .method(MethodBuilder::new(INIT_METHOD).native(move |_, _, _, _, _| {
                bottom_log.lock().push("bottom .init");
                Ok(ReefValue::Null)
            }))
            .build();
        loader.register(bottom);

        executor
            .create_object("Bottom", &ValueMap::default(), None, None)
            .unwrap();

        assert_eq!(
            log.lock().as_slice(),
            ["bottom __init__", "top .init", "bottom .init"]
        );
    }

    #[test]
    fn diamond_ancestors_initialize_exactly_once() {
        let (executor, loader) = setup();

        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = constructed.clone();

        let top = ClassBuilder::new("Top")
            .method(MethodBuilder::new(INIT_METHOD).native(move |_, _, _, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ReefValue::Null)
            }))
            .build();
        let left = ClassBuilder::new("Left").parent(&top).build();
        let right = ClassBuilder::new("Right").parent(&top).build();
        let bottom = ClassBuilder::new("Bottom")
            .parent(&left)
            .parent(&right)
            .build();
        loader.register(bottom);

        executor
            .create_object("Bottom", &ValueMap::default(), None, None)
            .unwrap();

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn config_properties_come_from_the_package_configuration() {
        let (executor, loader) = setup();

        let class = ClassBuilder::new("Configured")
            .property(
                PropertySpec::new("endpoint", PropertyUsage::Config)
                    .with_default("http://localhost"),
            )
            .build();
        loader.register(class);

        let mut config = ValueMap::default();
        config.insert("endpoint".to_string(), ReefValue::string("http://prod"));
        loader.set_config("Configured", config);

        let object = executor
            .create_object("Configured", &ValueMap::default(), None, None)
            .unwrap();

        // The deployed configuration wins over the declared default.
        assert_eq!(
            object.get_property("endpoint", None).unwrap(),
            ReefValue::string("http://prod")
        );

        // Methods cannot overwrite config-usage properties.
        let context = executor.create_object_context(&object);
        let error = object
            .set_property("endpoint", Some(ReefValue::string("elsewhere")), &context, false)
            .unwrap_err();
        assert!(error.is_no_write_access());
    }

    #[test]
    fn runtime_properties_without_defaults_are_deferred() {
        let (executor, loader) = setup();

        let class = ClassBuilder::new("Lazy")
            .property(PropertySpec::new("later", PropertyUsage::Runtime))
            .build();
        loader.register(class);

        let object = executor
            .create_object("Lazy", &ValueMap::default(), None, None)
            .unwrap();

        let error = object.get_property("later", None).unwrap_err();
        assert!(error.is_uninitialized_access());
    }
}
