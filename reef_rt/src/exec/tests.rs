use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use reef_core::{ObjectId, ReefError};

use super::*;
use crate::attributes::AttributeKey;
use crate::contracts::{PropertySpec, PropertyUsage};
use crate::object::builders::{ClassBuilder, MethodBuilder};
use crate::object::serialize::DumpType;
use crate::test::setup;

#[test]
fn external_calls_are_actions_only() {
    let (executor, loader) = setup();

    let class = ClassBuilder::new("Api")
        .method(MethodBuilder::new("poke").native(|_, _, _, _, _| Ok(ReefValue::Int(1))))
        .method(
            MethodBuilder::new("act")
                .action()
                .native(|_, _, _, _, _| Ok(ReefValue::Int(2))),
        )
        .method(MethodBuilder::new(".probe").native(|_, _, _, _, _| Ok(ReefValue::Int(3))))
        .build();
    loader.register(class.clone());

    let object = executor
        .create_object("Api", &ValueMap::default(), None, None)
        .unwrap();

    let poke = class.find_single_method("poke").unwrap();
    let act = class.find_single_method("act").unwrap();
    let probe = class.find_single_method(".probe").unwrap();

    let error = executor
        .invoke_method(&poke, &object, None, &[], &ValueMap::default(), false)
        .unwrap_err();
    assert!(matches!(error, ReefError::NotAnAction { .. }));

    assert_eq!(
        executor
            .invoke_method(&act, &object, None, &[], &ValueMap::default(), false)
            .unwrap(),
        ReefValue::Int(2)
    );

    // Lifecycle hooks are exempt from the actions-only restriction.
    assert_eq!(
        executor
            .invoke_method(&probe, &object, None, &[], &ValueMap::default(), false)
            .unwrap(),
        ReefValue::Int(3)
    );

    // A call that already carries a context is not actions-only.
    assert_eq!(
        executor
            .invoke_method(
                &poke,
                &object,
                Some(executor.root_context()),
                &[],
                &ValueMap::default(),
                false,
            )
            .unwrap(),
        ReefValue::Int(1)
    );
}

#[test]
fn handles_invoke_as_external_callers() {
    let (executor, loader) = setup();

    let class = ClassBuilder::new("Fronted")
        .property(PropertySpec::new("state", PropertyUsage::Writable).with_default(0_i64))
        .method(MethodBuilder::new("read").native(|_, context, receiver, _, _| {
            receiver.real_this().get_property("state", Some(context))
        }))
        .method(
            MethodBuilder::new("read_action")
                .action()
                .native(|_, context, receiver, _, _| {
                    receiver.real_this().get_property("state", Some(context))
                }),
        )
        .build();
    loader.register(class);

    let model = ReefValue::from_json(&serde_json::json!({
        "Objects": {"?": {"id": "f-1", "type": "Fronted/0.0.0"}, "state": 11}
    }));
    let handle = executor.load(&model).unwrap().unwrap();

    assert_eq!(
        handle
            .invoke("read_action", &[], &ValueMap::default())
            .unwrap(),
        ReefValue::Int(11)
    );

    let error = handle.invoke("read", &[], &ValueMap::default()).unwrap_err();
    assert!(matches!(error, ReefError::NotAnAction { .. }));

    let error = handle.invoke("missing", &[], &ValueMap::default()).unwrap_err();
    assert!(matches!(error, ReefError::UnknownMethod { .. }));
}

#[test]
fn positional_arguments_canonicalize_by_declaration_order() {
    let (executor, loader) = setup();

    let class = ClassBuilder::new("Greeter")
        .method(
            MethodBuilder::new("greet")
                .argument(PropertySpec::new("name", PropertyUsage::Writable))
                .argument(PropertySpec::new("punct", PropertyUsage::Writable))
                .native(|_, context, _, args, kwargs| {
                    assert!(args.is_empty());
                    assert_eq!(context.get("name"), kwargs.get("name").cloned());
                    let name = kwargs.get("name").and_then(ReefValue::as_str).unwrap_or("");
                    let punct = kwargs.get("punct").and_then(ReefValue::as_str).unwrap_or("");
                    Ok(ReefValue::string(format!("hello {}{}", name, punct)))
                }),
        )
        .build();
    loader.register(class.clone());

    let object = executor
        .create_object("Greeter", &ValueMap::default(), None, None)
        .unwrap();
    let method = class.find_single_method("greet").unwrap();

    let result = executor
        .invoke_method(
            &method,
            &object,
            Some(executor.root_context()),
            &[ReefValue::string("reef"), ReefValue::string("!")],
            &ValueMap::default(),
            false,
        )
        .unwrap();
    assert_eq!(result, ReefValue::string("hello reef!"));

    let error = executor
        .invoke_method(
            &method,
            &object,
            Some(executor.root_context()),
            &[
                ReefValue::Int(1),
                ReefValue::Int(2),
                ReefValue::Int(3),
            ],
            &ValueMap::default(),
            false,
        )
        .unwrap_err();
    assert!(matches!(error, ReefError::ArgumentMismatch { .. }));
}

#[test]
fn expression_bodies_see_positional_slots() {
    let (executor, loader) = setup();

    let class = ClassBuilder::new("Echo")
        .method(
            MethodBuilder::new("echo").expression(|_: &Executor, context: &Context| {
                Ok(context.get("2").unwrap_or(ReefValue::Null))
            }),
        )
        .build();
    loader.register(class.clone());

    let object = executor
        .create_object("Echo", &ValueMap::default(), None, None)
        .unwrap();
    let method = class.find_single_method("echo").unwrap();

    let result = executor
        .invoke_method(
            &method,
            &object,
            Some(executor.root_context()),
            &[ReefValue::Int(5)],
            &ValueMap::default(),
            false,
        )
        .unwrap();
    assert_eq!(result, ReefValue::Int(5));
}

#[test]
fn a_method_may_reenter_itself_on_the_same_task() {
    let (executor, loader) = setup();

    let class = ClassBuilder::new("Recursive")
        .method(
            MethodBuilder::new("countdown").native(|executor, context, receiver, _, kwargs| {
                let depth = kwargs.get("depth").and_then(ReefValue::as_int).unwrap_or(0);
                if depth == 0 {
                    return Ok(ReefValue::Int(0));
                }
                let method = receiver
                    .real_this()
                    .class()
                    .find_single_method("countdown")
                    .unwrap();
                let mut kwargs = ValueMap::default();
                kwargs.insert("depth".to_string(), ReefValue::Int(depth - 1));
                executor.invoke_method(
                    &method,
                    &receiver.real_this(),
                    Some(context),
                    &[],
                    &kwargs,
                    true,
                )
            }),
        )
        .build();
    loader.register(class.clone());

    let object = executor
        .create_object("Recursive", &ValueMap::default(), None, None)
        .unwrap();
    let method = class.find_single_method("countdown").unwrap();

    let mut kwargs = ValueMap::default();
    kwargs.insert("depth".to_string(), ReefValue::Int(4));

    // Without same-task re-entry this would deadlock on its own lock.
    let result = executor
        .invoke_method(
            &method,
            &object,
            Some(executor.root_context()),
            &[],
            &kwargs,
            false,
        )
        .unwrap();
    assert_eq!(result, ReefValue::Int(0));
}

#[test]
fn concurrent_tasks_serialize_on_the_method_lock() {
    let (executor, loader) = setup();

    let class = ClassBuilder::new("Counter")
        .property(PropertySpec::new("value", PropertyUsage::Writable).with_default(0_i64))
        .method(
            MethodBuilder::new("bump").native(|_, context, receiver, _, _| {
                let this = receiver.real_this();
                let current = this
                    .get_property("value", Some(context))?
                    .as_int()
                    .unwrap_or(0);
                // Lose the race on purpose unless the lock serializes us.
                thread::sleep(Duration::from_millis(30));
                this.set_property("value", Some(ReefValue::Int(current + 1)), context, false)?;
                Ok(ReefValue::Int(current + 1))
            }),
        )
        .build();
    loader.register(class.clone());

    let object = executor
        .create_object("Counter", &ValueMap::default(), None, None)
        .unwrap();
    let method = class.find_single_method("bump").unwrap();

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let executor = executor.clone();
            let object = object.clone();
            let method = method.clone();
            thread::spawn(move || {
                let context = executor.root_context().clone();
                executor
                    .invoke_method(&method, &object, Some(&context), &[], &ValueMap::default(), false)
                    .unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // The second task observed the first task's completed write.
    assert_eq!(
        object.get_property("value", None).unwrap(),
        ReefValue::Int(2)
    );
}

fn node_class(loader: &crate::loader::StaticClassLoader) {
    let class = ClassBuilder::new("Node")
        .version("1.0.0")
        .property(PropertySpec::new("label", PropertyUsage::Writable).with_default(""))
        .property(PropertySpec::new("child", PropertyUsage::Writable).with_default(ReefValue::Null))
        .build();
    loader.register(class);
}

#[test]
fn load_materializes_the_graph_and_attributes() {
    let (executor, loader) = setup();
    node_class(&loader);

    let model = ReefValue::from_json(&serde_json::json!({
        "Objects": {
            "?": {"id": "root-1", "type": "Node/1.0.0", "name": "root"},
            "label": "hello",
            "child": {
                "?": {"id": "leaf-1", "type": "Node/1.0.0"},
                "label": "inner",
                "child": null
            }
        },
        "Attributes": [["root-1", "Node", "mark", 5]]
    }));

    let handle = executor.load(&model).unwrap().unwrap();
    let root = handle.object();

    assert_eq!(root.object_id(), &ObjectId::from("root-1"));
    assert_eq!(root.name().as_deref(), Some("root"));
    assert!(executor.object_store().has(&ObjectId::from("leaf-1")));

    assert_eq!(
        root.get_property("label", None).unwrap(),
        ReefValue::string("hello")
    );
    let child = root.get_property("child", None).unwrap();
    match child {
        ReefValue::Object(child) => {
            assert_eq!(child.object_id(), &ObjectId::from("leaf-1"));
            assert!(child.initialized());
        }
        other => panic!("expected an object reference, got {:?}", other),
    }

    assert_eq!(
        executor.attribute_store().get(&AttributeKey {
            owner: ObjectId::from("root-1"),
            declaring_type: "Node".into(),
            name: "mark".into(),
        }),
        Some(ReefValue::Int(5))
    );
}

#[test]
fn serializable_dump_survives_a_reload() {
    let (executor, loader) = setup();
    node_class(&loader);

    let model = ReefValue::from_json(&serde_json::json!({
        "Objects": {
            "?": {"id": "root-1", "type": "Node/1.0.0", "name": "root"},
            "label": "hello",
            "child": {
                "?": {"id": "leaf-1", "type": "Node/1.0.0"},
                "label": "inner",
                "child": null
            }
        }
    }));
    let handle = executor.load(&model).unwrap().unwrap();

    let dumped = ReefValue::Map(
        handle
            .object()
            .to_dictionary(false, DumpType::Serializable, false),
    )
    .to_json();
    let reloaded_model =
        ReefValue::from_json(&serde_json::json!({ "Objects": dumped, "Attributes": null }));

    let second = Executor::new(loader.clone());
    let reloaded = second.load(&reloaded_model).unwrap().unwrap();
    let root = reloaded.object();

    assert_eq!(root.object_id(), &ObjectId::from("root-1"));
    assert_eq!(
        root.get_property("label", None).unwrap(),
        ReefValue::string("hello")
    );

    let child = root.get_property("child", None).unwrap();
    match child {
        ReefValue::Object(child) => {
            assert_eq!(child.object_id(), &ObjectId::from("leaf-1"));
            assert_eq!(
                child.get_property("label", None).unwrap(),
                ReefValue::string("inner")
            );
        }
        other => panic!("expected an object reference, got {:?}", other),
    }
}

#[test]
fn reloading_reuses_live_identities() {
    let (executor, loader) = setup();
    node_class(&loader);

    let model = ReefValue::from_json(&serde_json::json!({
        "Objects": {"?": {"id": "root-1", "type": "Node/1.0.0"}, "label": "x", "child": null}
    }));

    let first = executor.load(&model).unwrap().unwrap();
    let second = executor.load(&model).unwrap().unwrap();
    assert!(Arc::ptr_eq(first.object(), second.object()));
}

#[test]
fn cleanup_destroys_exactly_the_orphans() {
    let (executor, loader) = setup();

    let destroyed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let log = destroyed.clone();
    let disposable = ClassBuilder::new("Disposable")
        .property(PropertySpec::new("left", PropertyUsage::Writable).with_default(ReefValue::Null))
        .property(PropertySpec::new("right", PropertyUsage::Writable).with_default(ReefValue::Null))
        .method(
            MethodBuilder::new(DESTROY_METHOD).native(move |_, _, receiver, _, _| {
                log.lock().push(receiver.object_id().as_str().to_string());
                Ok(ReefValue::Null)
            }),
        )
        .build();

    let log = destroyed.clone();
    let fragile = ClassBuilder::new("Fragile")
        .method(
            MethodBuilder::new(DESTROY_METHOD).native(move |_, _, receiver, _, _| {
                log.lock().push(receiver.object_id().as_str().to_string());
                Err(ReefError::Raised {
                    message: "destructor exploded".into(),
                })
            }),
        )
        .build();

    loader.register(disposable);
    loader.register(fragile);

    let previous = ReefValue::from_json(&serde_json::json!({
        "ObjectsCopy": {
            "?": {"id": "x", "type": "Disposable/0.0.0"},
            "left": {"?": {"id": "y", "type": "Disposable/0.0.0"}, "left": null, "right": null},
            "right": {"?": {"id": "z", "type": "Fragile/0.0.0"}}
        }
    }));

    let current = ReefValue::from_json(&serde_json::json!({
        "Objects": {"?": {"id": "x", "type": "Disposable/0.0.0"}, "left": null, "right": null}
    }));

    executor.load(&current).unwrap().unwrap();
    executor.cleanup(&previous).unwrap();

    let destroyed = destroyed.lock();
    assert_eq!(destroyed.iter().filter(|id| *id == "y").count(), 1);
    // The raising destructor ran, and its failure did not stop cleanup.
    assert_eq!(destroyed.iter().filter(|id| *id == "z").count(), 1);
    assert!(!destroyed.iter().any(|id| *id == "x"));
}

#[test]
fn cleanup_without_a_snapshot_is_a_no_op() {
    let (executor, _) = setup();
    executor
        .cleanup(&ReefValue::Map(ValueMap::default()))
        .unwrap();
}

#[test]
fn loaded_objects_run_init_but_not_the_legacy_constructor() {
    let (executor, loader) = setup();

    let inits = Arc::new(AtomicUsize::new(0));
    let legacies = Arc::new(AtomicUsize::new(0));

    let init_counter = inits.clone();
    let legacy_counter = legacies.clone();
    let class = ClassBuilder::new("Tracked")
        .method(
            MethodBuilder::new(crate::object::class::INIT_METHOD).native(move |_, _, _, _, _| {
                init_counter.fetch_add(1, Ordering::SeqCst);
                Ok(ReefValue::Null)
            }),
        )
        .method(
            MethodBuilder::new(crate::object::class::LEGACY_INIT_METHOD).native(
                move |_, _, _, _, _| {
                    legacy_counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ReefValue::Null)
                },
            ),
        )
        .build();
    loader.register(class);

    let model = ReefValue::from_json(&serde_json::json!({
        "Objects": {"?": {"id": "t-1", "type": "Tracked/0.0.0"}}
    }));
    executor.load(&model).unwrap().unwrap();

    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert_eq!(legacies.load(Ordering::SeqCst), 0);

    // Fresh construction takes the legacy path too.
    executor
        .create_object("Tracked", &ValueMap::default(), None, None)
        .unwrap();
    assert_eq!(inits.load(Ordering::SeqCst), 2);
    assert_eq!(legacies.load(Ordering::SeqCst), 1);
}
