//! Dictionary serialization of live objects.

use std::sync::Arc;

use crate::contracts::{PropertyUsage, SerializeHint};
use crate::object::instance::ReefObject;
use crate::object::value::{ReefValue, ValueMap};

/// Reserved marker key carrying object identity in serialized graphs.
pub const SYS_KEY: &str = "?";
pub const SYS_ID: &str = "id";
pub const SYS_TYPE: &str = "type";
pub const SYS_NAME: &str = "name";

/// The serialization modes of [`ReefObject::to_dictionary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpType {
    /// Flat properties plus a `?` marker block carrying the formatted
    /// type string. This is the form [`crate::exec::Executor::load`]
    /// consumes.
    Serializable,

    /// Properties nested under the type string, identity hoisted to the
    /// top level.
    Inline,

    /// Like `Serializable`, but the marker keeps the live class reference
    /// instead of its string form.
    Mixed,
}

impl ReefObject {
    /// Serialize this object's properties (merged over its ancestors')
    /// into a dictionary.
    ///
    /// Runtime- and config-usage properties are hidden unless
    /// `include_hidden`. With `allow_refs`, properties hinted as
    /// references collapse to the referenced object's bare id.
    pub fn to_dictionary(
        self: &Arc<Self>,
        include_hidden: bool,
        dump_type: DumpType,
        allow_refs: bool,
    ) -> ValueMap {
        let real = self.real_this();
        let mut result = ValueMap::default();

        for parent in self.parents() {
            result.extend(parent.to_dictionary(include_hidden, DumpType::Serializable, allow_refs));
        }

        for (name, spec) in self.class().properties() {
            let Some(mut value) = real.raw_property(name) else {
                continue;
            };
            if matches!(spec.usage(), PropertyUsage::Runtime | PropertyUsage::Config)
                && !include_hidden
            {
                continue;
            }
            if allow_refs && spec.serialize_hint() == SerializeHint::Reference {
                if let ReefValue::Object(object) = &value {
                    value = ReefValue::string(object.object_id().as_str());
                }
            }
            result.insert(name.clone(), value);
        }

        let name_value = match real.display_name() {
            Some(name) => ReefValue::Str(name),
            None => ReefValue::Null,
        };

        match dump_type {
            DumpType::Inline => {
                result.remove(SYS_KEY);
                let mut wrapped = ValueMap::default();
                wrapped.insert(self.class().type_string(), ReefValue::Map(result));
                wrapped.insert(SYS_ID.to_string(), ReefValue::string(self.object_id().as_str()));
                wrapped.insert(SYS_NAME.to_string(), name_value);
                wrapped
            }
            DumpType::Mixed => {
                let mut marker = ValueMap::default();
                marker.insert(SYS_TYPE.to_string(), ReefValue::Type(self.class().clone()));
                marker.insert(SYS_ID.to_string(), ReefValue::string(self.object_id().as_str()));
                marker.insert(SYS_NAME.to_string(), name_value);
                result.insert(SYS_KEY.to_string(), ReefValue::Map(marker));
                result
            }
            DumpType::Serializable => {
                let mut marker = ValueMap::default();
                marker.insert(
                    SYS_TYPE.to_string(),
                    ReefValue::string(self.class().type_string()),
                );
                marker.insert(SYS_ID.to_string(), ReefValue::string(self.object_id().as_str()));
                marker.insert(SYS_NAME.to_string(), name_value);
                result.insert(SYS_KEY.to_string(), ReefValue::Map(marker));
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{PropertySpec, PropertyUsage};
    use crate::object::builders::ClassBuilder;
    use crate::test::setup;

    fn sample(loader: &crate::loader::StaticClassLoader) -> Arc<crate::object::class::ReefClass> {
        let class = ClassBuilder::new("Sample")
            .version("1.2.0")
            .property(PropertySpec::new("visible", PropertyUsage::Writable).with_default(1_i64))
            .property(PropertySpec::new("hidden", PropertyUsage::Runtime).with_default(2_i64))
            .build();
        loader.register(class.clone());
        class
    }

    #[test]
    fn serializable_mode_carries_the_marker_block() {
        let (executor, loader) = setup();
        sample(&loader);

        let object = executor
            .create_object("Sample", &ValueMap::default(), None, Some("thing"))
            .unwrap();
        let dict = object.to_dictionary(false, DumpType::Serializable, false);

        assert_eq!(dict.get("visible"), Some(&ReefValue::Int(1)));
        assert_eq!(dict.get("hidden"), None);

        let marker = dict.get(SYS_KEY).and_then(ReefValue::as_map).unwrap();
        assert_eq!(
            marker.get(SYS_TYPE),
            Some(&ReefValue::string("Sample/1.2.0"))
        );
        assert_eq!(
            marker.get(SYS_ID),
            Some(&ReefValue::string(object.object_id().as_str()))
        );
        assert_eq!(marker.get(SYS_NAME), Some(&ReefValue::string("thing")));
    }

    #[test]
    fn hidden_usages_appear_on_request() {
        let (executor, loader) = setup();
        sample(&loader);

        let object = executor
            .create_object("Sample", &ValueMap::default(), None, None)
            .unwrap();
        let dict = object.to_dictionary(true, DumpType::Serializable, false);

        assert_eq!(dict.get("hidden"), Some(&ReefValue::Int(2)));
    }

    #[test]
    fn inline_mode_nests_properties_under_the_type() {
        let (executor, loader) = setup();
        sample(&loader);

        let object = executor
            .create_object("Sample", &ValueMap::default(), None, None)
            .unwrap();
        let dict = object.to_dictionary(false, DumpType::Inline, false);

        assert!(dict.get(SYS_KEY).is_none());
        let nested = dict.get("Sample/1.2.0").and_then(ReefValue::as_map).unwrap();
        assert_eq!(nested.get("visible"), Some(&ReefValue::Int(1)));
        assert_eq!(
            dict.get(SYS_ID),
            Some(&ReefValue::string(object.object_id().as_str()))
        );
    }

    #[test]
    fn mixed_mode_keeps_the_raw_class() {
        let (executor, loader) = setup();
        let class = sample(&loader);

        let object = executor
            .create_object("Sample", &ValueMap::default(), None, None)
            .unwrap();
        let dict = object.to_dictionary(false, DumpType::Mixed, false);

        let marker = dict.get(SYS_KEY).and_then(ReefValue::as_map).unwrap();
        assert_eq!(marker.get(SYS_TYPE), Some(&ReefValue::Type(class)));
    }

    #[test]
    fn reference_hinted_properties_collapse_to_ids() {
        let (executor, loader) = setup();

        let leaf = ClassBuilder::new("Leaf").build();
        let holder = ClassBuilder::new("Holder")
            .property(
                PropertySpec::new("child", PropertyUsage::Writable)
                    .with_default(ReefValue::Null)
                    .serialized_as_reference(),
            )
            .build();
        loader.register(leaf);
        loader.register(holder);

        let child = executor
            .create_object("Leaf", &ValueMap::default(), None, None)
            .unwrap();
        let object = executor
            .create_object("Holder", &ValueMap::default(), None, None)
            .unwrap();
        let context = executor.create_object_context(&object);
        object
            .set_property("child", Some(ReefValue::Object(child.clone())), &context, false)
            .unwrap();

        let dict = object.to_dictionary(false, DumpType::Serializable, true);
        assert_eq!(
            dict.get("child"),
            Some(&ReefValue::string(child.object_id().as_str()))
        );

        let inline = object.to_dictionary(false, DumpType::Serializable, false);
        assert!(matches!(inline.get("child"), Some(ReefValue::Object(_))));
    }
}
