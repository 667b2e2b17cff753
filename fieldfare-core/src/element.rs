//! Typed collection elements and the registry that reconstructs them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::error::{CollectionError, CollectionResult};

/// Type name of the built-in [`ObjectElement`].
pub const OBJECT_TYPE: &str = "obj";

/// Stored form of an element: its registered type plus type-specific data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    #[serde(rename = "type")]
    pub type_name: String,
    pub data: Value,
}

impl ElementDescriptor {
    pub fn new(type_name: impl Into<String>, data: Value) -> Self {
        ElementDescriptor {
            type_name: type_name.into(),
            data,
        }
    }

    /// Descriptor of an [`ObjectElement`] holding `data`.
    pub fn object(data: Value) -> Self {
        Self::new(OBJECT_TYPE, data)
    }
}

pub trait Element: Debug + Send + Sync {
    fn descriptor(&self) -> ElementDescriptor;

    fn as_any(&self) -> &dyn Any;
}

impl dyn Element {
    pub fn downcast_ref<T: Element + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// An element holding arbitrary JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectElement {
    pub data: Value,
}

impl ObjectElement {
    pub fn from_descriptor(descriptor: &ElementDescriptor) -> CollectionResult<Box<dyn Element>> {
        Ok(Box::new(ObjectElement {
            data: descriptor.data.clone(),
        }))
    }
}

impl Element for ObjectElement {
    fn descriptor(&self) -> ElementDescriptor {
        ElementDescriptor::object(self.data.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub type ElementFactory =
    Arc<dyn Fn(&ElementDescriptor) -> CollectionResult<Box<dyn Element>> + Send + Sync>;

/// Maps element type names to the factories that rebuild them.
pub struct TypeRegistry {
    types: RwLock<HashMap<String, ElementFactory>>,
}

impl TypeRegistry {
    /// A registry holding only the built-in `"obj"` type.
    pub fn new() -> Self {
        let registry = TypeRegistry {
            types: RwLock::new(HashMap::new()),
        };
        if let Ok(mut types) = registry.types.write() {
            let factory: ElementFactory = Arc::new(ObjectElement::from_descriptor);
            types.insert(OBJECT_TYPE.to_string(), factory);
        }
        registry
    }

    /// Register `factory` for `type_name`; a later registration replaces an earlier one.
    pub fn register<F>(&self, type_name: &str, factory: F) -> CollectionResult<()>
    where
        F: Fn(&ElementDescriptor) -> CollectionResult<Box<dyn Element>> + Send + Sync + 'static,
    {
        let previous = self
            .types
            .write()?
            .insert(type_name.to_string(), Arc::new(factory));
        if previous.is_some() {
            warn!(type_name, "element type registered again, replacing factory");
        }
        Ok(())
    }

    pub fn contains(&self, type_name: &str) -> CollectionResult<bool> {
        Ok(self.types.read()?.contains_key(type_name))
    }

    /// Rebuild an element from its descriptor.
    pub fn build(&self, descriptor: &ElementDescriptor) -> CollectionResult<Box<dyn Element>> {
        let factory = self
            .types
            .read()?
            .get(&descriptor.type_name)
            .cloned()
            .ok_or_else(|| CollectionError::TypeNotRegistered(descriptor.type_name.clone()))?;
        factory(descriptor)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    #[derive(Debug)]
    struct Counter(u64);

    impl Element for Counter {
        fn descriptor(&self) -> ElementDescriptor {
            ElementDescriptor::new("counter", json!(self.0))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn counter_factory(descriptor: &ElementDescriptor) -> CollectionResult<Box<dyn Element>> {
        let value = descriptor.data.as_u64().ok_or_else(|| CollectionError::MalformedElement {
            name: "counter".into(),
            reason: "expected an integer".into(),
        })?;
        Ok(Box::new(Counter(value)))
    }

    #[test]
    fn test_descriptor_wire_form() {
        let descriptor = ElementDescriptor::object(json!({"a": 1}));
        assert_eq!(
            serde_json::to_value(&descriptor).unwrap(),
            json!({"type": "obj", "data": {"a": 1}})
        );
    }

    #[test]
    fn test_builtin_object_type() {
        let registry = TypeRegistry::new();
        assert!(registry.contains(OBJECT_TYPE).unwrap());

        let element = registry.build(&ElementDescriptor::object(json!([1, 2]))).unwrap();
        let object = element.downcast_ref::<ObjectElement>().unwrap();
        assert_eq!(object.data, json!([1, 2]));
    }

    #[test]
    fn test_unregistered_type() {
        let registry = TypeRegistry::new();
        let result = registry.build(&ElementDescriptor::new("counter", json!(1)));
        assert!(matches!(result, Err(CollectionError::TypeNotRegistered(t)) if t == "counter"));
    }

    #[traced_test]
    #[test]
    fn test_register_twice_replaces() {
        let registry = TypeRegistry::new();
        registry.register("counter", counter_factory).unwrap();
        registry
            .register("counter", |_: &ElementDescriptor| -> CollectionResult<Box<dyn Element>> {
                Ok(Box::new(Counter(0)))
            })
            .unwrap();

        let element = registry.build(&ElementDescriptor::new("counter", json!(7))).unwrap();
        assert_eq!(element.downcast_ref::<Counter>().unwrap().0, 0);
        assert!(logs_contain("registered again"));
    }
}
