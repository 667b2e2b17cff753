//! Collection: a named set of typed elements backed by a ChunkMap.
//!
//! Element names are stored as `{"name": ...}` key chunks and element
//! descriptors as value chunks. After every mutation the map descriptor is
//! saved to the NVD under the collection UUID.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::chunk::{Chunk, ChunkId};
use crate::element::{Element, ElementDescriptor, TypeRegistry};
use crate::error::{CollectionError, CollectionResult, StoreError};
use crate::map::{ChunkMap, MapDescriptor};
use crate::nvd::Nvd;
use crate::store::ChunkStore;

#[derive(Serialize)]
struct NameKey<'a> {
    name: &'a str,
}

#[derive(serde::Deserialize)]
struct OwnedNameKey {
    name: String,
}

pub struct Collection {
    uuid: Uuid,
    elements: ChunkMap,
    store: Arc<dyn ChunkStore>,
    nvd: Arc<dyn Nvd>,
    registry: Arc<TypeRegistry>,
}

impl Collection {
    pub fn new(
        uuid: &str,
        degree: usize,
        store: Arc<dyn ChunkStore>,
        nvd: Arc<dyn Nvd>,
        registry: Arc<TypeRegistry>,
    ) -> CollectionResult<Self> {
        let uuid = Uuid::parse_str(uuid).map_err(|_| CollectionError::InvalidUuid(uuid.to_string()))?;
        Ok(Collection {
            uuid,
            elements: ChunkMap::new(degree, store.clone())?,
            store,
            nvd,
            registry,
        })
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Load the persisted map descriptor, if any.
    pub fn init(&mut self) -> CollectionResult<()> {
        if !self.nvd.available() {
            return Err(CollectionError::NvdUnavailable);
        }
        if let Some(saved) = self.nvd.load(&self.nvd_key())? {
            let descriptor: MapDescriptor =
                serde_json::from_value(saved).map_err(StoreError::from)?;
            self.elements = ChunkMap::from_descriptor(&descriptor, None, self.store.clone())?;
        }
        Ok(())
    }

    fn nvd_key(&self) -> String {
        self.uuid.to_string()
    }

    fn persist(&self) -> CollectionResult<()> {
        let descriptor = serde_json::to_value(self.elements.descriptor()).map_err(StoreError::from)?;
        self.nvd.save(&self.nvd_key(), descriptor)?;
        Ok(())
    }

    fn name_id(name: &str) -> CollectionResult<ChunkId> {
        Ok(ChunkId::of_object(&NameKey { name })?)
    }

    fn check_type(&self, descriptor: &ElementDescriptor) -> CollectionResult<()> {
        if self.registry.contains(&descriptor.type_name)? {
            Ok(())
        } else {
            Err(CollectionError::UnsupportedType(descriptor.type_name.clone()))
        }
    }

    fn put_element(&mut self, name: &str, descriptor: &ElementDescriptor) -> CollectionResult<()> {
        let name_chunk = Chunk::from_object(self.store.as_ref(), &NameKey { name })?;
        let descriptor_chunk = Chunk::from_object(self.store.as_ref(), descriptor)?;
        self.elements.set(&name_chunk, &descriptor_chunk)?;
        self.persist()
    }

    pub fn create_element(&mut self, name: &str, descriptor: &ElementDescriptor) -> CollectionResult<()> {
        self.check_type(descriptor)?;
        self.put_element(name, descriptor)
    }

    pub fn delete_element(&mut self, name: &str) -> CollectionResult<()> {
        self.elements.delete(&Self::name_id(name)?)?;
        self.persist()
    }

    pub fn update_element(&mut self, name: &str, descriptor: &ElementDescriptor) -> CollectionResult<()> {
        self.check_type(descriptor)?;
        if !self.has_element(name)? {
            return Err(CollectionError::ElementNotFound(name.to_string()));
        }
        self.put_element(name, descriptor)
    }

    pub fn has_element(&self, name: &str) -> CollectionResult<bool> {
        Ok(self.elements.has(&Self::name_id(name)?)?)
    }

    /// The stored descriptor of an element, without resolving its type.
    pub fn get_descriptor(&self, name: &str) -> CollectionResult<Option<ElementDescriptor>> {
        match self.elements.get(&Self::name_id(name)?)? {
            Some(chunk) => Ok(Some(chunk.expand(self.store.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn get_element(&self, name: &str) -> CollectionResult<Option<Box<dyn Element>>> {
        match self.get_descriptor(name)? {
            Some(descriptor) => Ok(Some(self.registry.build(&descriptor)?)),
            None => Ok(None),
        }
    }

    /// Names of all elements, in key order.
    pub fn element_names(&self) -> CollectionResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.elements.entries() {
            let (key, _) = entry?;
            let name_key: OwnedNameKey = Chunk::from_identifier(key, None).expand(self.store.as_ref())?;
            names.push(name_key.name);
        }
        Ok(names)
    }

    /// Store the map descriptor and return its identifier, the state hash.
    pub fn get_state(&self) -> CollectionResult<ChunkId> {
        Ok(self.elements.descriptor().store(self.store.as_ref())?)
    }

    /// Point the collection at a previously issued state and persist it.
    pub fn set_state(&mut self, state: &ChunkId) -> CollectionResult<()> {
        let descriptor = MapDescriptor::load(self.store.as_ref(), state)?;
        self.elements = ChunkMap::from_descriptor(&descriptor, None, self.store.clone())?;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ObjectElement;
    use crate::error::TreeError;
    use crate::nvd::MemoryNvd;
    use crate::MemoryChunkStore;
    use serde_json::json;

    const UUID: &str = "6f1c2a7e-3b4d-4e5f-8a9b-0c1d2e3f4a5b";

    fn collection_with(store: Arc<dyn ChunkStore>, nvd: Arc<dyn Nvd>) -> Collection {
        let mut collection =
            Collection::new(UUID, 5, store, nvd, Arc::new(TypeRegistry::new())).unwrap();
        collection.init().unwrap();
        collection
    }

    fn collection() -> Collection {
        collection_with(Arc::new(MemoryChunkStore::new()), Arc::new(MemoryNvd::new()))
    }

    #[test]
    fn test_invalid_uuid() {
        let result = Collection::new(
            "not-a-uuid",
            5,
            Arc::new(MemoryChunkStore::new()),
            Arc::new(MemoryNvd::new()),
            Arc::new(TypeRegistry::new()),
        );
        assert!(matches!(result, Err(CollectionError::InvalidUuid(_))));
    }

    #[test]
    fn test_create_get_delete() {
        let mut collection = collection();
        collection
            .create_element("x", &ElementDescriptor::object(json!({"v": 1})))
            .unwrap();

        assert!(collection.has_element("x").unwrap());
        let element = collection.get_element("x").unwrap().unwrap();
        assert_eq!(
            element.downcast_ref::<ObjectElement>().unwrap().data,
            json!({"v": 1})
        );

        collection.delete_element("x").unwrap();
        assert!(!collection.has_element("x").unwrap());
        assert!(collection.get_element("x").unwrap().is_none());
    }

    #[test]
    fn test_unsupported_type() {
        let mut collection = collection();
        let descriptor = ElementDescriptor::new("blob", json!(null));
        assert!(matches!(
            collection.create_element("x", &descriptor),
            Err(CollectionError::UnsupportedType(t)) if t == "blob"
        ));
        assert!(!collection.has_element("x").unwrap());
    }

    #[test]
    fn test_update_missing_element() {
        let mut collection = collection();
        let result = collection.update_element("x", &ElementDescriptor::object(json!(1)));
        assert!(matches!(result, Err(CollectionError::ElementNotFound(n)) if n == "x"));
    }

    #[test]
    fn test_delete_missing_element() {
        let mut collection = collection();
        collection.create_element("a", &ElementDescriptor::object(json!(1))).unwrap();
        assert!(matches!(
            collection.delete_element("b"),
            Err(CollectionError::Tree(TreeError::KeyNotFound(_)))
        ));
    }

    #[test]
    fn test_state_is_persisted() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let nvd: Arc<dyn Nvd> = Arc::new(MemoryNvd::new());

        let mut first = collection_with(store.clone(), nvd.clone());
        first.create_element("x", &ElementDescriptor::object(json!("x"))).unwrap();
        let state = first.get_state().unwrap();

        let second = collection_with(store, nvd);
        assert_eq!(second.get_state().unwrap(), state);
        assert!(second.has_element("x").unwrap());
    }

    #[test]
    fn test_set_state_restores_snapshot() {
        let mut collection = collection();
        let empty = collection.get_state().unwrap();
        collection.create_element("x", &ElementDescriptor::object(json!(1))).unwrap();
        let with_x = collection.get_state().unwrap();

        collection.set_state(&empty).unwrap();
        assert!(!collection.has_element("x").unwrap());
        collection.set_state(&with_x).unwrap();
        assert!(collection.has_element("x").unwrap());
    }

    #[test]
    fn test_element_names_in_key_order() {
        let mut collection = collection();
        for name in ["c", "a", "b"] {
            collection.create_element(name, &ElementDescriptor::object(json!(name))).unwrap();
        }
        let mut names = collection.element_names().unwrap();
        assert_eq!(names.len(), 3);
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
