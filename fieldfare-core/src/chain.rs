//! Version chains: backward walks over version statements.
//!
//! A version is a collection state. Its statement, if any, is the
//! [`VERSION_ELEMENT`] of that state and names the previous version. A state
//! without a statement is a genesis state and ends the chain.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::chunk::{ChunkId, HostId};
use crate::element::ElementDescriptor;
use crate::error::{CollectionError, VersionError, VersionResult};
use crate::map::MapDescriptor;
use crate::statement::{VersionStatement, VERSION_ELEMENT};
use crate::store::ChunkStore;
use crate::tree::ChunkTree;

/// Read the statement recorded in the collection state `version`.
///
/// Returns `None` for a genesis state.
pub fn statement_at(
    store: &Arc<dyn ChunkStore>,
    version: &ChunkId,
    owner: Option<HostId>,
) -> VersionResult<Option<VersionStatement>> {
    let descriptor = MapDescriptor::load(store.as_ref(), version)?;
    let tree = ChunkTree::open(descriptor.degree, descriptor.root, owner, store.clone())?;
    let name_key = ChunkId::of_object(&serde_json::json!({ "name": VERSION_ELEMENT }))?;

    let element = match tree.get(&name_key)? {
        Some(chunk) => chunk,
        None => return Ok(None),
    };
    let element: ElementDescriptor = element.expand(store.as_ref())?;
    let statement = serde_json::from_value(element.data).map_err(|e| {
        CollectionError::MalformedElement {
            name: VERSION_ELEMENT.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(Some(statement))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub version: ChunkId,
    /// `None` for the genesis state
    pub statement: Option<VersionStatement>,
}

/// Iterator from a head version toward genesis, at most `max_depth` links.
pub struct ChainWalk {
    store: Arc<dyn ChunkStore>,
    owner: Option<HostId>,
    next: Option<ChunkId>,
    remaining: usize,
}

impl Iterator for ChainWalk {
    type Item = VersionResult<ChainLink>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let version = self.next.take()?;
        self.remaining -= 1;
        match statement_at(&self.store, &version, self.owner.clone()) {
            Ok(statement) => {
                self.next = statement.as_ref().and_then(|s| s.prev);
                Some(Ok(ChainLink { version, statement }))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Boundary {
    version: ChunkId,
    inclusive: bool,
}

pub struct VersionChain {
    head: ChunkId,
    owner: Option<HostId>,
    max_depth: usize,
    store: Arc<dyn ChunkStore>,
    boundary: Option<Boundary>,
    links: Option<Vec<ChainLink>>,
}

impl VersionChain {
    pub fn new(head: ChunkId, owner: Option<HostId>, max_depth: usize, store: Arc<dyn ChunkStore>) -> Self {
        VersionChain {
            head,
            owner,
            max_depth,
            store,
            boundary: None,
            links: None,
        }
    }

    pub fn head(&self) -> ChunkId {
        self.head
    }

    /// The version this chain was limited to, if any.
    pub fn base(&self) -> Option<ChunkId> {
        self.boundary.map(|b| b.version)
    }

    pub fn owner(&self) -> Option<&HostId> {
        self.owner.as_ref()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Stop the chain at `boundary`, keeping it only if `inclusive`.
    pub fn limit(&mut self, boundary: ChunkId, inclusive: bool) -> &mut Self {
        self.boundary = Some(Boundary {
            version: boundary,
            inclusive,
        });
        self.links = None;
        self
    }

    /// Walk from the head, ignoring any limit.
    pub fn walk(&self) -> ChainWalk {
        ChainWalk {
            store: self.store.clone(),
            owner: self.owner.clone(),
            next: Some(self.head),
            remaining: self.max_depth,
        }
    }

    /// Links of the chain, newest first.
    pub fn links(&mut self) -> VersionResult<&[ChainLink]> {
        if self.links.is_none() {
            let links = self.resolve()?;
            self.links = Some(links);
        }
        Ok(self.links.as_deref().unwrap_or(&[]))
    }

    fn resolve(&self) -> VersionResult<Vec<ChainLink>> {
        let mut links = Vec::new();
        for link in self.walk() {
            let link = link?;
            if let Some(boundary) = self.boundary {
                if link.version == boundary.version {
                    if boundary.inclusive {
                        links.push(link);
                    }
                    return Ok(links);
                }
            }
            links.push(link);
        }
        match self.boundary {
            Some(boundary) => Err(VersionError::BoundaryNotReached {
                head: self.head,
                boundary: boundary.version,
                depth: self.max_depth,
            }),
            None => Ok(links),
        }
    }

    pub fn length(&mut self) -> VersionResult<usize> {
        Ok(self.links()?.len())
    }

    /// Statements of the chain, oldest first. Genesis links carry none and are skipped.
    pub fn statements(&mut self) -> VersionResult<Vec<(ChunkId, VersionStatement)>> {
        Ok(self
            .links()?
            .iter()
            .rev()
            .filter_map(|link| link.statement.clone().map(|s| (link.version, s)))
            .collect())
    }

    /// Nearest version reachable from both chains.
    ///
    /// Both chains are walked one level at a time until one reaches a
    /// version the other has already visited.
    pub fn find_common_version(a: &VersionChain, b: &VersionChain) -> VersionResult<ChunkId> {
        let mut walk_a = a.walk();
        let mut walk_b = b.walk();
        let mut visited_a = HashSet::new();
        let mut visited_b = HashSet::new();

        loop {
            let link_a = walk_a.next().transpose()?;
            let link_b = walk_b.next().transpose()?;
            if link_a.is_none() && link_b.is_none() {
                return Err(VersionError::NoCommonVersion {
                    depth: a.max_depth.max(b.max_depth),
                });
            }
            if let Some(link) = link_a {
                if visited_b.contains(&link.version) {
                    debug!(version = %link.version, "common version found");
                    return Ok(link.version);
                }
                visited_a.insert(link.version);
            }
            if let Some(link) = link_b {
                if visited_a.contains(&link.version) {
                    debug!(version = %link.version, "common version found");
                    return Ok(link.version);
                }
                visited_b.insert(link.version);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use crate::element::TypeRegistry;
    use crate::nvd::MemoryNvd;
    use crate::chunk::Chunk;
    use crate::statement::StatementBody;
    use crate::MemoryChunkStore;
    use serde_json::json;

    const UUID: &str = "8a7b6c5d-4e3f-4a1b-9c8d-7e6f5a4b3c2d";

    /// Builds unsigned statement chains on a plain collection.
    struct ChainBuilder {
        collection: Collection,
        store: Arc<dyn ChunkStore>,
    }

    impl ChainBuilder {
        fn new(store: Arc<dyn ChunkStore>) -> Self {
            let collection = Collection::new(
                UUID,
                5,
                store.clone(),
                Arc::new(MemoryNvd::new()),
                Arc::new(TypeRegistry::new()),
            )
            .unwrap();
            ChainBuilder { collection, store }
        }

        fn state(&self) -> ChunkId {
            self.collection.get_state().unwrap()
        }

        /// Create element `name` and record a statement for it.
        fn step(&mut self, name: &str) -> ChunkId {
            let prev = self.state();
            self.collection
                .create_element(name, &ElementDescriptor::object(json!(name)))
                .unwrap();
            let body = Chunk::from_object(self.store.as_ref(), &StatementBody::Plain { changes: vec![] })
                .unwrap();
            let statement = VersionStatement::new(HostId::new("h"), Some(prev), body.id);
            let descriptor = ElementDescriptor::object(serde_json::to_value(&statement).unwrap());
            self.collection.create_element(VERSION_ELEMENT, &descriptor).unwrap();
            self.state()
        }
    }

    #[test]
    fn test_walk_to_genesis() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let mut builder = ChainBuilder::new(store.clone());
        let genesis = builder.state();
        let v1 = builder.step("a");
        let v2 = builder.step("b");

        let links: Vec<_> = VersionChain::new(v2, None, 50, store)
            .walk()
            .map(|l| l.unwrap())
            .collect();
        let versions: Vec<_> = links.iter().map(|l| l.version).collect();
        assert_eq!(versions, vec![v2, v1, genesis]);
        assert!(links[2].statement.is_none());
        assert_eq!(links[0].statement.as_ref().unwrap().prev, Some(v1));
    }

    #[test]
    fn test_max_depth_bounds_walk() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let mut builder = ChainBuilder::new(store.clone());
        let mut head = builder.state();
        for n in 0..5 {
            head = builder.step(&n.to_string());
        }
        assert_eq!(VersionChain::new(head, None, 3, store).walk().count(), 3);
    }

    #[test]
    fn test_limit() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let mut builder = ChainBuilder::new(store.clone());
        let v1 = builder.step("a");
        let v2 = builder.step("b");
        let v3 = builder.step("c");

        let mut chain = VersionChain::new(v3, None, 50, store.clone());
        chain.limit(v1, false);
        assert_eq!(chain.length().unwrap(), 2);
        let statements = chain.statements().unwrap();
        assert_eq!(statements[0].0, v2);
        assert_eq!(statements[1].0, v3);

        chain.limit(v1, true);
        assert_eq!(chain.length().unwrap(), 3);

        chain.limit(v3, false);
        assert_eq!(chain.length().unwrap(), 0);
        assert_eq!(chain.base(), Some(v3));
    }

    #[test]
    fn test_boundary_not_reached() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let mut builder = ChainBuilder::new(store.clone());
        let v1 = builder.step("a");
        let unrelated = ChunkId::digest(b"elsewhere");

        let mut chain = VersionChain::new(v1, None, 50, store);
        chain.limit(unrelated, false);
        assert!(matches!(
            chain.length(),
            Err(VersionError::BoundaryNotReached { .. })
        ));
    }

    #[test]
    fn test_find_common_version() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let mut a = ChainBuilder::new(store.clone());
        let shared = a.step("base");
        a.step("a1");
        let a_head = a.step("a2");

        let mut b = ChainBuilder::new(store.clone());
        b.collection.set_state(&shared).unwrap();
        let b_head = b.step("b1");

        let chain_a = VersionChain::new(a_head, None, 50, store.clone());
        let chain_b = VersionChain::new(b_head, Some(HostId::new("b")), 50, store.clone());
        assert_eq!(VersionChain::find_common_version(&chain_a, &chain_b).unwrap(), shared);
        assert_eq!(VersionChain::find_common_version(&chain_b, &chain_a).unwrap(), shared);

        // A chain is its own common version with any prefix
        let chain_shared = VersionChain::new(shared, None, 50, store);
        assert_eq!(
            VersionChain::find_common_version(&chain_a, &chain_shared).unwrap(),
            shared
        );
    }

    #[test]
    fn test_no_common_version() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let mut a = ChainBuilder::new(store.clone());
        let a_head = a.step("a");

        let mut b = ChainBuilder::new(store.clone());
        b.collection
            .create_element("seed", &ElementDescriptor::object(json!(1)))
            .unwrap();
        let b_head = b.step("b");

        let chain_a = VersionChain::new(a_head, None, 50, store.clone());
        let chain_b = VersionChain::new(b_head, None, 50, store);
        assert!(matches!(
            VersionChain::find_common_version(&chain_a, &chain_b),
            Err(VersionError::NoCommonVersion { depth: 50 })
        ));
    }
}
