//! ChunkMap: an ordered chunk → chunk mapping persisted as a ChunkTree.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::chunk::{Chunk, ChunkId, HostId};
use crate::cursor::TreeCursor;
use crate::error::{StoreResult, TreeResult};
use crate::store::ChunkStore;
use crate::tree::ChunkTree;

/// Persisted form of a ChunkMap. The identifier of its JSON chunk is the
/// state hash of whatever owns the map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDescriptor {
    pub degree: usize,
    pub root: Option<ChunkId>,
}

impl MapDescriptor {
    /// Store the descriptor; returns its state hash.
    pub fn store(&self, store: &dyn ChunkStore) -> StoreResult<ChunkId> {
        Ok(Chunk::from_object(store, self)?.id)
    }

    pub fn load(store: &dyn ChunkStore, state: &ChunkId) -> StoreResult<Self> {
        Chunk::from_identifier(*state, None).expand(store)
    }
}

pub struct ChunkMap {
    tree: ChunkTree,
}

impl ChunkMap {
    pub fn new(degree: usize, store: Arc<dyn ChunkStore>) -> TreeResult<Self> {
        Ok(ChunkMap {
            tree: ChunkTree::new(degree, store)?,
        })
    }

    pub fn from_descriptor(
        descriptor: &MapDescriptor,
        owner: Option<HostId>,
        store: Arc<dyn ChunkStore>,
    ) -> TreeResult<Self> {
        Ok(ChunkMap {
            tree: ChunkTree::open(descriptor.degree, descriptor.root, owner, store)?,
        })
    }

    pub fn descriptor(&self) -> MapDescriptor {
        MapDescriptor {
            degree: self.tree.degree(),
            root: self.tree.root_id(),
        }
    }

    pub fn tree(&self) -> &ChunkTree {
        &self.tree
    }

    pub fn has(&self, key: &ChunkId) -> TreeResult<bool> {
        self.tree.has(key)
    }

    pub fn get(&self, key: &ChunkId) -> TreeResult<Option<Chunk>> {
        self.tree.get(key)
    }

    pub fn set(&mut self, key: &Chunk, value: &Chunk) -> TreeResult<()> {
        self.tree.set(key.id, value.id)
    }

    pub fn delete(&mut self, key: &ChunkId) -> TreeResult<()> {
        self.tree.delete(key)
    }

    pub fn is_empty(&self) -> TreeResult<bool> {
        self.tree.is_empty()
    }

    pub fn entries(&self) -> TreeCursor<'_> {
        self.tree.entries()
    }
}
