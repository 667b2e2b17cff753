//! Garbage collection for chunk stores.
//!
//! Identifies unreachable chunks by traversing from a set of collection
//! states and comparing with all stored chunks. A state keeps alive its tree
//! containers, every key and value chunk, and through its version statement
//! the change list and the earlier states the statement links to.

use std::collections::HashSet;

use crate::chunk::{Chunk, ChunkId};
use crate::container::TreeContainer;
use crate::element::ElementDescriptor;
use crate::error::{StoreError, StoreResult};
use crate::map::MapDescriptor;
use crate::statement::{StatementBody, VersionStatement, VERSION_ELEMENT};
use crate::store::ChunkStore;

/// Statistics from a garbage collection operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcStats {
    pub total_chunks: usize,
    pub reachable_chunks: usize,
    pub garbage_chunks: usize,
}

impl GcStats {
    /// Percentage of chunks that are reachable
    pub fn reachable_percent(&self) -> f64 {
        if self.total_chunks == 0 {
            0.0
        } else {
            (self.reachable_chunks as f64 / self.total_chunks as f64) * 100.0
        }
    }

    /// Percentage of chunks that are garbage
    pub fn garbage_percent(&self) -> f64 {
        if self.total_chunks == 0 {
            0.0
        } else {
            (self.garbage_chunks as f64 / self.total_chunks as f64) * 100.0
        }
    }
}

/// Find all chunks reachable from a set of collection states.
///
/// Chunks referenced but not present in the store are skipped.
pub fn find_reachable_chunks(store: &dyn ChunkStore, states: &HashSet<ChunkId>) -> StoreResult<HashSet<ChunkId>> {
    let version_key = ChunkId::of_object(&serde_json::json!({ "name": VERSION_ELEMENT }))?;
    let mut reachable: HashSet<ChunkId> = HashSet::new();
    let mut states_to_visit: Vec<ChunkId> = states.iter().copied().collect();

    while let Some(state) = states_to_visit.pop() {
        if reachable.contains(&state) || !store.has_chunk(&state)? {
            continue;
        }
        reachable.insert(state);
        let descriptor = MapDescriptor::load(store, &state)?;

        let mut containers: Vec<ChunkId> = descriptor.root.into_iter().collect();
        while let Some(container_id) = containers.pop() {
            if reachable.contains(&container_id) || !store.has_chunk(&container_id)? {
                continue;
            }
            reachable.insert(container_id);
            let container = TreeContainer::load(store, &container_id)?;

            for (key, value) in container.keys.iter().zip(&container.values) {
                for id in [key, value] {
                    if store.has_chunk(id)? {
                        reachable.insert(*id);
                    }
                }
                if *key == version_key && store.has_chunk(value)? {
                    follow_statement(store, value, &mut reachable, &mut states_to_visit)?;
                }
            }
            if !container.is_leaf {
                containers.extend(container.children.iter().filter(|c| !reachable.contains(c)));
            }
        }
    }

    Ok(reachable)
}

fn follow_statement(
    store: &dyn ChunkStore,
    element: &ChunkId,
    reachable: &mut HashSet<ChunkId>,
    states_to_visit: &mut Vec<ChunkId>,
) -> StoreResult<()> {
    let element: ElementDescriptor = Chunk::from_identifier(*element, None).expand(store)?;
    let statement: VersionStatement = serde_json::from_value(element.data)?;
    states_to_visit.extend(statement.prev);

    if store.has_chunk(&statement.changes)? {
        reachable.insert(statement.changes);
        let body: StatementBody = Chunk::from_identifier(statement.changes, None).expand(store)?;
        if let StatementBody::Merge { head, .. } = body {
            states_to_visit.push(head);
        }
    }
    Ok(())
}

/// Find all garbage (unreachable) chunks in the store.
pub fn find_garbage_chunks(store: &dyn ChunkStore, states: &HashSet<ChunkId>) -> StoreResult<HashSet<ChunkId>> {
    let reachable = find_reachable_chunks(store, states)?;
    let all_chunks: HashSet<ChunkId> = store.list_chunks()?.into_iter().collect();
    Ok(all_chunks.difference(&reachable).copied().collect())
}

/// Compute garbage collection statistics without removing anything.
pub fn collect_garbage_stats(store: &dyn ChunkStore, states: &HashSet<ChunkId>) -> StoreResult<GcStats> {
    let reachable = find_reachable_chunks(store, states)?;
    let all_chunks: HashSet<ChunkId> = store.list_chunks()?.into_iter().collect();

    Ok(GcStats {
        total_chunks: all_chunks.len(),
        reachable_chunks: reachable.len(),
        garbage_chunks: all_chunks.len() - reachable.len(),
    })
}

/// Remove chunks from the store; returns how many were actually removed.
///
/// This is destructive: only pass identifiers that are known to be garbage.
pub fn remove_garbage(store: &dyn ChunkStore, garbage: &HashSet<ChunkId>) -> StoreResult<usize> {
    let mut removed_count = 0;
    for id in garbage {
        if store.delete_chunk(id)? {
            removed_count += 1;
        }
    }
    Ok(removed_count)
}

/// Perform garbage collection on a store.
///
/// # Arguments
///
/// * `store` - Storage backend to garbage collect
/// * `states` - Collection states to keep (everything else is garbage)
/// * `dry_run` - If true, only compute statistics without removing chunks
pub fn garbage_collect(store: &dyn ChunkStore, states: &HashSet<ChunkId>, dry_run: bool) -> StoreResult<GcStats> {
    let stats = collect_garbage_stats(store, states)?;

    if !dry_run {
        let garbage = find_garbage_chunks(store, states)?;
        let removed_count = remove_garbage(store, &garbage)?;
        if removed_count != stats.garbage_chunks {
            return Err(StoreError::Other(format!(
                "Expected to remove {} chunks, but actually removed {}",
                stats.garbage_chunks, removed_count
            )));
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VersioningConfig;
    use crate::element::TypeRegistry;
    use crate::identity::LocalHost;
    use crate::notify::MemoryUpdateHub;
    use crate::nvd::MemoryNvd;
    use crate::versioned::{Environment, VersionedCollection};
    use crate::{ChunkTree, MemoryChunkStore};
    use serde_json::json;
    use std::sync::Arc;

    fn environment(store: Arc<dyn ChunkStore>) -> Environment {
        Environment {
            store,
            nvd: Arc::new(MemoryNvd::new()),
            host: Arc::new(LocalHost::generate()),
            notifier: Arc::new(MemoryUpdateHub::new()),
            registry: Arc::new(TypeRegistry::new()),
        }
    }

    #[test]
    fn test_find_reachable_empty() {
        let store = MemoryChunkStore::new();
        let reachable = find_reachable_chunks(&store, &HashSet::new()).unwrap();
        assert!(reachable.is_empty());
    }

    #[test]
    fn test_gc_keeps_version_history() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let env = environment(store.clone());
        let collection =
            VersionedCollection::new("5e4d3c2b-1a0f-4e9d-8c7b-6a5f4e3d2c1b", &env, &VersioningConfig::default())
                .unwrap();
        collection.init().unwrap();

        let genesis = collection.current_version().unwrap();
        let v1 = collection
            .commit([collection.create_element("x", ElementDescriptor::object(json!(1)))])
            .unwrap();
        let head = collection
            .commit([collection.create_element("y", ElementDescriptor::object(json!(2)))])
            .unwrap();

        let states: HashSet<ChunkId> = [head].into_iter().collect();
        let reachable = find_reachable_chunks(store.as_ref(), &states).unwrap();
        assert!(reachable.contains(&v1));
        assert!(reachable.contains(&genesis));

        // Intermediate states written between changes are garbage
        let stats = garbage_collect(store.as_ref(), &states, false).unwrap();
        assert!(stats.garbage_chunks > 0);
        assert_eq!(store.count_chunks().unwrap(), stats.reachable_chunks);

        // History is still walkable after the collection
        collection.checkout(&v1).unwrap();
        assert!(collection.has_element("x").unwrap());
        assert!(!collection.has_element("y").unwrap());
    }

    #[test]
    fn test_gc_dry_run() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let mut tree = ChunkTree::new(5, store.clone()).unwrap();
        for n in 0..20u8 {
            tree.set(ChunkId::digest(&[n]), ChunkId::digest(&[n])).unwrap();
        }
        let state = MapDescriptor {
            degree: 5,
            root: tree.root_id(),
        }
        .store(store.as_ref())
        .unwrap();

        let initial_count = store.count_chunks().unwrap();
        let states: HashSet<ChunkId> = [state].into_iter().collect();
        let stats = garbage_collect(store.as_ref(), &states, true).unwrap();

        assert_eq!(store.count_chunks().unwrap(), initial_count);
        assert!(stats.garbage_chunks > 0);
        assert_eq!(stats.total_chunks, stats.reachable_chunks + stats.garbage_chunks);
        assert!(stats.reachable_percent() + stats.garbage_percent() > 99.9);
    }
}
