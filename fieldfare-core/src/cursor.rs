//! TreeCursor for traversing ChunkTree structures.
//!
//! Yields the (key, value) elements of a tree in sorted key order. Internal
//! containers carry elements too, so the cursor interleaves them between the
//! subtrees of their neighbouring children.

use std::sync::Arc;

use crate::chunk::ChunkId;
use crate::container::TreeContainer;
use crate::error::TreeResult;
use crate::store::ChunkStore;

/// In-order cursor over a ChunkTree.
pub struct TreeCursor<'a> {
    store: &'a dyn ChunkStore,
    /// Stack of (container, index) tuples representing the current position.
    /// For a leaf, index is the next element to yield. For an internal
    /// container, index is the child currently being visited; element `index`
    /// is yielded once that child is exhausted.
    stack: Vec<(Arc<TreeContainer>, usize)>,
    /// Load failure to report on the next call
    pending_error: Option<crate::error::TreeError>,
}

impl<'a> TreeCursor<'a> {
    /// Initialize the cursor at the first element of the tree rooted at `root`.
    pub fn new(store: &'a dyn ChunkStore, root: Option<ChunkId>) -> Self {
        let mut cursor = TreeCursor {
            store,
            stack: Vec::new(),
            pending_error: None,
        };
        if let Some(root) = root {
            if let Err(e) = cursor.descend_to_first(&root) {
                cursor.stack.clear();
                cursor.pending_error = Some(e);
            }
        }
        cursor
    }

    /// Descend to the leftmost leaf starting from `id`.
    fn descend_to_first(&mut self, id: &ChunkId) -> TreeResult<()> {
        let mut container = Arc::new(TreeContainer::load(self.store, id)?);
        while !container.is_leaf {
            let first_child = match container.children.first() {
                Some(child) => *child,
                None => break,
            };
            self.stack.push((container, 0));
            container = Arc::new(TreeContainer::load(self.store, &first_child)?);
        }
        self.stack.push((container, 0));
        Ok(())
    }

    fn advance(&mut self) -> TreeResult<Option<(ChunkId, ChunkId)>> {
        loop {
            let (container, idx) = match self.stack.last() {
                Some((c, i)) => (Arc::clone(c), *i),
                None => return Ok(None),
            };

            if idx >= container.keys.len() {
                // Leaf exhausted, or internal container after its last child
                self.stack.pop();
                continue;
            }

            let element = (container.keys[idx], container.values[idx]);
            let top = self.stack.len() - 1;
            self.stack[top].1 = idx + 1;

            if !container.is_leaf {
                if let Some(next_child) = container.children.get(idx + 1) {
                    self.descend_to_first(next_child)?;
                }
            }
            return Ok(Some(element));
        }
    }
}

impl<'a> Iterator for TreeCursor<'a> {
    type Item = TreeResult<(ChunkId, ChunkId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }
        match self.advance() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => None,
            Err(e) => {
                self.stack.clear();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreeError;
    use crate::MemoryChunkStore;

    fn key(n: u8) -> ChunkId {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        ChunkId::from_bytes(bytes)
    }

    fn leaf(keys: &[u8]) -> TreeContainer {
        let mut container = TreeContainer::new_leaf();
        for &k in keys {
            container.insert_element(container.num_elements(), key(k), key(k + 100));
        }
        container
    }

    fn collect_keys(cursor: TreeCursor<'_>) -> Vec<u8> {
        cursor
            .map(|entry| entry.unwrap().0.as_bytes()[31])
            .collect()
    }

    #[test]
    fn test_cursor_empty_tree() {
        let store = MemoryChunkStore::new();
        assert_eq!(TreeCursor::new(&store, None).count(), 0);

        let empty_root = TreeContainer::new_leaf().store(&store).unwrap();
        assert_eq!(TreeCursor::new(&store, Some(empty_root)).count(), 0);
    }

    #[test]
    fn test_cursor_single_leaf() {
        let store = MemoryChunkStore::new();
        let root = leaf(&[1, 2, 3]).store(&store).unwrap();

        let entries: Vec<_> = TreeCursor::new(&store, Some(root))
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(
            entries,
            vec![
                (key(1), key(101)),
                (key(2), key(102)),
                (key(3), key(103))
            ]
        );
    }

    #[test]
    fn test_cursor_interleaves_internal_elements() {
        let store = MemoryChunkStore::new();
        let children = vec![
            leaf(&[1, 2]).store(&store).unwrap(),
            leaf(&[4, 5]).store(&store).unwrap(),
            leaf(&[7, 8, 9]).store(&store).unwrap(),
        ];
        let mut root = TreeContainer::new_internal();
        root.insert_element(0, key(3), key(103));
        root.insert_element(1, key(6), key(106));
        root.children = children;
        let root_id = root.store(&store).unwrap();

        let keys = collect_keys(TreeCursor::new(&store, Some(root_id)));
        assert_eq!(keys, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_cursor_missing_child() {
        let store = MemoryChunkStore::new();
        let mut root = TreeContainer::new_internal();
        root.insert_element(0, key(3), key(103));
        root.children = vec![leaf(&[1]).store(&store).unwrap(), key(200)];
        let root_id = root.store(&store).unwrap();

        let results: Vec<_> = TreeCursor::new(&store, Some(root_id)).collect();
        assert!(results[0].is_ok());
        assert!(matches!(
            results.last(),
            Some(Err(TreeError::Store(_)))
        ));
    }
}
