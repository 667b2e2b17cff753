//! Tree container implementation for ChunkTree.
//!
//! A TreeContainer is one B-tree node, leaf or internal, stored as a chunk.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chunk::ChunkId;
use crate::error::{StoreError, StoreResult, TreeError, TreeResult};
use crate::store::ChunkStore;

/// One B-tree node.
///
/// ## Element Layout
///
/// Elements are `(keys[i], values[i])` pairs sorted by key. Unlike a
/// separator tree, internal containers hold real elements, so a key lives in
/// exactly one container of the tree.
///
/// **Key Invariant**: For an internal container with n elements there are
/// n+1 children, and:
/// - `children[0]` holds keys k < keys[0]
/// - `children[i]` holds keys keys[i-1] < k < keys[i]
/// - `children[n]` holds keys k > keys[n-1]
///
/// **Example**: Internal container with keys=[30] and 2 children:
/// ```text
/// children[0]: [10, 20]
/// children[1]: [40, 50]
/// ```
///
/// ## Leaf Containers
///
/// For leaf containers `children` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeContainer {
    pub is_leaf: bool,
    /// Element keys, strictly increasing
    pub keys: Vec<ChunkId>,
    /// Element values, parallel to `keys`
    pub values: Vec<ChunkId>,
    /// Child container identifiers (internal containers only)
    pub children: Vec<ChunkId>,
}

/// Outcome of looking a key up in a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Follow {
    /// The key is an element of this container, at this index
    Found(usize),
    /// The key can only be in this child
    Descend(ChunkId),
    /// The key is not in the tree
    Missing,
}

pub type Element = (ChunkId, ChunkId);

impl TreeContainer {
    /// Create a new leaf container
    pub fn new_leaf() -> Self {
        TreeContainer {
            is_leaf: true,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create a new internal container
    pub fn new_internal() -> Self {
        TreeContainer {
            is_leaf: false,
            ..Self::new_leaf()
        }
    }

    pub fn num_elements(&self) -> usize {
        self.keys.len()
    }

    /// Encode and store this container; returns its chunk identifier.
    pub fn store(&self, store: &dyn ChunkStore) -> StoreResult<ChunkId> {
        let encoded = bincode::serialize(self)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        store.put_chunk(encoded)
    }

    /// Load and decode a container.
    pub fn load(store: &dyn ChunkStore, id: &ChunkId) -> StoreResult<Self> {
        let data = store
            .get_chunk(id)?
            .ok_or_else(|| StoreError::NotFound(format!("tree container {}", id)))?;
        Ok(bincode::deserialize(&data)?)
    }

    /// Binary search for `key`: `Ok(index)` if present, `Err(insert_at)` otherwise.
    pub fn search(&self, key: &ChunkId) -> Result<usize, usize> {
        self.keys.binary_search(key)
    }

    /// Decide where `key` would be found starting from this container.
    pub fn follow(&self, key: &ChunkId) -> Follow {
        match self.search(key) {
            Ok(index) => Follow::Found(index),
            Err(_) if self.is_leaf => Follow::Missing,
            Err(slot) => match self.children.get(slot) {
                Some(child) => Follow::Descend(*child),
                None => Follow::Missing,
            },
        }
    }

    /// The two children adjacent to an element key of an internal container.
    pub fn get_children_around_key(&self, key: &ChunkId) -> Option<(ChunkId, ChunkId)> {
        if self.is_leaf {
            return None;
        }
        let index = self.search(key).ok()?;
        Some((*self.children.get(index)?, *self.children.get(index + 1)?))
    }

    /// Insert an element at `index`.
    pub fn insert_element(&mut self, index: usize, key: ChunkId, value: ChunkId) {
        self.keys.insert(index, key);
        self.values.insert(index, value);
    }

    /// Remove an element by key, returning it if it was present.
    pub fn remove(&mut self, key: &ChunkId) -> Option<Element> {
        let index = self.search(key).ok()?;
        Some(self.remove_at(index))
    }

    pub fn remove_at(&mut self, index: usize) -> Element {
        (self.keys.remove(index), self.values.remove(index))
    }

    /// Remove and return the last element.
    pub fn pop(&mut self) -> Option<Element> {
        Some((self.keys.pop()?, self.values.pop()?))
    }

    /// Remove and return the first element.
    pub fn shift(&mut self) -> Option<Element> {
        if self.keys.is_empty() {
            return None;
        }
        Some(self.remove_at(0))
    }

    /// Replace the element `old_key` in place. Returns false if absent.
    pub fn substitute_element(&mut self, old_key: &ChunkId, element: Element) -> bool {
        match self.search(old_key) {
            Ok(index) => {
                self.keys[index] = element.0;
                self.values[index] = element.1;
                true
            }
            Err(_) => false,
        }
    }

    /// Split around the median element: `(left, median, right)`.
    ///
    /// Only called on overflowing containers, which hold at least two elements.
    pub fn split(mut self) -> (TreeContainer, Element, TreeContainer) {
        let mid = self.keys.len() / 2;
        let right_keys = self.keys.split_off(mid + 1);
        let right_values = self.values.split_off(mid + 1);
        let right_children = if self.is_leaf {
            Vec::new()
        } else {
            self.children.split_off(mid + 1)
        };
        let median = self.remove_at(mid);
        let right = TreeContainer {
            is_leaf: self.is_leaf,
            keys: right_keys,
            values: right_values,
            children: right_children,
        };
        (self, median, right)
    }

    /// Validate this container and its entire subtree.
    ///
    /// Checks child counts, key order across the subtree, uniform leaf depth
    /// and, for every container except the root, the occupancy bounds.
    ///
    /// # Arguments
    ///
    /// * `store` - Store to retrieve child containers
    /// * `degree` - Tree degree the bounds derive from
    /// * `min_elements` - Lower occupancy bound for non-root containers
    /// * `is_root` - Whether this container is the tree root
    ///
    /// # Returns
    ///
    /// Height of the subtree (1 for a leaf)
    pub fn validate(
        &self,
        store: &dyn ChunkStore,
        degree: usize,
        min_elements: usize,
        is_root: bool,
    ) -> TreeResult<usize> {
        let mut keys = Vec::new();
        let height = self.validate_into(store, degree, min_elements, is_root, &mut keys)?;

        for (i, pair) in keys.windows(2).enumerate() {
            if pair[0] >= pair[1] {
                return Err(TreeError::Corrupt(format!(
                    "Keys out of order at position {}: {} >= {}",
                    i + 1,
                    pair[0].short(),
                    pair[1].short()
                )));
            }
        }
        Ok(height)
    }

    fn validate_into(
        &self,
        store: &dyn ChunkStore,
        degree: usize,
        min_elements: usize,
        is_root: bool,
        keys: &mut Vec<ChunkId>,
    ) -> TreeResult<usize> {
        if self.keys.len() != self.values.len() {
            return Err(TreeError::Corrupt(format!(
                "Container has {} keys but {} values",
                self.keys.len(),
                self.values.len()
            )));
        }
        if self.keys.len() > degree - 1 {
            return Err(TreeError::Corrupt(format!(
                "Container has {} elements, maximum is {}",
                self.keys.len(),
                degree - 1
            )));
        }
        if !is_root && self.keys.len() < min_elements {
            return Err(TreeError::Corrupt(format!(
                "Non-root container has {} elements, minimum is {}",
                self.keys.len(),
                min_elements
            )));
        }

        if self.is_leaf {
            if !self.children.is_empty() {
                return Err(TreeError::Corrupt("Leaf container has children".into()));
            }
            keys.extend(self.keys.iter().copied());
            return Ok(1);
        }

        if self.children.len() != self.keys.len() + 1 {
            return Err(TreeError::Corrupt(format!(
                "Internal container has {} keys but {} children (should be keys+1)",
                self.keys.len(),
                self.children.len()
            )));
        }

        let mut height = None;
        for (i, child_id) in self.children.iter().enumerate() {
            let child = TreeContainer::load(store, child_id)?;
            let child_height = child.validate_into(store, degree, min_elements, false, keys)?;
            match height {
                None => height = Some(child_height),
                Some(h) if h != child_height => {
                    return Err(TreeError::Corrupt(format!(
                        "Leaves at different depths under child {}",
                        i
                    )));
                }
                Some(_) => {}
            }
            if let Some(key) = self.keys.get(i) {
                keys.push(*key);
            }
        }
        Ok(height.unwrap_or(0) + 1)
    }
}

impl fmt::Display for TreeContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_leaf {
            write!(f, "Leaf({} elements)", self.keys.len())
        } else {
            write!(
                f,
                "Internal(elements={}, children={})",
                self.keys.len(),
                self.children.len()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryChunkStore;

    fn key(n: u8) -> ChunkId {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        ChunkId::from_bytes(bytes)
    }

    fn leaf(keys: &[u8]) -> TreeContainer {
        let mut container = TreeContainer::new_leaf();
        for &k in keys {
            container.keys.push(key(k));
            container.values.push(key(k + 100));
        }
        container
    }

    #[test]
    fn test_new_leaf() {
        let container = TreeContainer::new_leaf();
        assert!(container.is_leaf);
        assert_eq!(container.num_elements(), 0);
        assert!(container.children.is_empty());
    }

    #[test]
    fn test_new_internal() {
        let container = TreeContainer::new_internal();
        assert!(!container.is_leaf);
        assert_eq!(container.num_elements(), 0);
    }

    #[test]
    fn test_follow() {
        let mut internal = TreeContainer::new_internal();
        internal.keys.push(key(30));
        internal.values.push(key(130));
        internal.children = vec![key(1), key(2)];

        assert_eq!(internal.follow(&key(30)), Follow::Found(0));
        assert_eq!(internal.follow(&key(10)), Follow::Descend(key(1)));
        assert_eq!(internal.follow(&key(40)), Follow::Descend(key(2)));
        assert_eq!(leaf(&[10, 20]).follow(&key(15)), Follow::Missing);
    }

    #[test]
    fn test_children_around_key() {
        let mut internal = TreeContainer::new_internal();
        internal.keys = vec![key(10), key(20)];
        internal.values = vec![key(110), key(120)];
        internal.children = vec![key(1), key(2), key(3)];

        assert_eq!(
            internal.get_children_around_key(&key(20)),
            Some((key(2), key(3)))
        );
        assert_eq!(internal.get_children_around_key(&key(15)), None);
    }

    #[test]
    fn test_pop_shift_substitute() {
        let mut container = leaf(&[10, 20, 30]);
        assert_eq!(container.pop(), Some((key(30), key(130))));
        assert_eq!(container.shift(), Some((key(10), key(110))));
        assert!(container.substitute_element(&key(20), (key(25), key(125))));
        assert_eq!(container.keys, vec![key(25)]);
        assert!(!container.substitute_element(&key(20), (key(1), key(1))));
    }

    #[test]
    fn test_split_leaf() {
        let (left, median, right) = leaf(&[10, 20, 30, 40, 50]).split();
        assert_eq!(left.keys, vec![key(10), key(20)]);
        assert_eq!(median, (key(30), key(130)));
        assert_eq!(right.keys, vec![key(40), key(50)]);
        assert!(left.is_leaf && right.is_leaf);
    }

    #[test]
    fn test_store_load() {
        let store = MemoryChunkStore::new();
        let container = leaf(&[1, 2]);
        let id = container.store(&store).unwrap();
        assert_eq!(TreeContainer::load(&store, &id).unwrap(), container);
        // Same content, same chunk
        assert_eq!(container.store(&store).unwrap(), id);
    }

    #[test]
    fn test_validate_leaf_ordering() {
        let store = MemoryChunkStore::new();
        let mut container = leaf(&[20]);
        container.keys.push(key(10));
        container.values.push(key(110));

        let result = container.validate(&store, 5, 2, true);
        assert!(matches!(result, Err(TreeError::Corrupt(msg)) if msg.contains("out of order")));
    }

    #[test]
    fn test_validate_internal_mismatch() {
        let store = MemoryChunkStore::new();
        let mut internal = TreeContainer::new_internal();
        internal.keys.push(key(1));
        internal.values.push(key(2));
        internal.children.push(key(3));

        let result = internal.validate(&store, 5, 2, true);
        assert!(matches!(result, Err(TreeError::Corrupt(msg)) if msg.contains("should be keys+1")));
    }

    #[test]
    fn test_validate_underflow() {
        let store = MemoryChunkStore::new();
        let left = leaf(&[10]).store(&store).unwrap();
        let right = leaf(&[40, 50]).store(&store).unwrap();
        let mut internal = TreeContainer::new_internal();
        internal.insert_element(0, key(30), key(130));
        internal.children = vec![left, right];

        let result = internal.validate(&store, 5, 2, true);
        assert!(matches!(result, Err(TreeError::Corrupt(msg)) if msg.contains("minimum")));
    }

    #[test]
    fn test_validate_valid_tree() {
        let store = MemoryChunkStore::new();
        let left = leaf(&[10, 20]).store(&store).unwrap();
        let right = leaf(&[40, 50]).store(&store).unwrap();
        let mut internal = TreeContainer::new_internal();
        internal.insert_element(0, key(30), key(130));
        internal.children = vec![left, right];

        assert_eq!(internal.validate(&store, 5, 2, true).unwrap(), 2);
    }
}
