//! ChunkTree: a persistent copy-on-write B-tree over content-addressed chunks.
//!
//! Features:
//! - Every container is an immutable chunk (bincode encoded)
//! - Mutations rewrite only the root-to-leaf path and yield a new root
//! - Previously issued roots stay valid and keep their content
//! - Trees owned by another host are read-only

use std::sync::Arc;

use crate::branch::TreeBranch;
use crate::chunk::{Chunk, ChunkId, HostId};
use crate::container::{Follow, TreeContainer};
use crate::cursor::TreeCursor;
use crate::error::{TreeError, TreeResult};
use crate::store::ChunkStore;

pub const DEFAULT_DEGREE: usize = 5;

/// Minimum element count of a non-root container.
///
/// `(degree - 1) / 2` keeps a merge of two minimal siblings plus their
/// separator within `degree - 1` for every degree.
pub fn min_elements(degree: usize) -> usize {
    (degree - 1) / 2
}

pub struct ChunkTree {
    degree: usize,
    root: Option<Chunk>,
    owner: Option<HostId>,
    store: Arc<dyn ChunkStore>,
}

impl ChunkTree {
    /// Create an empty local tree.
    pub fn new(degree: usize, store: Arc<dyn ChunkStore>) -> TreeResult<Self> {
        Self::open(degree, None, None, store)
    }

    /// Open a tree at `root`. `owner` is `None` for a local tree.
    pub fn open(
        degree: usize,
        root: Option<ChunkId>,
        owner: Option<HostId>,
        store: Arc<dyn ChunkStore>,
    ) -> TreeResult<Self> {
        if degree < 3 {
            return Err(TreeError::InvalidDegree(degree));
        }
        Ok(ChunkTree {
            degree,
            root: root.map(|id| Chunk::from_identifier(id, owner.clone())),
            owner,
            store,
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn root_id(&self) -> Option<ChunkId> {
        self.root.as_ref().map(|chunk| chunk.id)
    }

    pub fn owner(&self) -> Option<&HostId> {
        self.owner.as_ref()
    }

    pub fn is_remote(&self) -> bool {
        self.owner.is_some()
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// True iff the tree has no root or its root holds no elements.
    pub fn is_empty(&self) -> TreeResult<bool> {
        match self.root_id() {
            None => Ok(true),
            Some(id) => Ok(TreeContainer::load(self.store.as_ref(), &id)?.num_elements() == 0),
        }
    }

    pub fn has(&self, key: &ChunkId) -> TreeResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &ChunkId) -> TreeResult<Option<Chunk>> {
        let mut next = match self.root_id() {
            Some(id) => id,
            None => return Ok(None),
        };
        loop {
            let container = TreeContainer::load(self.store.as_ref(), &next)?;
            match container.follow(key) {
                Follow::Found(index) => {
                    return Ok(Some(Chunk::from_identifier(
                        container.values[index],
                        self.owner.clone(),
                    )))
                }
                Follow::Descend(child) => next = child,
                Follow::Missing => return Ok(None),
            }
        }
    }

    /// Insert or replace the value stored under `key`.
    pub fn set(&mut self, key: ChunkId, value: ChunkId) -> TreeResult<()> {
        if self.is_remote() {
            return Err(TreeError::RemoteTree);
        }
        let root = match self.root_id() {
            Some(root) => root,
            None => {
                let mut leaf = TreeContainer::new_leaf();
                leaf.insert_element(0, key, value);
                let id = leaf.store(self.store.as_ref())?;
                self.root = Some(Chunk::from_identifier(id, None));
                return Ok(());
            }
        };

        let mut branch = TreeBranch::new(self.store.clone(), &root, None)?;
        match branch.get_to_key(&key)? {
            Some(index) => {
                branch.last_container_mut().values[index] = value;
            }
            None => {
                let leaf = branch.last_container_mut();
                let slot = leaf.search(&key).unwrap_or_else(|slot| slot);
                leaf.insert_element(slot, key, value);
                branch.split_overflow(self.degree)?;
            }
        }
        let new_root = branch.update()?;
        self.root = Some(Chunk::from_identifier(new_root, None));
        Ok(())
    }

    /// Remove `key` and its value.
    pub fn delete(&mut self, key: &ChunkId) -> TreeResult<()> {
        if self.is_remote() {
            return Err(TreeError::RemoteTree);
        }
        let root = self.root_id().ok_or(TreeError::EmptyTree)?;
        if self.is_empty()? {
            return Err(TreeError::EmptyTree);
        }
        let min = min_elements(self.degree);

        let mut branch = TreeBranch::new(self.store.clone(), &root, None)?;
        let index = branch
            .get_to_key(key)?
            .ok_or(TreeError::KeyNotFound(*key))?;

        if branch.last_container().is_leaf {
            branch.last_container_mut().remove_at(index);
            if branch.depth() > 0 && branch.last_container().num_elements() < min {
                branch.rebalance(min)?;
            }
        } else {
            let (left_id, right_id) = branch
                .last_container()
                .get_children_around_key(key)
                .ok_or_else(|| TreeError::Corrupt("Internal element without children".into()))?;

            let mut left = TreeBranch::new(self.store.clone(), &left_id, None)?;
            left.get_to_rightmost_leaf()?;
            let mut right = TreeBranch::new(self.store.clone(), &right_id, None)?;
            right.get_to_leftmost_leaf()?;

            let (donor, donor_slot, element) =
                if left.last_container().num_elements() >= right.last_container().num_elements() {
                    let element = left.last_container_mut().pop();
                    (left, index, element)
                } else {
                    let element = right.last_container_mut().shift();
                    (right, index + 1, element)
                };
            let element = element.ok_or_else(|| TreeError::Corrupt("Empty donor leaf".into()))?;

            let owner = branch.last_container_mut();
            owner.keys[index] = element.0;
            owner.values[index] = element.1;
            branch.append(donor_slot, donor);

            if branch.last_container().num_elements() < min {
                branch.rebalance(min)?;
            }
        }

        let new_root = branch.update()?;
        self.root = Some(Chunk::from_identifier(new_root, None));
        Ok(())
    }

    /// Iterate over all (key, value) elements in key order.
    pub fn entries(&self) -> TreeCursor<'_> {
        TreeCursor::new(self.store.as_ref(), self.root_id())
    }

    /// Check the structural invariants of the whole tree.
    pub fn validate(&self) -> TreeResult<()> {
        if let Some(root) = self.root_id() {
            let container = TreeContainer::load(self.store.as_ref(), &root)?;
            container.validate(
                self.store.as_ref(),
                self.degree,
                min_elements(self.degree),
                true,
            )?;
        }
        Ok(())
    }

    /// Height of the tree; 0 for a tree without root.
    pub fn depth(&self) -> TreeResult<usize> {
        let mut next = match self.root_id() {
            Some(id) => id,
            None => return Ok(0),
        };
        let mut depth = 1;
        loop {
            let container = TreeContainer::load(self.store.as_ref(), &next)?;
            match container.children.first() {
                Some(child) if !container.is_leaf => {
                    next = *child;
                    depth += 1;
                }
                _ => return Ok(depth),
            }
        }
    }
}
