//! Root-to-target traversal paths over tree containers.
//!
//! A [`TreeBranch`] holds decoded copies of every container on the path it
//! walked. Mutations edit those copies; [`TreeBranch::update`] writes the
//! path back bottom-up and returns the identifier of the new root. Containers
//! off the path are only ever referenced by identifier.

use std::sync::Arc;
use tracing::trace;

use crate::chunk::{ChunkId, HostId};
use crate::container::{Follow, TreeContainer};
use crate::error::{TreeError, TreeResult};
use crate::store::ChunkStore;

pub struct TreeBranch {
    /// Containers from the start of the path down to its end
    pub containers: Vec<TreeContainer>,
    /// `indices[d]` is the child slot of `containers[d]` leading to `containers[d + 1]`
    pub indices: Vec<usize>,
    pub owner: Option<HostId>,
    store: Arc<dyn ChunkStore>,
}

impl TreeBranch {
    /// Start a branch at the container `start`.
    pub fn new(store: Arc<dyn ChunkStore>, start: &ChunkId, owner: Option<HostId>) -> TreeResult<Self> {
        let container = TreeContainer::load(store.as_ref(), start)?;
        Ok(TreeBranch {
            containers: vec![container],
            indices: Vec::new(),
            owner,
            store,
        })
    }

    /// Number of edges on the path.
    pub fn depth(&self) -> usize {
        self.containers.len() - 1
    }

    pub fn last_container(&self) -> &TreeContainer {
        &self.containers[self.containers.len() - 1]
    }

    pub fn last_container_mut(&mut self) -> &mut TreeContainer {
        let last = self.containers.len() - 1;
        &mut self.containers[last]
    }

    fn descend(&mut self, slot: usize, child: &ChunkId) -> TreeResult<()> {
        let container = TreeContainer::load(self.store.as_ref(), child)?;
        self.indices.push(slot);
        self.containers.push(container);
        Ok(())
    }

    /// Extend the branch toward `key`.
    ///
    /// Returns the element index if the key was found in the last container.
    /// Otherwise the branch ends at the leaf where the key belongs.
    pub fn get_to_key(&mut self, key: &ChunkId) -> TreeResult<Option<usize>> {
        loop {
            let last = self.last_container();
            match last.follow(key) {
                Follow::Found(index) => return Ok(Some(index)),
                Follow::Missing => return Ok(None),
                Follow::Descend(child) => {
                    let slot = match last.search(key) {
                        Err(slot) => slot,
                        Ok(index) => index,
                    };
                    self.descend(slot, &child)?;
                }
            }
        }
    }

    pub fn get_to_rightmost_leaf(&mut self) -> TreeResult<()> {
        while !self.last_container().is_leaf {
            let last = self.last_container();
            let slot = last.children.len().checked_sub(1).ok_or_else(|| {
                TreeError::Corrupt("Internal container without children".into())
            })?;
            let child = last.children[slot];
            self.descend(slot, &child)?;
        }
        Ok(())
    }

    pub fn get_to_leftmost_leaf(&mut self) -> TreeResult<()> {
        while !self.last_container().is_leaf {
            let child = *self.last_container().children.first().ok_or_else(|| {
                TreeError::Corrupt("Internal container without children".into())
            })?;
            self.descend(0, &child)?;
        }
        Ok(())
    }

    /// Attach `other`, which starts at child `child_index` of this branch's last container.
    pub fn append(&mut self, child_index: usize, other: TreeBranch) {
        self.indices.push(child_index);
        self.containers.extend(other.containers);
        self.indices.extend(other.indices);
    }

    /// Split overflowing containers from the end of the branch upward.
    ///
    /// A container with more than `degree - 1` elements is split around its
    /// median; the median moves into the parent, or into a new root when the
    /// root itself overflows. The half holding the path's child stays on the
    /// branch and the other half is stored.
    pub fn split_overflow(&mut self, degree: usize) -> TreeResult<()> {
        let bottom = self.depth();
        let mut d = bottom;
        while self.containers[d].num_elements() > degree - 1 {
            let full = std::mem::replace(&mut self.containers[d], TreeContainer::new_leaf());
            let mid = full.num_elements() / 2;
            let (left, median, right) = full.split();
            let keep_right = d < bottom && self.indices[d] > mid;
            let (kept, stored) = if keep_right {
                self.indices[d] -= mid + 1;
                (right, left)
            } else {
                (left, right)
            };
            let stored_id = stored.store(self.store.as_ref())?;
            trace!(depth = d, median = %median.0.short(), keep_right, "split container");

            if d == 0 {
                let mut root = TreeContainer::new_internal();
                root.insert_element(0, median.0, median.1);
                // The kept half's slot is rewritten by update()
                root.children = vec![stored_id, stored_id];
                self.containers[0] = kept;
                self.containers.insert(0, root);
                self.indices.insert(0, usize::from(keep_right));
                break;
            }

            let slot = self.indices[d - 1];
            let parent = &mut self.containers[d - 1];
            parent.insert_element(slot, median.0, median.1);
            if keep_right {
                parent.children.insert(slot, stored_id);
                self.indices[d - 1] = slot + 1;
            } else {
                parent.children.insert(slot + 1, stored_id);
            }
            self.containers[d] = kept;
            d -= 1;
        }
        Ok(())
    }

    /// Restore the occupancy bound from the end of the branch upward.
    ///
    /// Containers on the path stay on the path: when a borrow or merge puts
    /// children in front of the path's child, its slot moves with it.
    pub fn rebalance(&mut self, min_elements: usize) -> TreeResult<()> {
        let bottom = self.depth();
        let mut d = bottom;
        while d > 0 && self.containers[d].num_elements() < min_elements {
            let p = d - 1;
            let slot = self.indices[p];
            let on_path = d < bottom;
            let (upper, lower) = self.containers.split_at_mut(d);
            let parent = &mut upper[p];
            let node = &mut lower[0];

            let left = match slot.checked_sub(1) {
                Some(left_slot) => Some(TreeContainer::load(
                    self.store.as_ref(),
                    &parent.children[left_slot],
                )?),
                None => None,
            };

            if let Some(mut left) = left.filter(|c| c.num_elements() > min_elements) {
                let (key, value) = left
                    .pop()
                    .ok_or_else(|| TreeError::Corrupt("Empty left sibling".into()))?;
                let separator = (parent.keys[slot - 1], parent.values[slot - 1]);
                parent.keys[slot - 1] = key;
                parent.values[slot - 1] = value;
                node.insert_element(0, separator.0, separator.1);
                if !node.is_leaf {
                    let child = left
                        .children
                        .pop()
                        .ok_or_else(|| TreeError::Corrupt("Left sibling without children".into()))?;
                    node.children.insert(0, child);
                    if on_path {
                        self.indices[d] += 1;
                    }
                }
                parent.children[slot - 1] = left.store(self.store.as_ref())?;
                trace!(depth = d, "borrowed from left sibling");
                return Ok(());
            }

            let right = match parent.children.get(slot + 1) {
                Some(id) => Some(TreeContainer::load(self.store.as_ref(), id)?),
                None => None,
            };

            if let Some(mut right) = right.as_ref().filter(|c| c.num_elements() > min_elements).cloned() {
                let (key, value) = right
                    .shift()
                    .ok_or_else(|| TreeError::Corrupt("Empty right sibling".into()))?;
                let separator = (parent.keys[slot], parent.values[slot]);
                parent.keys[slot] = key;
                parent.values[slot] = value;
                node.insert_element(node.num_elements(), separator.0, separator.1);
                if !node.is_leaf && !right.children.is_empty() {
                    node.children.push(right.children.remove(0));
                }
                parent.children[slot + 1] = right.store(self.store.as_ref())?;
                trace!(depth = d, "borrowed from right sibling");
                return Ok(());
            }

            if slot > 0 {
                // Merge into the left sibling, which takes over this slot
                let mut merged = TreeContainer::load(self.store.as_ref(), &parent.children[slot - 1])?;
                let separator = parent.remove_at(slot - 1);
                parent.children.remove(slot);
                if on_path {
                    self.indices[d] += merged.children.len();
                }
                merged.insert_element(merged.num_elements(), separator.0, separator.1);
                merged.keys.append(&mut node.keys);
                merged.values.append(&mut node.values);
                merged.children.append(&mut node.children);
                *node = merged;
                self.indices[p] = slot - 1;
            } else {
                let mut right = right.ok_or_else(|| {
                    TreeError::Corrupt("Container without siblings below the root".into())
                })?;
                let separator = parent.remove_at(slot);
                parent.children.remove(slot + 1);
                node.insert_element(node.num_elements(), separator.0, separator.1);
                node.keys.append(&mut right.keys);
                node.values.append(&mut right.values);
                node.children.append(&mut right.children);
            }
            trace!(depth = d, "merged with sibling");

            if p == 0 && parent.num_elements() == 0 {
                // The merged container becomes the root
                self.containers.remove(0);
                self.indices.remove(0);
                trace!("collapsed empty root");
                return Ok(());
            }
            d = p;
        }
        Ok(())
    }

    /// Store every container on the path bottom-up; returns the new start id.
    pub fn update(mut self) -> TreeResult<ChunkId> {
        if self.owner.is_some() {
            return Err(TreeError::RemoteTree);
        }
        let mut d = self.depth();
        let mut id = self.containers[d].store(self.store.as_ref())?;
        while d > 0 {
            d -= 1;
            let slot = self.indices[d];
            self.containers[d].children[slot] = id;
            id = self.containers[d].store(self.store.as_ref())?;
        }
        Ok(id)
    }
}
