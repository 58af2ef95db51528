//! # Tree Operations
//!
//! Child-slot mutation, subtree destruction and the size/depth bookkeeping
//! that keeps the fan-out heuristic cheap.
//!
//! ## Bookkeeping
//!
//! - `tree_size` is exact: every `set_child` walks the whole ancestor chain
//!   with the size delta.
//! - `tree_depth` is an upper bound on the subtree's true depth. `set_child`
//!   raises it on the immediate parent only and never lowers it;
//!   `recalculate_depth` makes it exact again.

mod clone;

use std::collections::VecDeque;

use crate::kernel::Kernel;
use crate::memory::NodeId;

impl Kernel {
    /// Puts `child` (or nothing, for `NodeId::NULL`) into `parent`'s child
    /// slot `slot`, growing the child array if needed.
    ///
    /// The previous occupant becomes a root. A `child` that already has a
    /// parent is detached from it first.
    ///
    /// # Panics
    ///
    /// Panics if `parent` or a non-null `child` is not live, or if `child`
    /// is `parent` or one of its ancestors.
    pub fn set_child(&self, parent: NodeId, slot: usize, child: NodeId) {
        assert!(self.is_live(parent), "set_child: parent {} is not live", parent.raw());
        let (child_size, child_depth) = if child.is_null() {
            (0, 0)
        } else {
            assert!(
                !self.is_ancestor_or_self(child, parent),
                "set_child: node {} would become its own ancestor",
                child.raw()
            );
            let (old_parent, old_slot) =
                self.with_node(child, |n| (n.parent, n.position_in_parent as usize));
            if old_parent == parent && old_slot == slot {
                return;
            }
            if !old_parent.is_null() {
                self.set_child(old_parent, old_slot, NodeId::NULL);
            }
            self.with_node(child, |n| (n.tree_size, n.tree_depth))
        };

        let previous = self.with_node_mut(parent, |n| {
            if n.children.len() <= slot {
                n.children.resize(slot + 1, NodeId::NULL);
            }
            if !child.is_null() {
                n.tree_depth = n.tree_depth.max(child_depth + 1);
            }
            std::mem::replace(&mut n.children[slot], child)
        });

        let previous_size = if previous.is_null() {
            0
        } else {
            let size = self.with_node_mut(previous, |n| {
                n.parent = NodeId::NULL;
                n.position_in_parent = 0;
                n.tree_size
            });
            self.transforms.invalidate(previous);
            size
        };

        if !child.is_null() {
            #[allow(clippy::cast_possible_truncation)]
            let position = slot as u32;
            self.with_node_mut(child, |n| {
                n.parent = parent;
                n.position_in_parent = position;
            });
            self.transforms.invalidate(child);
        }

        let delta = i64::from(child_size) - i64::from(previous_size);
        if delta != 0 {
            let mut cursor = parent;
            while !cursor.is_null() {
                cursor = self.with_node_mut(cursor, |n| {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let size = (i64::from(n.tree_size) + delta) as u32;
                    n.tree_size = size;
                    n.parent
                });
            }
        }
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        while !node.is_null() {
            if node == ancestor {
                return true;
            }
            node = self.with_node(node, |n| n.parent);
        }
        false
    }

    /// Recomputes the exact depth of `id`'s subtree bottom-up, then refreshes
    /// every ancestor from its children's bounds.
    pub fn recalculate_depth(&self, id: NodeId) {
        let order = self.collect_subtree(id);
        for &node in order.iter().rev() {
            let children = self.with_node(node, |n| n.children.clone());
            let depth = 1 + children
                .into_iter()
                .filter(|c| !c.is_null())
                .map(|c| self.with_node(c, |n| n.tree_depth))
                .max()
                .unwrap_or(0);
            self.with_node_mut(node, |n| n.tree_depth = depth);
        }

        let mut cursor = self.with_node(id, |n| n.parent);
        while !cursor.is_null() {
            let children = self.with_node(cursor, |n| n.children.clone());
            let depth = 1 + children
                .into_iter()
                .filter(|c| !c.is_null())
                .map(|c| self.with_node(c, |n| n.tree_depth))
                .max()
                .unwrap_or(0);
            cursor = self.with_node_mut(cursor, |n| {
                n.tree_depth = depth;
                n.parent
            });
        }
    }

    /// `id` and all its descendants, breadth first.
    pub(crate) fn collect_subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = vec![id];
        let mut queue = VecDeque::from([id]);
        while let Some(node) = queue.pop_front() {
            let children = self.with_node(node, |n| n.children.clone());
            for child in children.into_iter().filter(|c| !c.is_null()) {
                order.push(child);
                queue.push_back(child);
            }
        }
        order
    }

    /// Detaches `id` from its parent and frees it with every descendant,
    /// children first.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub fn destroy_subtree(&self, id: NodeId) {
        let (parent, slot) = self.with_node(id, |n| (n.parent, n.position_in_parent as usize));
        if !parent.is_null() {
            self.set_child(parent, slot, NodeId::NULL);
        }
        let order = self.collect_subtree(id);
        for &node in order.iter().rev() {
            self.release_node(node);
        }
    }

    /// Frees one parentless node. Its children become roots.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live or still has a parent.
    pub fn free(&self, id: NodeId) {
        let (parent, children) = self.with_node(id, |n| (n.parent, n.children.clone()));
        assert!(parent.is_null(), "free: node {} still has a parent", id.raw());
        for (slot, child) in children.into_iter().enumerate() {
            if !child.is_null() {
                self.set_child(id, slot, NodeId::NULL);
            }
        }
        self.release_node(id);
    }

    /// Drops the render associations and cache entry, then returns the slot
    /// to the arena.
    fn release_node(&self, id: NodeId) {
        self.set_bullet_render_id(id, None);
        self.set_laser_render_id(id, None);
        self.transforms.invalidate(id);
        self.arena.release(id);
    }

    /// Parent of a node, `NodeId::NULL` for roots.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> NodeId {
        self.with_node(id, |n| n.parent)
    }

    /// Slot index of a node in its parent's child array.
    #[must_use]
    pub fn position_in_parent(&self, id: NodeId) -> usize {
        self.with_node(id, |n| n.position_in_parent as usize)
    }

    /// Occupant of a child slot; `NodeId::NULL` if empty or out of range.
    #[must_use]
    pub fn child(&self, id: NodeId, slot: usize) -> NodeId {
        self.with_node(id, |n| n.children.get(slot).copied().unwrap_or(NodeId::NULL))
    }

    /// Length of the child array, empty slots included.
    #[must_use]
    pub fn child_count(&self, id: NodeId) -> usize {
        self.with_node(id, |n| n.children.len())
    }

    /// Non-empty child slots in slot order.
    #[must_use]
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.with_node(id, |n| n.children.iter().copied().filter(|c| !c.is_null()).collect())
    }

    /// Nodes in the subtree, exact.
    #[must_use]
    pub fn tree_size(&self, id: NodeId) -> usize {
        self.with_node(id, |n| n.tree_size as usize)
    }

    /// Upper bound on the subtree depth; a leaf is 1.
    #[must_use]
    pub fn tree_depth(&self, id: NodeId) -> usize {
        self.with_node(id, |n| n.tree_depth as usize)
    }
}
