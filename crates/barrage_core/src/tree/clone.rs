//! Subtree cloning.
//!
//! Copies are built breadth first, so sibling segments join their copied
//! laser in slot order.
//! A failed clone destroys everything it built before reporting failure.

use std::collections::VecDeque;

use crate::kernel::Kernel;
use crate::memory::{NodeId, NodeRun};

impl Kernel {
    /// Deep-copies `id` and its descendants into a new parentless tree.
    ///
    /// # Returns
    ///
    /// The copy of `id`, or `NodeId::NULL` if the arena ran out of space or
    /// a render queue was full. Nothing is left allocated on failure.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub fn clone_subtree(&self, id: NodeId) -> NodeId {
        self.clone_subtree_run(id, 1).map_or(NodeId::NULL, |run| run.first())
    }

    /// Deep-copies `id` and its descendants `n` times. The copies of `id`
    /// are allocated as one contiguous run.
    ///
    /// # Returns
    ///
    /// The run of copied roots, or `None` if any part of any copy failed.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live or `n` is zero.
    pub fn clone_subtree_run(&self, id: NodeId, n: usize) -> Option<NodeRun> {
        assert!(n > 0, "clone_subtree_run: empty run");
        assert!(self.is_live(id), "clone_subtree: node {} is not live", id.raw());
        let Some(run) = self.allocate_run(n) else {
            tracing::debug!(node = id.raw(), copies = n, "clone failed: arena full");
            return None;
        };

        for copy in run.iter() {
            if !self.clone_into(id, copy) {
                tracing::debug!(node = id.raw(), copies = n, "clone failed, rolling back");
                for built in run.iter() {
                    if self.is_live(built) {
                        self.destroy_subtree(built);
                    }
                }
                return None;
            }
        }
        Some(run)
    }

    /// Fills the freshly allocated root `copy` from `source` and clones the
    /// descendants under it.
    fn clone_into(&self, source: NodeId, copy: NodeId) -> bool {
        self.copy_record(source, copy);
        if !self.copy_render_association(source, copy) {
            return false;
        }

        let mut queue = VecDeque::from([(source, copy)]);
        while let Some((source, copy)) = queue.pop_front() {
            let children = self.with_node(source, |n| n.children.clone());
            for (slot, child) in children.into_iter().enumerate() {
                if child.is_null() {
                    continue;
                }
                let copied = self.allocate_one();
                if copied.is_null() {
                    return false;
                }
                self.set_child(copy, slot, copied);
                self.copy_record(child, copied);
                if !self.copy_render_association(child, copied) {
                    return false;
                }
                queue.push_back((child, copied));
            }
        }
        true
    }

    /// Overwrites `copy`'s record with a duplicate of `source`, keeping
    /// `copy`'s own tree links.
    fn copy_record(&self, source: NodeId, copy: NodeId) {
        let duplicate = self.with_node(source, |n| n.duplicate());
        let replaced = self.with_node_mut(copy, |n| {
            let mut duplicate = duplicate;
            duplicate.parent = n.parent;
            duplicate.position_in_parent = n.position_in_parent;
            std::mem::replace(n, duplicate)
        });
        drop(replaced);
        self.transforms.invalidate(copy);
    }

    fn copy_render_association(&self, source: NodeId, copy: NodeId) -> bool {
        let (bullet, laser) = self.with_node(source, |n| (n.bullet_render_id, n.laser_render_id));
        if bullet.is_some() && !self.set_bullet_render_id(copy, bullet) {
            return false;
        }
        laser.is_none() || self.set_laser_render_id(copy, laser)
    }
}
