//! Tree execution and the deletion post-pass.
//!
//! While a behavior runs, its slot in the node's list holds a copy taken
//! just before the call, so no slot lock is held across user code and the
//! list stays whole for anything that reads it meanwhile (a clone of the
//! node sees every behavior). Behaviors appended during the run wait for
//! the next frame.
//!
//! Fan-out: when a node's subtree is larger than the parallel cutoff and no
//! behavior on the path asked for single-threading, each child subtree runs
//! as its own task in a `rayon::scope`. Subtrees are disjoint, so tasks
//! never touch the same record.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Behavior, FadeOut, PendingDeletion, StepThrottle};
use crate::kernel::Kernel;
use crate::memory::NodeId;

impl Kernel {
    /// Runs the behaviors of `root`'s whole tree for one step.
    ///
    /// # Returns
    ///
    /// The number of nodes whose behaviors ran.
    pub fn execute(&self, root: NodeId, step: f32) -> usize {
        let visited = AtomicUsize::new(0);
        self.install(|| self.execute_node(root, step, false, &visited));
        visited.into_inner()
    }

    /// Runs every tree whose root is live when the call starts, in slot
    /// order. Roots attached to a parent before their turn are skipped.
    ///
    /// # Returns
    ///
    /// `(roots executed, nodes visited)`.
    pub fn execute_roots(&self, step: f32) -> (usize, usize) {
        let roots = self.arena.roots();
        let visited = AtomicUsize::new(0);
        let executed = self.install(|| {
            let mut executed = 0;
            for root in roots {
                if self.is_live(root) && self.parent(root).is_null() {
                    self.execute_node(root, step, false, &visited);
                    executed += 1;
                }
            }
            executed
        });
        (executed, visited.into_inner())
    }

    pub(crate) fn execute_node(
        &self,
        id: NodeId,
        step: f32,
        single_threaded: bool,
        visited: &AtomicUsize,
    ) {
        if !self.is_live(id) {
            return;
        }
        visited.fetch_add(1, Ordering::Relaxed);

        let count = self.with_node(id, |n| n.behaviors.len());
        let mut throttle = StepThrottle::default();
        let mut single_threaded = single_threaded;
        let mut deleted = false;
        for index in 0..count {
            let Some(mut behavior) = self.check_out_behavior(id, index) else {
                break;
            };
            let receipt = behavior.execute(self, id, throttle.take_step(step));
            self.check_in_behavior(id, index, behavior);
            single_threaded |= receipt.force_single_threaded;
            if receipt.delete {
                self.pending.lock().push(PendingDeletion {
                    node: id,
                    effect: receipt.use_deletion_effect,
                });
                deleted = true;
                break;
            }
            throttle.apply(receipt.throttle, receipt.scope);
        }
        if deleted {
            return;
        }

        let child_step = step * throttle.full;
        let tree_size = self.with_node(id, |n| n.tree_size);
        if !single_threaded && tree_size > self.config.parallel_cutoff {
            let children = self.children(id);
            rayon::scope(|scope| {
                for child in children {
                    scope.spawn(move |_| self.execute_node(child, child_step, false, visited));
                }
            });
        } else {
            let mut slot = 0;
            while let Some(child) = self.child_slot(id, slot) {
                if !child.is_null() {
                    self.execute_node(child, child_step, single_threaded, visited);
                }
                slot += 1;
            }
        }
    }

    /// Child slot `slot`, or `None` past the end. Re-read every step so
    /// children attached by earlier siblings still run this frame.
    fn child_slot(&self, id: NodeId, slot: usize) -> Option<NodeId> {
        let node = self.arena.lock(id);
        if !node.live {
            return None;
        }
        node.children.get(slot).copied()
    }

    /// Takes behavior `index` out of the node, leaving a copy in its place.
    fn check_out_behavior(&self, id: NodeId, index: usize) -> Option<Box<dyn Behavior>> {
        let mut node = self.arena.lock(id);
        if !node.live {
            return None;
        }
        let slot = node.behaviors.get_mut(index)?;
        let snapshot = slot.clone();
        Some(std::mem::replace(slot, snapshot))
    }

    /// Puts a behavior back after it ran, dropping the copy.
    fn check_in_behavior(&self, id: NodeId, index: usize, behavior: Box<dyn Behavior>) {
        let leftover = {
            let mut node = self.arena.lock(id);
            let live = node.live;
            match node.behaviors.get_mut(index) {
                Some(slot) if live => std::mem::replace(slot, behavior),
                _ => behavior,
            }
        };
        drop(leftover);
    }

    /// Applies the deletions requested this frame, lowest node first.
    ///
    /// A node asked to leave a deletion effect becomes one when its bullet
    /// visual declares an effect; otherwise its subtree is destroyed. A node
    /// already freed with an earlier subtree is skipped.
    ///
    /// # Returns
    ///
    /// `(subtrees destroyed, effects started)`.
    pub fn flush_deletions(&self) -> (usize, usize) {
        let mut pending = std::mem::take(&mut *self.pending.lock());
        let _span = tracing::trace_span!("flush_deletions", requested = pending.len()).entered();
        pending.sort_unstable();
        pending.dedup_by_key(|p| p.node);

        let (mut destroyed, mut effects) = (0, 0);
        for PendingDeletion { node, effect } in pending {
            if !self.is_live(node) {
                continue;
            }
            if effect && self.start_deletion_effect(node) {
                effects += 1;
            } else {
                self.destroy_subtree(node);
                destroyed += 1;
            }
        }
        (destroyed, effects)
    }

    /// Turns a bullet into its cosmetic deletion effect.
    ///
    /// # Returns
    ///
    /// `false` if the node has no effect visual (or is already an effect,
    /// or the effect queue is full); nothing is changed then.
    fn start_deletion_effect(&self, id: NodeId) -> bool {
        let (bullet, already) = self.with_node(id, |n| (n.bullet_render_id, n.deletion_effect));
        if already {
            return false;
        }
        let Some(effect) = bullet.and_then(|b| self.bullets.deletion_effect_of(b)) else {
            return false;
        };
        let world = self.world_transform(id);
        if !self.set_bullet_render_id(id, Some(effect)) {
            return false;
        }

        let (parent, slot) = (self.parent(id), self.position_in_parent(id));
        if !parent.is_null() {
            self.set_child(parent, slot, NodeId::NULL);
        }
        for child in self.children(id) {
            self.destroy_subtree(child);
        }
        self.set_laser_render_id(id, None);

        let fade: Box<dyn Behavior> = Box::new(FadeOut::new(self.config.deletion_effect_seconds));
        let replaced = self.with_node_mut(id, |n| {
            n.deletion_effect = true;
            n.world_mode = false;
            n.transform = world;
            std::mem::replace(&mut n.behaviors, vec![fade])
        });
        drop(replaced);
        self.transforms.invalidate(id);
        true
    }
}
