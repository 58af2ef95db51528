//! # Behavior Engine
//!
//! Every node owns an ordered list of behaviors. Once per frame the engine
//! walks each tree depth first and runs every node's behaviors in order,
//! handing each the current effective step size.
//!
//! ## Throttle Scopes
//!
//! A behavior may slow down what runs after it by returning a throttle in
//! its [`Receipt`]:
//!
//! ```text
//! Full  x a  -> remaining behaviors on this node AND the whole subtree
//! Self  x a  -> remaining behaviors on this node only
//! Next  x a  -> the single following behavior, then resets
//! ```
//!
//! Scopes compose multiplicatively.
//!
//! ## Behavior State
//!
//! A behavior's fields are its private state. Cloning a subtree clones each
//! behavior through `Clone`; freeing a node drops them.

mod builtin;
mod engine;

pub use builtin::{FadeOut, FnBehavior, Lifetime, Spin, Throttle, Velocity};

use crate::kernel::Kernel;
use crate::memory::NodeId;

/// How far a throttle reaches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThrottleScope {
    /// This node's remaining behaviors and all its descendants.
    #[default]
    Full,
    /// This node's remaining behaviors.
    SelfOnly,
    /// The next behavior on this node only.
    Next,
}

/// What a behavior asks of the engine after running.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Receipt {
    /// Remove the node (and its subtree) in the post-frame pass.
    pub delete: bool,
    /// Turn a visible bullet into its cosmetic deletion effect instead.
    pub use_deletion_effect: bool,
    /// Step multiplier in `[0, 1]`; 1 leaves the step unchanged.
    pub throttle: f32,
    /// Reach of `throttle`.
    pub scope: ThrottleScope,
    /// Run the rest of this subtree on the current thread, in child order.
    pub force_single_threaded: bool,
}

impl Receipt {
    /// Keep going, nothing requested.
    pub const CONTINUE: Self = Self {
        delete: false,
        use_deletion_effect: false,
        throttle: 1.0,
        scope: ThrottleScope::Full,
        force_single_threaded: false,
    };

    /// Delete the node after this frame.
    #[must_use]
    pub const fn delete() -> Self {
        Self {
            delete: true,
            ..Self::CONTINUE
        }
    }

    /// Delete the node after this frame, leaving a deletion effect if its
    /// visual has one.
    #[must_use]
    pub const fn delete_with_effect() -> Self {
        Self {
            delete: true,
            use_deletion_effect: true,
            ..Self::CONTINUE
        }
    }

    /// Scale the step for `scope` by `amount`.
    #[must_use]
    pub const fn throttled(amount: f32, scope: ThrottleScope) -> Self {
        Self {
            throttle: amount,
            scope,
            ..Self::CONTINUE
        }
    }

    /// Ask for sequential, in-order traversal of the rest of this subtree.
    #[must_use]
    pub const fn single_threaded() -> Self {
        Self {
            force_single_threaded: true,
            ..Self::CONTINUE
        }
    }
}

impl Default for Receipt {
    fn default() -> Self {
        Self::CONTINUE
    }
}

/// Object-safe cloning for boxed behaviors.
pub trait BehaviorClone {
    /// Clones into a new box.
    fn clone_box(&self) -> Box<dyn Behavior>;
}

impl<T> BehaviorClone for T
where
    T: Behavior + Clone + 'static,
{
    fn clone_box(&self) -> Box<dyn Behavior> {
        Box::new(self.clone())
    }
}

/// Per-node logic run once per frame.
///
/// Behaviors run on pool workers and receive the whole kernel, so they may
/// move their node, spawn or clone subtrees, change render ids, or query
/// other nodes. They must not free nodes directly; return a deleting
/// [`Receipt`] instead.
pub trait Behavior: BehaviorClone + Send {
    /// Runs for one frame with the effective step size.
    fn execute(&mut self, kernel: &Kernel, node: NodeId, step: f32) -> Receipt;
}

impl Clone for Box<dyn Behavior> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Running throttle state while one node executes.
#[derive(Clone, Copy, Debug)]
pub(crate) struct StepThrottle {
    /// Applies to this node and is inherited by children.
    pub(crate) full: f32,
    local: f32,
    next: Option<f32>,
}

impl Default for StepThrottle {
    fn default() -> Self {
        Self {
            full: 1.0,
            local: 1.0,
            next: None,
        }
    }
}

impl StepThrottle {
    /// Step size for the next behavior, consuming any `Next` throttle.
    pub(crate) fn take_step(&mut self, step: f32) -> f32 {
        step * self.full * self.local * self.next.take().unwrap_or(1.0)
    }

    pub(crate) fn apply(&mut self, amount: f32, scope: ThrottleScope) {
        let amount = if amount.is_nan() { 1.0 } else { amount.clamp(0.0, 1.0) };
        match scope {
            ThrottleScope::Full => self.full *= amount,
            ThrottleScope::SelfOnly => self.local *= amount,
            ThrottleScope::Next => self.next = Some(amount),
        }
    }
}

/// A deletion requested during traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct PendingDeletion {
    pub(crate) node: NodeId,
    pub(crate) effect: bool,
}

impl Kernel {
    /// Appends a behavior to a node's list.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub fn append_behavior(&self, id: NodeId, behavior: Box<dyn Behavior>) {
        self.with_node_mut(id, |n| n.behaviors.push(behavior));
    }

    /// Behaviors on a node.
    #[must_use]
    pub fn behavior_count(&self, id: NodeId) -> usize {
        self.with_node(id, |n| n.behaviors.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_then_next() {
        let mut throttle = StepThrottle::default();
        assert_eq!(throttle.take_step(1.0), 1.0);
        throttle.apply(0.5, ThrottleScope::Full);
        assert_eq!(throttle.take_step(1.0), 0.5);
        throttle.apply(0.5, ThrottleScope::Next);
        assert_eq!(throttle.take_step(1.0), 0.25);
        assert_eq!(throttle.take_step(1.0), 0.5);
        assert_eq!(throttle.full, 0.5);
    }

    #[test]
    fn test_self_scope_not_inherited() {
        let mut throttle = StepThrottle::default();
        throttle.apply(0.25, ThrottleScope::SelfOnly);
        assert_eq!(throttle.take_step(2.0), 0.5);
        assert_eq!(throttle.full, 1.0);
    }

    #[test]
    fn test_amount_clamped() {
        let mut throttle = StepThrottle::default();
        throttle.apply(3.0, ThrottleScope::Full);
        throttle.apply(-1.0, ThrottleScope::SelfOnly);
        assert_eq!(throttle.full, 1.0);
        assert_eq!(throttle.take_step(1.0), 0.0);
    }

    #[test]
    fn test_pending_sorts_plain_delete_first() {
        let mut pending = vec![
            PendingDeletion { node: NodeId::new(3), effect: true },
            PendingDeletion { node: NodeId::new(1), effect: true },
            PendingDeletion { node: NodeId::new(3), effect: false },
        ];
        pending.sort_unstable();
        pending.dedup_by_key(|p| p.node);
        assert_eq!(
            pending,
            vec![
                PendingDeletion { node: NodeId::new(1), effect: true },
                PendingDeletion { node: NodeId::new(3), effect: false },
            ]
        );
    }
}
