//! Stock behaviors.

use barrage_shared::math::Transform2D;

use super::{Behavior, Receipt, ThrottleScope};
use crate::kernel::Kernel;
use crate::memory::NodeId;

/// Wraps a cloneable closure as a behavior. Captured values are the
/// behavior's state and are cloned along with it.
#[derive(Clone)]
pub struct FnBehavior<F> {
    f: F,
}

impl<F> FnBehavior<F>
where
    F: FnMut(&Kernel, NodeId, f32) -> Receipt + Clone + Send + 'static,
{
    /// Creates a behavior from a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates a boxed behavior from a closure.
    pub fn boxed(f: F) -> Box<dyn Behavior> {
        Box::new(Self::new(f))
    }
}

impl<F> Behavior for FnBehavior<F>
where
    F: FnMut(&Kernel, NodeId, f32) -> Receipt + Clone + Send + 'static,
{
    fn execute(&mut self, kernel: &Kernel, node: NodeId, step: f32) -> Receipt {
        (self.f)(kernel, node, step)
    }
}

/// Moves the local translation at a constant velocity (units per second).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Velocity {
    /// Units per second along x.
    pub vx: f32,
    /// Units per second along y.
    pub vy: f32,
}

impl Velocity {
    /// Creates a velocity behavior.
    #[must_use]
    pub const fn new(vx: f32, vy: f32) -> Self {
        Self { vx, vy }
    }
}

impl Behavior for Velocity {
    fn execute(&mut self, kernel: &Kernel, node: NodeId, step: f32) -> Receipt {
        let mut local = kernel.local_transform(node);
        local.tx += self.vx * step;
        local.ty += self.vy * step;
        kernel.set_local_transform(node, local);
        Receipt::CONTINUE
    }
}

/// Rotates the node about its own origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spin {
    /// Radians per second, counter-clockwise.
    pub rate: f32,
}

impl Spin {
    /// Creates a spin behavior.
    #[must_use]
    pub const fn new(rate: f32) -> Self {
        Self { rate }
    }
}

impl Behavior for Spin {
    fn execute(&mut self, kernel: &Kernel, node: NodeId, step: f32) -> Receipt {
        let local = kernel.local_transform(node);
        kernel.set_local_transform(node, local.then(Transform2D::from_rotation(self.rate * step)));
        Receipt::CONTINUE
    }
}

/// Deletes the node once its step time runs out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lifetime {
    remaining: f32,
    effect: bool,
}

impl Lifetime {
    /// Deletes the node after `seconds`.
    #[must_use]
    pub const fn new(seconds: f32) -> Self {
        Self {
            remaining: seconds,
            effect: false,
        }
    }

    /// Deletes the node after `seconds`, leaving a deletion effect.
    #[must_use]
    pub const fn with_effect(seconds: f32) -> Self {
        Self {
            remaining: seconds,
            effect: true,
        }
    }

    /// Step time left.
    #[must_use]
    pub const fn remaining(&self) -> f32 {
        self.remaining
    }
}

impl Behavior for Lifetime {
    fn execute(&mut self, _kernel: &Kernel, _node: NodeId, step: f32) -> Receipt {
        self.remaining -= step;
        match (self.remaining <= 0.0, self.effect) {
            (false, _) => Receipt::CONTINUE,
            (true, false) => Receipt::delete(),
            (true, true) => Receipt::delete_with_effect(),
        }
    }
}

/// Returns the same throttle every frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Throttle {
    /// Step multiplier.
    pub amount: f32,
    /// Reach of the multiplier.
    pub scope: ThrottleScope,
}

impl Throttle {
    /// Creates a throttle behavior.
    #[must_use]
    pub const fn new(amount: f32, scope: ThrottleScope) -> Self {
        Self { amount, scope }
    }
}

impl Behavior for Throttle {
    fn execute(&mut self, _kernel: &Kernel, _node: NodeId, _step: f32) -> Receipt {
        Receipt::throttled(self.amount, self.scope)
    }
}

/// Drives a deletion effect: fades the tint alpha to zero, then deletes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FadeOut {
    duration: f32,
    elapsed: f32,
}

impl FadeOut {
    /// Fades over `duration` seconds of step time.
    #[must_use]
    pub const fn new(duration: f32) -> Self {
        Self {
            duration,
            elapsed: 0.0,
        }
    }
}

impl Behavior for FadeOut {
    fn execute(&mut self, kernel: &Kernel, node: NodeId, step: f32) -> Receipt {
        self.elapsed += step;
        if self.elapsed >= self.duration {
            return Receipt::delete();
        }
        let mut color = kernel.extra(node).unwrap_or_default().color;
        color[3] = 1.0 - self.elapsed / self.duration;
        kernel.set_color(node, color);
        Receipt::CONTINUE
    }
}
