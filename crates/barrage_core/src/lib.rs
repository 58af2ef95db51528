//! # BARRAGE Core Kernel
//!
//! Simulation kernel for dense bullet patterns:
//! - Fixed-capacity ring arena of entity records
//! - Entity trees with incremental size and depth bookkeeping
//! - Per-node behavior lists with throttling and fork-join fan-out
//! - Frame-keyed world transform cache
//! - Bullet and laser render queues feeding flat instance buffers
//!
//! ## Architecture Rules
//!
//! 1. **No allocation from the arena after startup** - every slot exists up front
//! 2. **Ids, not pointers** - nodes reference each other by `NodeId`
//! 3. **Fine-grained locks** - one per slot, one per registry, never nested slot locks
//!
//! ## Example
//!
//! ```rust,ignore
//! use barrage_core::{Kernel, KernelConfig, VisualCatalog, Velocity};
//!
//! let kernel = Kernel::new(KernelConfig::default(), VisualCatalog::load("visuals.toml")?)?;
//! let bullet = kernel.allocate_one();
//! kernel.append_behavior(bullet, Box::new(Velocity::new(0.0, 120.0)));
//! kernel.step_frame(1.0 / 60.0);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod behavior;
pub mod config;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod render;
pub mod transform;
pub mod tree;

pub use behavior::{
    Behavior, FadeOut, FnBehavior, Lifetime, Receipt, Spin, Throttle, ThrottleScope, Velocity,
};
pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use kernel::{FrameStats, Kernel};
pub use memory::{ExtraData, NodeArena, NodeId, NodeRun};
pub use render::{
    BulletRegistry, Collider, InstanceBuffer, LaserRegistry, LaserTag, MeshInfo, RenderId,
    RenderKind, RenderRecord, VisualCatalog, VisualDef,
};
pub use transform::TransformCache;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::KernelConfig;
    use crate::kernel::Kernel;
    use crate::render::VisualCatalog;

    /// Bullets `orb` (0, pops into `orb_pop`), `orb_pop` (1), `dart` (2);
    /// laser `beam` (0).
    pub(crate) fn catalog() -> VisualCatalog {
        VisualCatalog::from_toml_str(
            r#"
            [[bullet]]
            name = "orb"
            z_order = 10
            color = true
            deletion_effect = "orb_pop"
            collider = { shape = "circle", radius = 4.0 }

            [[bullet]]
            name = "orb_pop"
            z_order = 11
            color = true

            [[bullet]]
            name = "dart"
            collider = { shape = "circle", radius = 2.0 }

            [[laser]]
            name = "beam"
            mesh = { width = 8.0, height = 32.0 }
            collider = { shape = "box", half_width = 3.0, half_height = 16.0 }
            "#,
        )
        .unwrap()
    }

    pub(crate) fn config(slots: usize) -> KernelConfig {
        KernelConfig {
            arena_slots: slots,
            parallel_cutoff: 4,
            worker_threads: 2,
            max_queue_members: slots,
            deletion_effect_seconds: 0.5,
        }
    }

    pub(crate) fn kernel(slots: usize) -> Kernel {
        Kernel::new(config(slots), catalog()).unwrap()
    }
}
