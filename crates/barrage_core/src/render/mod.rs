//! # Render-ID Registries
//!
//! Every visual type (bullet sprite, laser segment style) has a render id.
//! Entities join that id's membership queue to be drawn; once per frame the
//! queues are flattened into per-id instance buffers for the renderer.
//!
//! ```text
//! Behaviors ──set_render_id──▶ Membership queues ──populate──▶ Instance buffers
//!   (worker threads, locked)     (one per render id)           (next pow2 + 1 pad)
//! ```

mod buffer;
mod bullet;
mod catalog;
mod laser;

pub use buffer::InstanceBuffer;
pub use bullet::BulletRegistry;
pub use catalog::{Collider, MeshInfo, RenderRecord, VisualCatalog, VisualDef};
pub use laser::{LaserRegistry, LaserTag};

/// Identifier of one visual type within its kind.
///
/// Ids are dense, assigned in catalog declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct RenderId(u32);

impl RenderId {
    /// Creates a render ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the index into per-id tables.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Which registry a render id belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderKind {
    /// Sprite-like bullets, drawn one instance per member.
    Bullet,
    /// Laser segments, drawn as contiguous chains.
    Laser,
}

/// Marks a node that is in no queue.
pub(crate) const NOT_QUEUED: u32 = u32::MAX;
