//! # Transform Cache
//!
//! World transforms are resolved on demand and memoized per frame:
//!
//! ```text
//! world(n) = local(n)                         if n is a root or in world mode
//!          = world(parent(n)) ∘ local(n)      otherwise
//! ```
//!
//! Each slot keeps the last world transform and the frame it was computed
//! for. A cached value from an older frame is never returned.

use barrage_shared::math::Transform2D;
use parking_lot::Mutex;

use crate::kernel::Kernel;
use crate::memory::NodeId;

/// Frame stamp of an entry that holds nothing.
const STALE: u64 = u64::MAX;

#[derive(Clone, Copy, Debug)]
struct CachedTransform {
    world: Transform2D,
    frame: u64,
}

impl Default for CachedTransform {
    fn default() -> Self {
        Self {
            world: Transform2D::IDENTITY,
            frame: STALE,
        }
    }
}

/// Per-slot scratch of resolved world transforms.
pub struct TransformCache {
    entries: Box<[Mutex<CachedTransform>]>,
}

impl TransformCache {
    /// Creates a cache with one entry per arena slot.
    #[must_use]
    pub fn new(slot_count: usize) -> Self {
        Self {
            entries: (0..slot_count)
                .map(|_| Mutex::new(CachedTransform::default()))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    /// The cached world transform, if it was computed in `frame`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: NodeId, frame: u64) -> Option<Transform2D> {
        let entry = self.entries[id.index()].lock();
        (entry.frame == frame).then_some(entry.world)
    }

    #[inline]
    fn store(&self, id: NodeId, frame: u64, world: Transform2D) {
        *self.entries[id.index()].lock() = CachedTransform { world, frame };
    }

    /// Drops the cached value so the next read recomputes it.
    #[inline]
    pub fn invalidate(&self, id: NodeId) {
        self.entries[id.index()].lock().frame = STALE;
    }
}

impl Kernel {
    /// World transform of a node in the current frame.
    ///
    /// Walks up to the nearest ancestor that is cached, a root, or in world
    /// mode, then composes back down, caching every level on the way.
    ///
    /// # Panics
    ///
    /// Panics if `id` (or an ancestor) is not live.
    #[must_use]
    pub fn world_transform(&self, id: NodeId) -> Transform2D {
        let frame = self.frame();
        let mut pending = Vec::new();
        let mut cursor = id;
        let mut world = loop {
            if let Some(world) = self.transforms.get(cursor, frame) {
                break world;
            }
            let (local, world_mode, parent) = self.with_node(cursor, |n| {
                (n.transform, n.world_mode, n.parent)
            });
            if world_mode || parent.is_null() {
                self.transforms.store(cursor, frame, local);
                break local;
            }
            pending.push((cursor, local));
            cursor = parent;
        };

        for (node, local) in pending.into_iter().rev() {
            world = world.then(local);
            self.transforms.store(node, frame, world);
        }
        world
    }

    /// Sets a node's local transform so that its world transform becomes
    /// `world`, then invalidates its cache entry.
    ///
    /// The parent's world transform is re-resolved first, so a parent moved
    /// earlier in the same frame is taken into account. If the parent's
    /// world transform is singular the call is ignored.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub fn set_world_transform(&self, id: NodeId, world: Transform2D) {
        let (world_mode, parent) = self.with_node(id, |n| (n.world_mode, n.parent));
        let local = if world_mode || parent.is_null() {
            world
        } else {
            let parent_world = self.world_transform(parent);
            let Some(inverse) = parent_world.inverse() else {
                tracing::warn!(node = id.raw(), "parent transform is singular, world transform unchanged");
                return;
            };
            inverse.then(world)
        };
        self.with_node_mut(id, |n| n.transform = local);
        self.transforms.invalidate(id);
    }

    /// Forgets a node's cached world transform.
    ///
    /// Needed for descendants of a node whose transform changed after they
    /// were resolved this frame.
    pub fn invalidate_transform(&self, id: NodeId) {
        self.transforms.invalidate(id);
    }
}
