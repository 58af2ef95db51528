//! # Entity Records
//!
//! Every simulation unit (visible bullet, invisible grouping parent, laser
//! segment) is one `Node` with the same fixed shape. Nodes reference each
//! other by `NodeId` only; the arena owns all of them.

use barrage_shared::math::Transform2D;

use crate::behavior::Behavior;
use crate::render::RenderId;

/// Index of a record slot in the arena.
///
/// `NodeId::NULL` is the reserved sentinel for "no node": allocation
/// failure, an empty child slot, or a root's parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Null/invalid node ID.
    pub const NULL: Self = Self(u32::MAX);

    /// Creates a node ID from a slot index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Checks if this is the null sentinel.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::NULL
    }
}

/// A contiguous run of slots handed out by one allocation.
///
/// The run is contiguous in ring order, so it may wrap from the last slot
/// back to slot 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeRun {
    first: u32,
    len: u32,
    ring: u32,
}

impl NodeRun {
    pub(crate) const fn new(first: u32, len: u32, ring: u32) -> Self {
        Self { first, len, ring }
    }

    /// First node of the run.
    #[inline]
    #[must_use]
    pub const fn first(&self) -> NodeId {
        NodeId(self.first)
    }

    /// Number of nodes in the run.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false for a run returned by the arena.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The `k`-th node of the run.
    ///
    /// # Panics
    ///
    /// Panics if `k >= len()`.
    #[inline]
    #[must_use]
    pub fn get(&self, k: usize) -> NodeId {
        assert!(k < self.len(), "run index {k} out of range {}", self.len);
        #[allow(clippy::cast_possible_truncation)]
        let offset = k as u32;
        NodeId((self.first + offset) % self.ring)
    }

    /// Iterates the run in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.len()).map(|k| self.get(k))
    }
}

/// Optional per-instance render data, allocated on first use.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtraData {
    /// Tint color, RGBA.
    pub color: [f32; 4],
    /// Free-form vector for the visual's shader.
    pub custom: [f32; 4],
}

impl Default for ExtraData {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0, 1.0],
            custom: [0.0; 4],
        }
    }
}

/// One entity record.
pub(crate) struct Node {
    /// Whether this slot currently holds an entity.
    pub(crate) live: bool,
    /// When set, `transform` is already the world transform.
    pub(crate) world_mode: bool,
    /// Local (or world, see `world_mode`) transform.
    pub(crate) transform: Transform2D,
    /// Child slots. `NodeId::NULL` marks an empty slot.
    pub(crate) children: Vec<NodeId>,
    /// Behaviors, run in order every frame.
    pub(crate) behaviors: Vec<Box<dyn Behavior>>,
    pub(crate) bullet_render_id: Option<RenderId>,
    pub(crate) laser_render_id: Option<RenderId>,
    /// Exact: 1 + sum of the children's tree sizes.
    pub(crate) tree_size: u32,
    /// Upper bound on the subtree depth (a leaf is 1).
    pub(crate) tree_depth: u32,
    pub(crate) parent: NodeId,
    pub(crate) position_in_parent: u32,
    pub(crate) collision_layer: u16,
    pub(crate) sleep_eligible: bool,
    /// Set once the node has become a cosmetic deletion effect.
    pub(crate) deletion_effect: bool,
    pub(crate) graze: f32,
    pub(crate) power: f32,
    pub(crate) health: f32,
    pub(crate) extra: Option<Box<ExtraData>>,
}

impl Node {
    /// The record every freshly allocated slot starts from.
    #[must_use]
    pub(crate) fn template() -> Self {
        Self {
            live: true,
            ..Self::vacant()
        }
    }

    /// An unused slot.
    #[must_use]
    pub(crate) fn vacant() -> Self {
        Self {
            live: false,
            world_mode: false,
            transform: Transform2D::IDENTITY,
            children: Vec::new(),
            behaviors: Vec::new(),
            bullet_render_id: None,
            laser_render_id: None,
            tree_size: 1,
            tree_depth: 1,
            parent: NodeId::NULL,
            position_in_parent: 0,
            collision_layer: 0,
            sleep_eligible: false,
            deletion_effect: false,
            graze: 0.0,
            power: 0.0,
            health: 0.0,
            extra: None,
        }
    }

    /// A storage-disjoint copy for subtree cloning.
    ///
    /// Behaviors and extra data are deep-copied. Tree links, children and
    /// render associations start empty; the clone re-registers and
    /// re-attaches them.
    #[must_use]
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            live: true,
            world_mode: self.world_mode,
            transform: self.transform,
            behaviors: self.behaviors.clone(),
            collision_layer: self.collision_layer,
            sleep_eligible: self.sleep_eligible,
            deletion_effect: self.deletion_effect,
            graze: self.graze,
            power: self.power,
            health: self.health,
            extra: self.extra.clone(),
            ..Self::vacant()
        }
    }

    /// Whether the node has no parent.
    #[inline]
    #[must_use]
    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_null()
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::vacant()
    }
}
