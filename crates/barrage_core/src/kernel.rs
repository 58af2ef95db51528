//! # Kernel Context
//!
//! One explicit object owns every piece of simulation state and is passed
//! (as `&Kernel`) to every entry point, including behaviors running on
//! worker threads.
//!
//! ```text
//! ┌──────────────────────────── Kernel ────────────────────────────┐
//! │  NodeArena      TransformCache    BulletRegistry  LaserRegistry │
//! │  (slot locks,   (slot locks)      (one lock)      (one lock)    │
//! │   cursor lock)                                                  │
//! │  pending deletions (one lock)     rayon pool      frame counter │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lock Order
//!
//! registry → arena cursors → one slot or cache entry. Slot locks are never
//! nested, and no lock is held while a behavior runs.

use std::sync::atomic::{AtomicU64, Ordering};

use barrage_shared::math::Transform2D;
use parking_lot::Mutex;

use crate::behavior::PendingDeletion;
use crate::config::KernelConfig;
use crate::error::KernelResult;
use crate::memory::{ExtraData, Node, NodeArena, NodeId, NodeRun};
use crate::render::{
    BulletRegistry, Collider, LaserRegistry, LaserTag, RenderId, RenderKind, VisualCatalog,
};
use crate::transform::TransformCache;

/// Stack size of pool workers; sequential traversal recurses per tree level.
const WORKER_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Counters from one `step_frame`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number that was simulated.
    pub frame: u64,
    /// Roots whose trees were executed.
    pub roots: usize,
    /// Nodes whose behaviors ran.
    pub visited: usize,
    /// Subtrees destroyed by the deletion post-pass.
    pub destroyed: usize,
    /// Bullets converted into deletion effects.
    pub effects: usize,
    /// Live nodes after the frame.
    pub live: usize,
}

/// The simulation kernel.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) catalog: VisualCatalog,
    pub(crate) arena: NodeArena,
    pub(crate) transforms: TransformCache,
    pub(crate) bullets: BulletRegistry,
    pub(crate) lasers: LaserRegistry,
    pub(crate) pending: Mutex<Vec<PendingDeletion>>,
    frame: AtomicU64,
    pool: rayon::ThreadPool,
}

impl Kernel {
    /// Creates a kernel. All arena slots are allocated here.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the worker pool cannot
    /// be started.
    pub fn new(config: KernelConfig, catalog: VisualCatalog) -> KernelResult<Self> {
        config.validate()?;

        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|index| format!("barrage-worker-{index}"))
            .stack_size(WORKER_STACK_BYTES);
        if config.worker_threads > 0 {
            builder = builder.num_threads(config.worker_threads);
        }
        let pool = builder.build()?;

        let slots = config.arena_slots;
        let bullets = BulletRegistry::new(
            catalog.records(RenderKind::Bullet).to_vec(),
            slots,
            config.max_queue_members,
        );
        let lasers = LaserRegistry::new(
            catalog.records(RenderKind::Laser).to_vec(),
            slots,
            config.max_queue_members,
        );

        tracing::info!(
            arena_slots = slots,
            parallel_cutoff = config.parallel_cutoff,
            workers = pool.current_num_threads(),
            "kernel ready"
        );

        Ok(Self {
            arena: NodeArena::new(slots),
            transforms: TransformCache::new(slots),
            bullets,
            lasers,
            pending: Mutex::new(Vec::new()),
            frame: AtomicU64::new(0),
            pool,
            config,
            catalog,
        })
    }

    // =========================================================================
    // Context
    // =========================================================================

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The visual catalog.
    #[must_use]
    pub fn catalog(&self) -> &VisualCatalog {
        &self.catalog
    }

    /// The entity arena.
    #[must_use]
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// The bullet registry.
    #[must_use]
    pub fn bullets(&self) -> &BulletRegistry {
        &self.bullets
    }

    /// The laser registry.
    #[must_use]
    pub fn lasers(&self) -> &LaserRegistry {
        &self.lasers
    }

    /// Current frame number.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Starts a new frame, returning its number. Every cached world
    /// transform becomes stale.
    pub fn advance_frame(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Runs `f` on the worker pool, blocking until it returns.
    pub(crate) fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocates one node from the template.
    ///
    /// # Returns
    ///
    /// The node, or `NodeId::NULL` if the arena is full.
    pub fn allocate_one(&self) -> NodeId {
        self.arena.allocate_one()
    }

    /// Allocates `n` nodes contiguous in ring order.
    ///
    /// # Returns
    ///
    /// The run, or `None` if fewer than `n` slots are free.
    pub fn allocate_run(&self, n: usize) -> Option<NodeRun> {
        self.arena.allocate_run(n)
    }

    /// Entities that can be live at once.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Live entities.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.arena.live_count()
    }

    /// Checks if a node is live.
    #[must_use]
    pub fn is_live(&self, id: NodeId) -> bool {
        self.arena.is_live(id)
    }

    // =========================================================================
    // Record access
    // =========================================================================

    /// Reads a live node under its slot lock.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub(crate) fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> R {
        f(&self.arena.lock_live(id, "read"))
    }

    /// Mutates a live node under its slot lock.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub(crate) fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> R {
        f(&mut self.arena.lock_live(id, "write"))
    }

    /// Local transform (world transform when in world mode).
    #[must_use]
    pub fn local_transform(&self, id: NodeId) -> Transform2D {
        self.with_node(id, |n| n.transform)
    }

    /// Replaces the local transform and invalidates the node's cache entry.
    pub fn set_local_transform(&self, id: NodeId, transform: Transform2D) {
        self.with_node_mut(id, |n| n.transform = transform);
        self.transforms.invalidate(id);
    }

    /// Whether the node's transform is interpreted as a world transform.
    #[must_use]
    pub fn world_mode(&self, id: NodeId) -> bool {
        self.with_node(id, |n| n.world_mode)
    }

    /// Switches between local and world transform mode.
    pub fn set_world_mode(&self, id: NodeId, world_mode: bool) {
        self.with_node_mut(id, |n| n.world_mode = world_mode);
        self.transforms.invalidate(id);
    }

    /// Collision layer id.
    #[must_use]
    pub fn collision_layer(&self, id: NodeId) -> u16 {
        self.with_node(id, |n| n.collision_layer)
    }

    /// Sets the collision layer id.
    pub fn set_collision_layer(&self, id: NodeId, layer: u16) {
        self.with_node_mut(id, |n| n.collision_layer = layer);
    }

    /// Whether the collision collaborator may put this node to sleep.
    #[must_use]
    pub fn sleep_eligible(&self, id: NodeId) -> bool {
        self.with_node(id, |n| n.sleep_eligible)
    }

    /// Sets sleep eligibility.
    pub fn set_sleep_eligible(&self, id: NodeId, eligible: bool) {
        self.with_node_mut(id, |n| n.sleep_eligible = eligible);
    }

    /// Gameplay scalar: graze value.
    #[must_use]
    pub fn graze(&self, id: NodeId) -> f32 {
        self.with_node(id, |n| n.graze)
    }

    /// Sets the graze value.
    pub fn set_graze(&self, id: NodeId, value: f32) {
        self.with_node_mut(id, |n| n.graze = value);
    }

    /// Gameplay scalar: power value.
    #[must_use]
    pub fn power(&self, id: NodeId) -> f32 {
        self.with_node(id, |n| n.power)
    }

    /// Sets the power value.
    pub fn set_power(&self, id: NodeId, value: f32) {
        self.with_node_mut(id, |n| n.power = value);
    }

    /// Gameplay scalar: health value.
    #[must_use]
    pub fn health(&self, id: NodeId) -> f32 {
        self.with_node(id, |n| n.health)
    }

    /// Sets the health value.
    pub fn set_health(&self, id: NodeId, value: f32) {
        self.with_node_mut(id, |n| n.health = value);
    }

    /// Extra render data, if it has been allocated.
    #[must_use]
    pub fn extra(&self, id: NodeId) -> Option<ExtraData> {
        self.with_node(id, |n| n.extra.as_deref().copied())
    }

    /// Sets the tint color, allocating the extra data on first use.
    pub fn set_color(&self, id: NodeId, rgba: [f32; 4]) {
        self.with_node_mut(id, |n| n.extra.get_or_insert_with(Box::default).color = rgba);
    }

    /// Sets the custom vector, allocating the extra data on first use.
    pub fn set_custom(&self, id: NodeId, custom: [f32; 4]) {
        self.with_node_mut(id, |n| n.extra.get_or_insert_with(Box::default).custom = custom);
    }

    /// Releases the extra data; instance fields fall back to defaults.
    pub fn clear_extra(&self, id: NodeId) {
        let extra = self.with_node_mut(id, |n| n.extra.take());
        drop(extra);
    }

    /// Whether the node has become a cosmetic deletion effect.
    #[must_use]
    pub fn is_deletion_effect(&self, id: NodeId) -> bool {
        self.with_node(id, |n| n.deletion_effect)
    }

    // =========================================================================
    // Render association
    // =========================================================================

    /// Current bullet visual.
    #[must_use]
    pub fn bullet_render_id(&self, id: NodeId) -> Option<RenderId> {
        self.with_node(id, |n| n.bullet_render_id)
    }

    /// Moves the node to another bullet queue (or out of all of them).
    ///
    /// Safe to call from behaviors on worker threads.
    ///
    /// # Returns
    ///
    /// `false` if the target queue is full; the association is unchanged.
    pub fn set_bullet_render_id(&self, id: NodeId, render_id: Option<RenderId>) -> bool {
        let old = self.bullet_render_id(id);
        if old == render_id {
            return true;
        }
        if !self.bullets.reassign(id, old, render_id) {
            return false;
        }
        self.with_node_mut(id, |n| n.bullet_render_id = render_id);
        true
    }

    /// Current laser visual.
    #[must_use]
    pub fn laser_render_id(&self, id: NodeId) -> Option<RenderId> {
        self.with_node(id, |n| n.laser_render_id)
    }

    /// Moves the node to another laser queue (or out of all of them).
    ///
    /// The node's parent identifies its laser: register a laser's segments
    /// in chain order after attaching them.
    ///
    /// # Returns
    ///
    /// `false` if the target queue is full; the association is unchanged.
    pub fn set_laser_render_id(&self, id: NodeId, render_id: Option<RenderId>) -> bool {
        let (old, group) = self.with_node(id, |n| (n.laser_render_id, n.parent));
        if old == render_id {
            return true;
        }
        if !self.lasers.reassign(id, group, old, render_id) {
            return false;
        }
        self.with_node_mut(id, |n| n.laser_render_id = render_id);
        true
    }

    fn laser_id(&self, id: NodeId) -> RenderId {
        match self.laser_render_id(id) {
            Some(render_id) => render_id,
            None => panic!("node {} is not a laser segment", id.raw()),
        }
    }

    /// Chain tag of a laser segment.
    ///
    /// # Panics
    ///
    /// Panics if the node has no laser visual.
    #[must_use]
    pub fn laser_tag(&self, id: NodeId) -> LaserTag {
        self.lasers.tag(self.laser_id(id), id)
    }

    /// Whether the segment starts its laser.
    #[must_use]
    pub fn is_laser_head(&self, id: NodeId) -> bool {
        matches!(self.laser_tag(id), LaserTag::Head | LaserTag::Singleton)
    }

    /// Whether the segment ends its laser.
    #[must_use]
    pub fn is_laser_tail(&self, id: NodeId) -> bool {
        matches!(self.laser_tag(id), LaserTag::Tail | LaserTag::Singleton)
    }

    /// First segment of the laser `id` belongs to.
    #[must_use]
    pub fn laser_head_of(&self, id: NodeId) -> NodeId {
        self.lasers.head_of(self.laser_id(id), id)
    }

    /// Records a graze against the laser `id` belongs to.
    ///
    /// # Returns
    ///
    /// `true` only for the first graze of that laser this frame.
    pub fn new_graze_this_frame(&self, id: NodeId) -> bool {
        self.lasers.new_graze(self.laser_id(id), id, self.frame())
    }

    /// The render association the collision collaborator should test:
    /// the bullet visual if any (unless the node is a deletion effect),
    /// otherwise the laser visual.
    #[must_use]
    pub fn collision_target(&self, id: NodeId) -> Option<(RenderKind, RenderId)> {
        self.with_node(id, |n| match (n.bullet_render_id, n.laser_render_id) {
            (Some(bullet), _) if !n.deletion_effect => Some((RenderKind::Bullet, bullet)),
            (Some(_), _) => None,
            (None, Some(laser)) => Some((RenderKind::Laser, laser)),
            (None, None) => None,
        })
    }

    /// Collider metadata of a visual.
    #[must_use]
    pub fn collider(&self, kind: RenderKind, id: RenderId) -> Option<Collider> {
        self.catalog.record(kind, id).map(|r| r.def.collider)
    }

    // =========================================================================
    // Frame
    // =========================================================================

    /// Runs one full frame: behaviors of every root live at frame start,
    /// the deletion post-pass, then instance buffer population.
    pub fn step_frame(&self, step: f32) -> FrameStats {
        let frame = self.advance_frame();
        let _span = tracing::trace_span!("step_frame", frame).entered();

        let (roots, visited) = self.execute_roots(step);
        let (destroyed, effects) = self.flush_deletions();
        self.populate_buffers();

        FrameStats {
            frame,
            roots,
            visited,
            destroyed,
            effects,
            live: self.live_count(),
        }
    }

    /// Rebuilds every bullet and laser instance buffer from cached world
    /// transforms. Call once per frame after the deletion post-pass.
    pub fn populate_buffers(&self) {
        let _span = tracing::trace_span!("populate_buffers").entered();
        let cutoff = self.config.parallel_cutoff as usize;
        self.install(|| {
            self.bullets.populate(self, cutoff);
            self.lasers.populate(self, cutoff);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::InstanceBuffer;
    use crate::test_support::{catalog, kernel};

    #[test]
    fn test_kernel_is_sync() {
        fn assert_sync<T: Sync + Send>() {}
        assert_sync::<Kernel>();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = KernelConfig {
            arena_slots: 1,
            ..KernelConfig::default()
        };
        assert!(Kernel::new(config, VisualCatalog::default()).is_err());
    }

    #[test]
    fn test_scalars_and_extra() {
        let k = kernel(8);
        let id = k.allocate_one();
        k.set_graze(id, 1.0);
        k.set_power(id, 2.0);
        k.set_health(id, 3.0);
        k.set_collision_layer(id, 4);
        k.set_sleep_eligible(id, true);
        assert_eq!((k.graze(id), k.power(id), k.health(id)), (1.0, 2.0, 3.0));
        assert_eq!(k.collision_layer(id), 4);
        assert!(k.sleep_eligible(id));

        assert!(k.extra(id).is_none());
        k.set_custom(id, [1.0, 2.0, 3.0, 4.0]);
        let extra = k.extra(id).unwrap();
        assert_eq!(extra.color, [1.0; 4]);
        assert_eq!(extra.custom, [1.0, 2.0, 3.0, 4.0]);
        k.clear_extra(id);
        assert!(k.extra(id).is_none());
    }

    #[test]
    fn test_bullet_takes_collision_precedence() {
        let k = kernel(8);
        let id = k.allocate_one();
        assert_eq!(k.collision_target(id), None);

        let beam = RenderId::new(0);
        let orb = RenderId::new(0);
        assert!(k.set_laser_render_id(id, Some(beam)));
        assert_eq!(k.collision_target(id), Some((RenderKind::Laser, beam)));
        assert!(k.set_bullet_render_id(id, Some(orb)));
        assert_eq!(k.collision_target(id), Some((RenderKind::Bullet, orb)));
        assert_eq!(
            k.collider(RenderKind::Bullet, orb),
            Some(Collider::Circle { radius: 4.0 })
        );
    }

    #[test]
    fn test_populate_writes_world_transforms() {
        let k = kernel(8);
        let parent = k.allocate_one();
        let child = k.allocate_one();
        k.set_child(parent, 0, child);
        k.set_local_transform(parent, Transform2D::from_translation(5.0, 0.0));
        k.set_local_transform(child, Transform2D::from_translation(0.0, 2.0));
        let orb = RenderId::new(0);
        k.set_bullet_render_id(child, Some(orb));
        k.set_color(child, [0.5, 0.5, 0.5, 1.0]);

        k.populate_buffers();
        let record = k.bullets().with_buffer(orb, |b| b.record(0).to_vec()).unwrap();
        assert_eq!(&record[..6], &[1.0, 0.0, 0.0, 1.0, 5.0, 2.0]);
        assert_eq!(record[6], 10.0); // z_order
        assert_eq!(record[7], 0.0);
        assert_eq!(&record[8..12], &[0.5, 0.5, 0.5, 1.0]);
    }

    #[test]
    fn test_emptied_buffer_dropped() {
        let k = kernel(8);
        let id = k.allocate_one();
        let orb = RenderId::new(0);
        k.set_bullet_render_id(id, Some(orb));
        k.populate_buffers();
        assert_eq!(k.bullets().with_buffer(orb, InstanceBuffer::live_count), Some(1));

        k.set_bullet_render_id(id, None);
        k.populate_buffers();
        assert!(k.bullets().with_buffer(orb, InstanceBuffer::live_count).is_none());
        assert_eq!(k.bullets().take_emptied(), vec![orb]);
    }

    #[test]
    fn test_catalog_lookup() {
        let k = Kernel::new(
            KernelConfig {
                arena_slots: 4,
                worker_threads: 1,
                ..KernelConfig::default()
            },
            catalog(),
        )
        .unwrap();
        let orb = k.catalog().id_of(RenderKind::Bullet, "orb").unwrap();
        let pop = k.catalog().id_of(RenderKind::Bullet, "orb_pop");
        assert_eq!(k.bullets().deletion_effect_of(orb), pop);
    }
}
