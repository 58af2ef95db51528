//! Bullet render registry.
//!
//! Unordered membership queues: removal swaps the last member into the hole,
//! so membership changes are O(1) in both directions.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use super::buffer::InstanceBuffer;
use super::catalog::RenderRecord;
use super::{RenderId, NOT_QUEUED};
use crate::kernel::Kernel;
use crate::memory::{ExtraData, NodeId};

/// Queue state, guarded by the registry lock.
struct BulletState {
    /// Members per render id. `None` until first use and after emptying.
    queues: Vec<Option<Vec<NodeId>>>,
    /// Position of each node in its queue.
    slot_of: Box<[u32]>,
    /// Runtime draw order per render id.
    z_order: Vec<i32>,
    /// Ids that emptied since the renderer last asked.
    emptied: BTreeSet<RenderId>,
    /// Instance buffers per render id.
    buffers: Vec<Option<InstanceBuffer>>,
}

/// Membership queues and instance buffers for bullet visuals.
pub struct BulletRegistry {
    records: Vec<RenderRecord>,
    max_members: usize,
    state: Mutex<BulletState>,
}

impl BulletRegistry {
    /// Creates a registry for the given catalog records.
    #[must_use]
    pub fn new(records: Vec<RenderRecord>, node_slots: usize, max_members: usize) -> Self {
        let ids = records.len();
        let state = BulletState {
            queues: (0..ids).map(|_| None).collect(),
            slot_of: vec![NOT_QUEUED; node_slots].into_boxed_slice(),
            z_order: records.iter().map(|r| r.def.z_order).collect(),
            emptied: BTreeSet::new(),
            buffers: (0..ids).map(|_| None).collect(),
        };
        Self {
            records,
            max_members,
            state: Mutex::new(state),
        }
    }

    fn check_id(&self, id: RenderId) {
        assert!(
            id.index() < self.records.len(),
            "bullet render id {} out of range ({} visuals)",
            id.index(),
            self.records.len()
        );
    }

    /// Moves `node` from `old` to `new` membership.
    ///
    /// # Returns
    ///
    /// `false` if the `new` queue is full; membership is then unchanged.
    pub(crate) fn reassign(&self, node: NodeId, old: Option<RenderId>, new: Option<RenderId>) -> bool {
        if let Some(id) = new {
            self.check_id(id);
        }
        let mut state = self.state.lock();
        if let Some(id) = new {
            let len = state.queues[id.index()].as_ref().map_or(0, Vec::len);
            if len >= self.max_members {
                tracing::warn!(render_id = id.index(), len, "bullet queue full");
                return false;
            }
        }
        if let Some(id) = old {
            Self::remove(&mut state, node, id);
        }
        if let Some(id) = new {
            Self::insert(&mut state, node, id);
        }
        true
    }

    fn insert(state: &mut BulletState, node: NodeId, id: RenderId) {
        let slot = &mut state.queues[id.index()];
        if slot.is_none() {
            state.emptied.remove(&id);
        }
        let queue = slot.get_or_insert_with(Vec::new);
        #[allow(clippy::cast_possible_truncation)]
        let position = queue.len() as u32;
        queue.push(node);
        state.slot_of[node.index()] = position;
    }

    fn remove(state: &mut BulletState, node: NodeId, id: RenderId) {
        let position = std::mem::replace(&mut state.slot_of[node.index()], NOT_QUEUED);
        assert_ne!(position, NOT_QUEUED, "node {} is not queued", node.raw());
        let Some(queue) = state.queues[id.index()].as_mut() else {
            panic!("bullet queue {} missing for node {}", id.index(), node.raw());
        };
        queue.swap_remove(position as usize);
        if let Some(&moved) = queue.get(position as usize) {
            state.slot_of[moved.index()] = position;
        }
        if queue.is_empty() {
            state.queues[id.index()] = None;
            state.emptied.insert(id);
            tracing::debug!(render_id = id.index(), "bullet queue emptied");
        }
    }

    /// Catalog record of a render id.
    #[must_use]
    pub fn record(&self, id: RenderId) -> Option<&RenderRecord> {
        self.records.get(id.index())
    }

    /// Deletion-effect visual of a render id, if it declares one.
    #[must_use]
    pub fn deletion_effect_of(&self, id: RenderId) -> Option<RenderId> {
        self.record(id).and_then(|r| r.deletion_effect)
    }

    /// Members in a render id's queue.
    #[must_use]
    pub fn member_count(&self, id: RenderId) -> usize {
        self.state.lock().queues.get(id.index()).and_then(Option::as_ref).map_or(0, Vec::len)
    }

    /// Snapshot of a render id's queue, in queue order.
    #[must_use]
    pub fn members(&self, id: RenderId) -> Vec<NodeId> {
        self.state
            .lock()
            .queues
            .get(id.index())
            .and_then(Option::as_ref)
            .cloned()
            .unwrap_or_default()
    }

    /// Current draw order of a render id.
    #[must_use]
    pub fn z_order(&self, id: RenderId) -> i32 {
        self.check_id(id);
        self.state.lock().z_order[id.index()]
    }

    /// Changes the draw order of a render id.
    pub fn set_z_order(&self, id: RenderId, z_order: i32) {
        self.check_id(id);
        self.state.lock().z_order[id.index()] = z_order;
    }

    /// Render ids that emptied since the last call and were not refilled.
    pub fn take_emptied(&self) -> Vec<RenderId> {
        std::mem::take(&mut self.state.lock().emptied).into_iter().collect()
    }

    /// Runs `f` on a render id's buffer, if it has one this frame.
    pub fn with_buffer<R>(&self, id: RenderId, f: impl FnOnce(&InstanceBuffer) -> R) -> Option<R> {
        let state = self.state.lock();
        state.buffers.get(id.index()).and_then(Option::as_ref).map(f)
    }

    /// Runs `f` on every populated buffer in render-id order.
    pub fn for_each_buffer(&self, mut f: impl FnMut(RenderId, &InstanceBuffer)) {
        let state = self.state.lock();
        for (index, buffer) in state.buffers.iter().enumerate() {
            if let Some(buffer) = buffer {
                #[allow(clippy::cast_possible_truncation)]
                f(RenderId::new(index as u32), buffer);
            }
        }
    }

    /// Rebuilds every instance buffer from the settled tree.
    ///
    /// Record: `a b c d tx ty z_order effect_flag [rgba] [custom]`.
    pub(crate) fn populate(&self, kernel: &Kernel, cutoff: usize) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for (index, record) in self.records.iter().enumerate() {
            let Some(queue) = state.queues[index].as_ref() else {
                state.buffers[index] = None;
                continue;
            };
            #[allow(clippy::cast_precision_loss)]
            let z = state.z_order[index] as f32;
            let (color, custom) = (record.def.color, record.def.custom);
            let buffer = state.buffers[index].get_or_insert_with(|| InstanceBuffer::new(record.stride));
            buffer.prepare(queue.len());
            buffer.fill(cutoff, |position, out| {
                let node = queue[position];
                let world = kernel.world_transform(node);
                let (effect, extra) = kernel.with_node(node, |n| {
                    (n.deletion_effect, n.extra.as_deref().copied().unwrap_or_default())
                });
                write_bullet_record(out, world.to_array(), z, effect, extra, color, custom);
            });
        }
    }
}

fn write_bullet_record(
    out: &mut [f32],
    transform: [f32; 6],
    z: f32,
    effect: bool,
    extra: ExtraData,
    color: bool,
    custom: bool,
) {
    out[..6].copy_from_slice(&transform);
    out[6] = z;
    out[7] = if effect { 1.0 } else { 0.0 };
    let mut offset = 8;
    if color {
        out[offset..offset + 4].copy_from_slice(&extra.color);
        offset += 4;
    }
    if custom {
        out[offset..offset + 4].copy_from_slice(&extra.custom);
    }
}
