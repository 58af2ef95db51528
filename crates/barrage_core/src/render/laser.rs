//! Laser render registry.
//!
//! A laser is a chain of segment nodes sharing one parent, in registration
//! order. Each render id's queue keeps one chain per laser, with per-node
//! prev/next links, so a member's tag follows from its links:
//!
//! ```text
//! queue: [ H  M  M  T ][ S ][ H  T ]
//!          laser A      B    laser C
//! ```
//!
//! Members of different lasers may register in any interleaving; each joins
//! the tail of its own chain. Removal is an O(1) splice. The "last grazed
//! frame" stamp belongs to the chain, so it passes to the successor when
//! the head leaves. Chain position drives thickness/UV interpolation, so
//! populate flattens the chains into buffer order first and then fills by
//! position range.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

use super::buffer::InstanceBuffer;
use super::catalog::RenderRecord;
use super::RenderId;
use crate::kernel::Kernel;
use crate::memory::{ExtraData, NodeId};

/// Place of a member within its laser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaserTag {
    /// Laser of one segment.
    Singleton,
    /// First segment.
    Head,
    /// Interior segment.
    Mid,
    /// Last segment.
    Tail,
}

impl LaserTag {
    /// Numeric code written into instance records.
    #[must_use]
    pub const fn code(self) -> f32 {
        match self {
            Self::Singleton => 0.0,
            Self::Head => 1.0,
            Self::Mid => 2.0,
            Self::Tail => 3.0,
        }
    }
}

/// A node's place in its laser's chain.
#[derive(Clone, Copy, Debug)]
struct Link {
    /// Slot of the chain in its queue.
    chain: u32,
    prev: NodeId,
    next: NodeId,
}

impl Link {
    const fn tag(&self) -> LaserTag {
        match (self.prev.is_null(), self.next.is_null()) {
            (true, true) => LaserTag::Singleton,
            (true, false) => LaserTag::Head,
            (false, false) => LaserTag::Mid,
            (false, true) => LaserTag::Tail,
        }
    }
}

/// One laser: the members registered under the same parent.
#[derive(Clone, Copy, Debug)]
struct Chain {
    /// Shared parent, or null for a parentless segment (always alone).
    group: NodeId,
    head: NodeId,
    tail: NodeId,
    len: u32,
    graze_frame: u64,
}

const NEVER_GRAZED: u64 = u64::MAX;

/// Membership of one render id, grouped into chains.
#[derive(Default)]
struct LaserQueue {
    chains: Vec<Option<Chain>>,
    vacant: Vec<u32>,
    by_group: HashMap<NodeId, u32>,
    len: usize,
}

impl LaserQueue {
    fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.chains.iter().flatten()
    }

    fn chain(&self, index: u32) -> &Chain {
        match self.chains.get(index as usize).and_then(Option::as_ref) {
            Some(chain) => chain,
            None => panic!("laser chain {index} missing"),
        }
    }

    fn chain_mut(&mut self, index: u32) -> &mut Chain {
        match self.chains.get_mut(index as usize).and_then(Option::as_mut) {
            Some(chain) => chain,
            None => panic!("laser chain {index} missing"),
        }
    }

    fn open_chain(&mut self, group: NodeId, node: NodeId) -> u32 {
        let chain = Chain {
            group,
            head: node,
            tail: node,
            len: 1,
            graze_frame: NEVER_GRAZED,
        };
        let index = if let Some(index) = self.vacant.pop() {
            self.chains[index as usize] = Some(chain);
            index
        } else {
            self.chains.push(Some(chain));
            #[allow(clippy::cast_possible_truncation)]
            let index = (self.chains.len() - 1) as u32;
            index
        };
        if !group.is_null() {
            self.by_group.insert(group, index);
        }
        index
    }

    fn close_chain(&mut self, index: u32) {
        if let Some(chain) = self.chains[index as usize].take() {
            if !chain.group.is_null() {
                self.by_group.remove(&chain.group);
            }
            self.vacant.push(index);
        }
    }
}

/// One instance record's worth of chain data, in buffer order.
#[derive(Clone, Copy, Debug)]
struct Segment {
    node: NodeId,
    next: NodeId,
    tag: LaserTag,
    /// Position along the chain, 0 at the head and 1 at the tail.
    chain_t: f32,
}

struct LaserState {
    queues: Vec<Option<LaserQueue>>,
    links: Box<[Option<Link>]>,
    z_order: Vec<i32>,
    emptied: BTreeSet<RenderId>,
    buffers: Vec<Option<InstanceBuffer>>,
    /// Scratch: flattened chains, rebuilt during populate.
    segments: Vec<Segment>,
}

/// Membership queues and instance buffers for laser visuals.
pub struct LaserRegistry {
    records: Vec<RenderRecord>,
    max_members: usize,
    state: Mutex<LaserState>,
}

fn link_of(links: &[Option<Link>], node: NodeId) -> Link {
    match links.get(node.index()).copied().flatten() {
        Some(link) => link,
        None => panic!("node {} is not a laser member", node.raw()),
    }
}

fn link_mut(links: &mut [Option<Link>], node: NodeId) -> &mut Link {
    match links.get_mut(node.index()).and_then(Option::as_mut) {
        Some(link) => link,
        None => panic!("node {} is not a laser member", node.raw()),
    }
}

impl LaserRegistry {
    /// Creates a registry for the given catalog records.
    #[must_use]
    pub fn new(records: Vec<RenderRecord>, node_slots: usize, max_members: usize) -> Self {
        let ids = records.len();
        let state = LaserState {
            queues: (0..ids).map(|_| None).collect(),
            links: vec![None; node_slots].into_boxed_slice(),
            z_order: records.iter().map(|r| r.def.z_order).collect(),
            emptied: BTreeSet::new(),
            buffers: (0..ids).map(|_| None).collect(),
            segments: Vec::new(),
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
            "laser render id {} out of range ({} visuals)",
            id.index(),
            self.records.len()
        );
    }

    /// Moves `node` from `old` to `new` membership. `group` is the node's
    /// parent; the node joins the end of that parent's laser, or starts a
    /// new one.
    ///
    /// # Returns
    ///
    /// `false` if the `new` queue is full; membership is then unchanged.
    pub(crate) fn reassign(
        &self,
        node: NodeId,
        group: NodeId,
        old: Option<RenderId>,
        new: Option<RenderId>,
    ) -> bool {
        if let Some(id) = new {
            self.check_id(id);
        }
        let mut state = self.state.lock();
        if let Some(id) = new {
            let len = state.queues[id.index()].as_ref().map_or(0, |q| q.len);
            if len >= self.max_members {
                tracing::warn!(render_id = id.index(), len, "laser queue full");
                return false;
            }
        }
        if let Some(id) = old {
            Self::remove(&mut state, node, id);
        }
        if let Some(id) = new {
            Self::insert(&mut state, node, group, id);
        }
        true
    }

    fn insert(state: &mut LaserState, node: NodeId, group: NodeId, id: RenderId) {
        let slot = &mut state.queues[id.index()];
        if slot.is_none() {
            state.emptied.remove(&id);
        }
        let queue = slot.get_or_insert_with(LaserQueue::default);
        let joined = if group.is_null() {
            None
        } else {
            queue.by_group.get(&group).copied()
        };
        let (chain, prev) = match joined {
            Some(index) => {
                let chain = queue.chain_mut(index);
                let prev = std::mem::replace(&mut chain.tail, node);
                chain.len += 1;
                (index, prev)
            }
            None => (queue.open_chain(group, node), NodeId::NULL),
        };
        queue.len += 1;
        if !prev.is_null() {
            link_mut(&mut state.links, prev).next = node;
        }
        state.links[node.index()] = Some(Link {
            chain,
            prev,
            next: NodeId::NULL,
        });
    }

    fn remove(state: &mut LaserState, node: NodeId, id: RenderId) {
        let link = link_of(&state.links, node);
        state.links[node.index()] = None;
        let Some(queue) = state.queues[id.index()].as_mut() else {
            panic!("laser queue {} missing for node {}", id.index(), node.raw());
        };

        if !link.prev.is_null() {
            link_mut(&mut state.links, link.prev).next = link.next;
        }
        if !link.next.is_null() {
            link_mut(&mut state.links, link.next).prev = link.prev;
        }
        let chain = queue.chain_mut(link.chain);
        chain.len -= 1;
        if chain.head == node {
            chain.head = link.next;
        }
        if chain.tail == node {
            chain.tail = link.prev;
        }
        if chain.len == 0 {
            queue.close_chain(link.chain);
        }

        queue.len -= 1;
        if queue.len == 0 {
            state.queues[id.index()] = None;
            state.emptied.insert(id);
            tracing::debug!(render_id = id.index(), "laser queue emptied");
        }
    }

    fn queue<'a>(state: &'a LaserState, id: RenderId, node: NodeId) -> &'a LaserQueue {
        match state.queues.get(id.index()).and_then(Option::as_ref) {
            Some(queue) => queue,
            None => panic!("laser queue {} missing for node {}", id.index(), node.raw()),
        }
    }

    /// Tag of a member.
    #[must_use]
    pub(crate) fn tag(&self, id: RenderId, node: NodeId) -> LaserTag {
        let state = self.state.lock();
        assert!(
            state.queues.get(id.index()).is_some_and(Option::is_some),
            "laser queue {} missing for node {}",
            id.index(),
            node.raw()
        );
        link_of(&state.links, node).tag()
    }

    /// First member of the laser `node` belongs to.
    #[must_use]
    pub(crate) fn head_of(&self, id: RenderId, node: NodeId) -> NodeId {
        let state = self.state.lock();
        let chain = link_of(&state.links, node).chain;
        Self::queue(&state, id, node).chain(chain).head
    }

    /// Stamps the laser as grazed in `frame`.
    ///
    /// # Returns
    ///
    /// `true` only for the first call per laser per frame.
    pub(crate) fn new_graze(&self, id: RenderId, node: NodeId, frame: u64) -> bool {
        let mut state = self.state.lock();
        let chain = link_of(&state.links, node).chain;
        let Some(queue) = state.queues.get_mut(id.index()).and_then(Option::as_mut) else {
            panic!("laser queue {} missing for node {}", id.index(), node.raw());
        };
        let chain = queue.chain_mut(chain);
        if chain.graze_frame == frame {
            return false;
        }
        chain.graze_frame = frame;
        true
    }

    /// Catalog record of a render id.
    #[must_use]
    pub fn record(&self, id: RenderId) -> Option<&RenderRecord> {
        self.records.get(id.index())
    }

    /// Members in a render id's queue.
    #[must_use]
    pub fn member_count(&self, id: RenderId) -> usize {
        self.state.lock().queues.get(id.index()).and_then(Option::as_ref).map_or(0, |q| q.len)
    }

    /// Snapshot of a render id's members with tags, one laser after another
    /// in chain order.
    #[must_use]
    pub fn members(&self, id: RenderId) -> Vec<(NodeId, LaserTag)> {
        let state = self.state.lock();
        let Some(queue) = state.queues.get(id.index()).and_then(Option::as_ref) else {
            return Vec::new();
        };
        let mut segments = Vec::with_capacity(queue.len);
        flatten_chains(queue, &state.links, &mut segments);
        segments.into_iter().map(|s| (s.node, s.tag)).collect()
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
    /// Record: `tx ty next_tx next_ty width chain_t tag z_order [rgba] [custom]`.
    pub(crate) fn populate(&self, kernel: &Kernel, cutoff: usize) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for (index, record) in self.records.iter().enumerate() {
            let Some(queue) = state.queues[index].as_ref() else {
                state.buffers[index] = None;
                continue;
            };
            flatten_chains(queue, &state.links, &mut state.segments);
            let segments = &state.segments;

            #[allow(clippy::cast_precision_loss)]
            let z = state.z_order[index] as f32;
            let (color, custom) = (record.def.color, record.def.custom);
            let mesh_width = record.def.mesh.width;
            let buffer = state.buffers[index].get_or_insert_with(|| InstanceBuffer::new(record.stride));
            buffer.prepare(segments.len());
            buffer.fill(cutoff, |position, out| {
                let segment = segments[position];
                let world = kernel.world_transform(segment.node);
                let here = world.translation();
                let next = if segment.next.is_null() {
                    here
                } else {
                    kernel.world_transform(segment.next).translation()
                };
                let extra = kernel.with_node(segment.node, |n| {
                    n.extra.as_deref().copied().unwrap_or_default()
                });

                out[0] = here.x;
                out[1] = here.y;
                out[2] = next.x;
                out[3] = next.y;
                out[4] = mesh_width * world.x_axis_length();
                out[5] = segment.chain_t;
                out[6] = segment.tag.code();
                out[7] = z;
                write_optional_fields(out, extra, color, custom);
            });
        }
    }
}

/// Walks every chain from its head, in chain-slot order.
fn flatten_chains(queue: &LaserQueue, links: &[Option<Link>], out: &mut Vec<Segment>) {
    out.clear();
    for chain in queue.chains() {
        let span = chain.len.saturating_sub(1);
        let mut node = chain.head;
        let mut k = 0_u32;
        while !node.is_null() {
            let link = link_of(links, node);
            #[allow(clippy::cast_precision_loss)]
            let chain_t = if span == 0 { 0.0 } else { k as f32 / span as f32 };
            out.push(Segment {
                node,
                next: link.next,
                tag: link.tag(),
                chain_t,
            });
            node = link.next;
            k += 1;
        }
    }
}

fn write_optional_fields(out: &mut [f32], extra: ExtraData, color: bool, custom: bool) {
    let mut offset = 8;
    if color {
        out[offset..offset + 4].copy_from_slice(&extra.color);
        offset += 4;
    }
    if custom {
        out[offset..offset + 4].copy_from_slice(&extra.custom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{RenderKind, VisualCatalog, VisualDef};

    const BEAM: RenderId = RenderId::new(0);

    fn registry() -> LaserRegistry {
        let catalog = VisualCatalog::new(Vec::new(), vec![VisualDef::named("beam")]).unwrap();
        LaserRegistry::new(catalog.records(RenderKind::Laser).to_vec(), 32, 32)
    }

    fn chain(reg: &LaserRegistry, group: u32, nodes: std::ops::Range<u32>) {
        for n in nodes {
            assert!(reg.reassign(NodeId::new(n), NodeId::new(group), None, Some(BEAM)));
        }
    }

    fn tags(reg: &LaserRegistry) -> Vec<LaserTag> {
        reg.members(BEAM).into_iter().map(|(_, tag)| tag).collect()
    }

    #[test]
    fn test_chain_tags() {
        let reg = registry();
        chain(&reg, 20, 0..4);
        assert_eq!(
            tags(&reg),
            vec![LaserTag::Head, LaserTag::Mid, LaserTag::Mid, LaserTag::Tail]
        );
    }

    #[test]
    fn test_separate_lasers_do_not_merge() {
        let reg = registry();
        chain(&reg, 20, 0..2);
        chain(&reg, 21, 2..3);
        reg.reassign(NodeId::new(3), NodeId::NULL, None, Some(BEAM));
        reg.reassign(NodeId::new(4), NodeId::NULL, None, Some(BEAM));
        assert_eq!(
            tags(&reg),
            vec![
                LaserTag::Head,
                LaserTag::Tail,
                LaserTag::Singleton,
                LaserTag::Singleton,
                LaserTag::Singleton
            ]
        );
    }

    #[test]
    fn test_remove_tail_and_head_retags() {
        let reg = registry();
        chain(&reg, 20, 0..3);
        reg.reassign(NodeId::new(2), NodeId::new(20), Some(BEAM), None);
        assert_eq!(tags(&reg), vec![LaserTag::Head, LaserTag::Tail]);
        reg.reassign(NodeId::new(0), NodeId::new(20), Some(BEAM), None);
        assert_eq!(tags(&reg), vec![LaserTag::Singleton]);
        assert_eq!(reg.head_of(BEAM, NodeId::new(1)), NodeId::new(1));
    }

    #[test]
    fn test_graze_once_per_frame() {
        let reg = registry();
        chain(&reg, 20, 0..3);
        assert!(reg.new_graze(BEAM, NodeId::new(2), 7));
        assert!(!reg.new_graze(BEAM, NodeId::new(1), 7));
        assert!(reg.new_graze(BEAM, NodeId::new(0), 8));
    }

    #[test]
    fn test_graze_stamp_migrates_from_outgoing_head() {
        let reg = registry();
        chain(&reg, 20, 0..3);
        assert!(reg.new_graze(BEAM, NodeId::new(1), 7));
        reg.reassign(NodeId::new(0), NodeId::new(20), Some(BEAM), None);
        assert_eq!(reg.head_of(BEAM, NodeId::new(2)), NodeId::new(1));
        assert!(!reg.new_graze(BEAM, NodeId::new(2), 7));
    }

    #[test]
    fn test_chain_parameters() {
        let reg = registry();
        chain(&reg, 20, 0..3);
        chain(&reg, 21, 3..4);
        let state = reg.state.lock();
        let mut out = Vec::new();
        flatten_chains(state.queues[0].as_ref().unwrap(), &state.links, &mut out);
        let t: Vec<f32> = out.iter().map(|s| s.chain_t).collect();
        assert_eq!(t, vec![0.0, 0.5, 1.0, 0.0]);
        assert_eq!(out[1].next, NodeId::new(2));
        assert!(out[2].next.is_null());
    }

    #[test]
    fn test_interleaved_registration_keeps_lasers_whole() {
        let reg = registry();
        for k in 0..3 {
            assert!(reg.reassign(NodeId::new(k), NodeId::new(20), None, Some(BEAM)));
            assert!(reg.reassign(NodeId::new(10 + k), NodeId::new(21), None, Some(BEAM)));
        }
        let members = reg.members(BEAM);
        let nodes: Vec<u32> = members.iter().map(|(n, _)| n.raw()).collect();
        assert_eq!(nodes, vec![0, 1, 2, 10, 11, 12]);
        assert_eq!(
            tags(&reg),
            vec![
                LaserTag::Head,
                LaserTag::Mid,
                LaserTag::Tail,
                LaserTag::Head,
                LaserTag::Mid,
                LaserTag::Tail
            ]
        );
        assert_eq!(reg.head_of(BEAM, NodeId::new(2)), NodeId::new(0));
        assert_eq!(reg.head_of(BEAM, NodeId::new(12)), NodeId::new(10));

        assert!(reg.new_graze(BEAM, NodeId::new(2), 4));
        assert!(reg.new_graze(BEAM, NodeId::new(11), 4));
        assert!(!reg.new_graze(BEAM, NodeId::new(0), 4));
    }

    #[test]
    fn test_middle_splice_relinks_neighbours() {
        let reg = registry();
        chain(&reg, 20, 0..5);
        reg.reassign(NodeId::new(2), NodeId::new(20), Some(BEAM), None);
        let state = reg.state.lock();
        assert_eq!(link_of(&state.links, NodeId::new(1)).next, NodeId::new(3));
        assert_eq!(link_of(&state.links, NodeId::new(3)).prev, NodeId::new(1));
        assert!(state.links[2].is_none());
        drop(state);
        assert_eq!(reg.member_count(BEAM), 4);
        assert_eq!(reg.head_of(BEAM, NodeId::new(4)), NodeId::new(0));
    }

    #[test]
    fn test_emptied_chain_slot_reused() {
        let reg = registry();
        chain(&reg, 20, 0..2);
        chain(&reg, 21, 2..3);
        reg.reassign(NodeId::new(0), NodeId::new(20), Some(BEAM), None);
        reg.reassign(NodeId::new(1), NodeId::new(20), Some(BEAM), None);
        chain(&reg, 22, 3..5);
        let nodes: Vec<u32> = reg.members(BEAM).iter().map(|(n, _)| n.raw()).collect();
        assert_eq!(nodes, vec![3, 4, 2]);
        // Group 20 is gone, so a new segment under it starts a fresh laser.
        chain(&reg, 20, 5..6);
        assert_eq!(reg.tag(BEAM, NodeId::new(5)), LaserTag::Singleton);
        assert_eq!(reg.state.lock().queues[0].as_ref().unwrap().chains.len(), 3);
    }

    #[test]
    fn test_last_removal_empties_queue() {
        let reg = registry();
        chain(&reg, 20, 0..2);
        reg.reassign(NodeId::new(1), NodeId::new(20), Some(BEAM), None);
        reg.reassign(NodeId::new(0), NodeId::new(20), Some(BEAM), None);
        assert_eq!(reg.member_count(BEAM), 0);
        assert_eq!(reg.take_emptied(), vec![BEAM]);
        assert!(reg.members(BEAM).is_empty());
    }
}
