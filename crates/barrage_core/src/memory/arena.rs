//! # Ring Arena
//!
//! One contiguous block of entity records used as a ring buffer.
//!
//! ```text
//!  tail                      head
//!   │                         │
//!   ▼                         ▼
//! [ L  L  .  L  .  .  L  L  ][ free ... free ][ reserved ]
//!         ▲     ▲  ▲
//!         interior holes: reclaimed only when a cursor reaches them
//! ```
//!
//! Allocation copies the template into the next `n` slots after `head`.
//! Freeing marks the slot dead and then compacts the two boundaries: the
//! tail walks forward and the head walks backward over dead slots. Holes in
//! the middle stay until a boundary reaches them.
//!
//! ## Thread Safety
//!
//! Each slot sits behind its own `parking_lot::Mutex`; the two cursors sit
//! behind one more. Callers never hold a slot lock while taking the cursor
//! lock, and never hold two slot locks at once.

use parking_lot::{Mutex, MutexGuard};

use super::node::{Node, NodeId, NodeRun};

/// Head/tail cursors of the ring.
#[derive(Clone, Copy, Debug, Default)]
struct RingCursors {
    /// Next slot to hand out.
    head: u32,
    /// Oldest slot that may still be live.
    tail: u32,
    /// Number of live records.
    live: usize,
}

/// Fixed-capacity ring storage of entity records.
///
/// # Capacity
///
/// With `N` slots, `N - 1` records can be live at once: `head == tail` is
/// reserved to mean "empty".
pub struct NodeArena {
    /// The record slots (pre-allocated).
    slots: Box<[Mutex<Node>]>,
    /// Ring cursors.
    cursors: Mutex<RingCursors>,
}

impl NodeArena {
    /// Creates an arena with `slot_count` record slots.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` is below 2 or does not fit below `u32::MAX`.
    #[must_use]
    pub fn new(slot_count: usize) -> Self {
        assert!(slot_count >= 2, "Arena needs at least two slots");
        assert!(
            slot_count < u32::MAX as usize,
            "Arena slot count must fit below u32::MAX"
        );

        let slots = (0..slot_count)
            .map(|_| Mutex::new(Node::vacant()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            cursors: Mutex::new(RingCursors::default()),
        }
    }

    /// Total record slots, including the reserved one.
    #[inline]
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Records that can be live at once.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Number of live records.
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.cursors.lock().live
    }

    /// Slots that can still be handed out before the head meets the tail.
    #[must_use]
    pub fn free_space(&self) -> usize {
        let cursors = *self.cursors.lock();
        self.free_between(cursors)
    }

    /// Slot the next allocation starts at.
    #[must_use]
    pub fn head(&self) -> NodeId {
        NodeId::new(self.cursors.lock().head)
    }

    /// Oldest slot that may still be live.
    #[must_use]
    pub fn tail(&self) -> NodeId {
        NodeId::new(self.cursors.lock().tail)
    }

    #[inline]
    fn free_between(&self, cursors: RingCursors) -> usize {
        let n = self.slots.len();
        let used = (cursors.head as usize + n - cursors.tail as usize) % n;
        n - 1 - used
    }

    #[inline]
    fn ring(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let ring = self.slots.len() as u32;
        ring
    }

    /// Allocates one record.
    ///
    /// # Returns
    ///
    /// The new node, or `NodeId::NULL` if the arena is full.
    #[inline]
    pub fn allocate_one(&self) -> NodeId {
        self.allocate_run(1).map_or(NodeId::NULL, |run| run.first())
    }

    /// Allocates `n` records contiguous in ring order.
    ///
    /// This is **O(n)**: each slot is overwritten with the template.
    ///
    /// # Returns
    ///
    /// The run, or `None` if fewer than `n` slots are free (or `n == 0`).
    /// The arena is unchanged on failure.
    pub fn allocate_run(&self, n: usize) -> Option<NodeRun> {
        let mut cursors = self.cursors.lock();
        let free = self.free_between(*cursors);
        if n == 0 || n > free {
            tracing::debug!(requested = n, free, "arena exhausted");
            return None;
        }

        let ring = self.ring();
        let first = cursors.head;
        for k in 0..n {
            #[allow(clippy::cast_possible_truncation)]
            let index = (first as usize + k) % ring as usize;
            *self.slots[index].lock() = Node::template();
        }

        #[allow(clippy::cast_possible_truncation)]
        let len = n as u32;
        cursors.head = (first + len) % ring;
        cursors.live += n;

        Some(NodeRun::new(first, len, ring))
    }

    /// Marks a record dead and compacts the ring boundaries.
    ///
    /// The caller has already released everything the record owns outside
    /// the arena (render association, tree links).
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range or not live.
    pub(crate) fn release(&self, id: NodeId) {
        let vacated = {
            let mut slot = self.lock_live(id, "release");
            std::mem::take(&mut *slot)
        };
        // Owned behaviors drop here, outside the slot lock.
        drop(vacated);

        let mut cursors = self.cursors.lock();
        cursors.live -= 1;
        self.advance_tail(&mut cursors);
        self.retract_head(&mut cursors);
        if cursors.head == cursors.tail {
            cursors.head = 0;
            cursors.tail = 0;
        }
    }

    /// Walks the tail forward over dead slots.
    fn advance_tail(&self, cursors: &mut RingCursors) {
        let ring = self.ring();
        while cursors.tail != cursors.head && !self.slots[cursors.tail as usize].lock().live {
            cursors.tail = (cursors.tail + 1) % ring;
        }
    }

    /// Walks the head backward over dead slots.
    fn retract_head(&self, cursors: &mut RingCursors) {
        let ring = self.ring();
        while cursors.head != cursors.tail {
            let prev = (cursors.head + ring - 1) % ring;
            if self.slots[prev as usize].lock().live {
                break;
            }
            cursors.head = prev;
        }
    }

    /// Checks if a node is live. False for `NULL` and out-of-range ids.
    #[inline]
    #[must_use]
    pub fn is_live(&self, id: NodeId) -> bool {
        self.slots.get(id.index()).is_some_and(|slot| slot.lock().live)
    }

    /// Locks a slot.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[inline]
    pub(crate) fn lock(&self, id: NodeId) -> MutexGuard<'_, Node> {
        match self.slots.get(id.index()) {
            Some(slot) => slot.lock(),
            None => panic!("node {} out of range ({} slots)", id.raw(), self.slots.len()),
        }
    }

    /// Locks a slot that must hold a live record.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range or the record is dead, naming `op`.
    #[inline]
    pub(crate) fn lock_live(&self, id: NodeId, op: &str) -> MutexGuard<'_, Node> {
        let guard = self.lock(id);
        assert!(guard.live, "{op}: node {} is not live", id.raw());
        guard
    }

    /// Live parentless records between tail and head, in ring order.
    #[must_use]
    pub fn roots(&self) -> Vec<NodeId> {
        let cursors = *self.cursors.lock();
        let ring = self.ring();
        let mut roots = Vec::new();
        let mut index = cursors.tail;
        while index != cursors.head {
            let slot = self.slots[index as usize].lock();
            if slot.live && slot.is_root() {
                roots.push(NodeId::new(index));
            }
            drop(slot);
            index = (index + 1) % ring;
        }
        roots
    }
}
