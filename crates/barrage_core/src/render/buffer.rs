//! Flat instance buffers for GPU upload.
//!
//! One buffer per non-empty render id. Storage grows in power-of-two size
//! classes and is reallocated only when the class changes, so a queue that
//! hovers around a size does not churn the allocator.

use rayon::prelude::*;

/// Per-render-id instance records, `stride` floats each.
///
/// The record right after the last live one is always zeroed: the renderer
/// uploads `live_count() + 1` records so the GPU never builds a bounding
/// volume from a buffer that ends on a real instance.
#[derive(Clone, Debug)]
pub struct InstanceBuffer {
    /// Backing storage, `size_class * stride` floats.
    data: Vec<f32>,
    /// Floats per record.
    stride: usize,
    /// Live records this frame.
    live: usize,
    /// Records the storage can hold (a power of two).
    size_class: usize,
}

impl InstanceBuffer {
    /// Creates an empty buffer for records of `stride` floats.
    #[must_use]
    pub fn new(stride: usize) -> Self {
        Self {
            data: Vec::new(),
            stride,
            live: 0,
            size_class: 0,
        }
    }

    /// Sizes the buffer for `live` records plus padding.
    ///
    /// # Returns
    ///
    /// `true` if the storage was reallocated.
    pub fn prepare(&mut self, live: usize) -> bool {
        let class = (live + 1).next_power_of_two();
        let reallocated = class != self.size_class;
        if reallocated {
            self.data = vec![0.0; class * self.stride];
            self.size_class = class;
        }
        self.live = live;
        let pad = live * self.stride;
        self.data[pad..pad + self.stride].fill(0.0);
        reallocated
    }

    /// Writes every live record with `fill(index, record)`.
    ///
    /// Above `cutoff` records the work is split into `cutoff`-sized index
    /// ranges on the current rayon pool.
    pub(crate) fn fill<F>(&mut self, cutoff: usize, fill: F)
    where
        F: Fn(usize, &mut [f32]) + Sync,
    {
        let stride = self.stride;
        let records = &mut self.data[..self.live * stride];
        if self.live > cutoff {
            records
                .par_chunks_mut(stride * cutoff)
                .enumerate()
                .for_each(|(chunk, slice)| {
                    for (k, record) in slice.chunks_exact_mut(stride).enumerate() {
                        fill(chunk * cutoff + k, record);
                    }
                });
        } else {
            for (index, record) in records.chunks_exact_mut(stride).enumerate() {
                fill(index, record);
            }
        }
    }

    /// Live records this frame.
    #[inline]
    #[must_use]
    pub const fn live_count(&self) -> usize {
        self.live
    }

    /// Floats per record.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Records the current storage can hold.
    #[inline]
    #[must_use]
    pub const fn capacity_instances(&self) -> usize {
        self.size_class
    }

    /// Live records plus the zeroed padding record.
    #[must_use]
    pub fn as_floats(&self) -> &[f32] {
        &self.data[..(self.live + 1) * self.stride]
    }

    /// `as_floats` as bytes for GPU upload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_floats())
    }

    /// One live record.
    ///
    /// # Panics
    ///
    /// Panics if `index >= live_count()`.
    #[must_use]
    pub fn record(&self, index: usize) -> &[f32] {
        assert!(index < self.live, "record {index} out of range {}", self.live);
        &self.data[index * self.stride..(index + 1) * self.stride]
    }
}
