//! # Kernel Constants
//!
//! Fixed numeric contract between the kernel and behavior authors.
//!
//! Behavior implementations may assume these values for worst-case cost
//! reasoning. The kernel config can override the first two at startup.

// =============================================================================
// ARENA
// =============================================================================

/// Number of record slots in the entity arena.
///
/// One slot is always reserved so that `head == tail` means "empty",
/// leaving 262,143 usable entities.
pub const DEFAULT_ARENA_SLOTS: usize = 1 << 18;

// =============================================================================
// TRAVERSAL
// =============================================================================

/// Subtree size above which children are executed on the worker pool.
pub const DEFAULT_PARALLEL_CUTOFF: u32 = 256;

/// Seconds a deletion effect stays on screen before it frees itself.
pub const DEFAULT_DELETION_EFFECT_SECONDS: f32 = 0.25;

// =============================================================================
// INSTANCE RECORDS
// =============================================================================

/// Floats in every instance record before optional fields.
pub const BASE_STRIDE: usize = 8;

/// Floats added when a visual enables per-instance tint color.
pub const COLOR_FIELDS: usize = 4;

/// Floats added when a visual enables the custom shader vector.
pub const CUSTOM_FIELDS: usize = 4;
