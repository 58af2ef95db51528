//! # BARRAGE Shared
//!
//! Plain-data types used by the kernel and every collaborator that talks to
//! it (pattern authoring, collision, rendering).
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on:
//! - threading or locking crates
//! - any GPU or window-related crate
//!
//! If you need kernel state, put it in `barrage_core`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod math;

pub use constants::{
    BASE_STRIDE, COLOR_FIELDS, CUSTOM_FIELDS, DEFAULT_ARENA_SLOTS,
    DEFAULT_DELETION_EFFECT_SECONDS, DEFAULT_PARALLEL_CUTOFF,
};
pub use math::{Transform2D, Vec2};
