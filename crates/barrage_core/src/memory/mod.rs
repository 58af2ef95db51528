//! # Memory Management
//!
//! The fixed-capacity entity arena and the record shape it stores.
//!
//! ## Design Philosophy
//!
//! All record slots are allocated once at startup. During gameplay:
//! - Entities reference each other by slot index only
//! - Allocation and free are O(1) per slot
//! - Running out of slots is expected and reported with a sentinel

mod arena;
mod node;

pub use arena::NodeArena;
pub(crate) use node::Node;
pub use node::{ExtraData, NodeId, NodeRun};
