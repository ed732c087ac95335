//! # Steel Utils
//!
//! Shared position types, small math vectors and lock aliases used across the Steel crates.

pub mod locks;
pub mod math;
mod types;

pub use types::{BlockPos, BlockStateId, ChunkPos, SectionPos};
