//! Light propagation for the chunk system.
//!
//! [`LightEngine`] is the propagation core. [`ThreadedLevelLightEngine`] wraps one and feeds it
//! batches of pre and post update tasks through a chunk task dispatcher.
use std::sync::Arc;

use steel_utils::{BlockPos, ChunkPos, SectionPos};

mod section_light_engine;
pub mod threaded_level_light_engine;

pub use section_light_engine::SectionLightEngine;
pub use threaded_level_light_engine::{TaskType, ThreadedLevelLightEngine};

/// The two kinds of light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightLayer {
    /// Light coming from the sky.
    Sky,
    /// Light emitted by blocks.
    Block,
}

/// Notified with the chunk, layer and section y of every light section whose values changed.
pub type LightListener = Arc<dyn Fn(ChunkPos, LightLayer, i32) + Send + Sync>;

/// The propagation core of a light engine. Only ever driven by one thread at a time.
pub trait LightEngine: Send {
    /// Records whether the section at `pos` only contains air.
    fn update_section_status(&mut self, pos: SectionPos, has_only_air: bool);

    /// Queues the light sources of a chunk whose light was never computed.
    fn propagate_light_sources(&mut self, pos: ChunkPos);

    /// Enables or disables light for a chunk.
    fn set_light_enabled(&mut self, pos: ChunkPos, enabled: bool);

    /// Whether light data of a chunk is kept while its light is disabled.
    fn retain_data(&mut self, pos: ChunkPos, retain: bool);

    /// Queues a recheck of the light around a changed block.
    fn check_block(&mut self, pos: BlockPos);

    /// Runs every queued update. Returns the number of light sections that changed.
    fn run_light_updates(&mut self) -> usize;

    /// Whether updates are queued.
    fn has_light_work(&self) -> bool;
}
