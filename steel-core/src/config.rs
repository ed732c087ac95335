//! Tuning of the chunk system, loaded from `steel_chunks.json5`.
use std::{fs, io, path::Path, thread};

use serde::Deserialize;
use thiserror::Error;

/// The configuration file written when none exists.
pub const DEFAULT_CONFIG: &str = r"{
    // Chunks loaded around each player.
    view_distance: 10,
    // Chunks ticking around each player.
    simulation_distance: 10,
    // Generation and light workers. Defaults to the available cores minus one.
    // worker_threads: 4,
    max_active_chunk_writes: 128,
    chunks_saved_eagerly_per_tick: 20,
    eager_save_cooldown_ms: 10000,
    chunks_saved_per_tick: 200,
    light_batch_size: 1000,
    player_ticket_throttle: 4,
    natural_spawn_radius: 8,
    unload_queue_backlog: 2000,
    save_enabled: true,
}
";

/// A configuration value out of its allowed range, or a file that could not be read.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A distance outside `2..=32`.
    #[error("{name} must be in range 2..=32, got {value}")]
    Distance {
        /// The offending option.
        name: &'static str,
        /// Its value.
        value: u8,
    },
    /// A count that must not be zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// The natural spawn radius does not fit the propagation range.
    #[error("natural_spawn_radius must be at most 32, got {0}")]
    SpawnRadius(u8),
    /// The file could not be read or written.
    #[error("failed to access the chunk config: {0}")]
    Io(#[from] io::Error),
    /// The file is not valid json5 for this configuration.
    #[error("failed to parse the chunk config: {0}")]
    Parse(#[from] serde_json5::Error),
}

fn default_view_distance() -> u8 {
    10
}

fn default_simulation_distance() -> u8 {
    10
}

fn default_worker_threads() -> usize {
    thread::available_parallelism()
        .map_or(1, |cores| cores.get().saturating_sub(1))
        .max(1)
}

fn default_max_active_chunk_writes() -> usize {
    128
}

fn default_chunks_saved_eagerly_per_tick() -> usize {
    20
}

fn default_eager_save_cooldown_ms() -> u64 {
    10_000
}

fn default_chunks_saved_per_tick() -> usize {
    200
}

fn default_light_batch_size() -> usize {
    1000
}

fn default_player_ticket_throttle() -> usize {
    4
}

fn default_natural_spawn_radius() -> u8 {
    8
}

fn default_unload_queue_backlog() -> usize {
    2000
}

fn default_save_enabled() -> bool {
    true
}

/// Tuning of the chunk system.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChunkSystemConfig {
    /// Radius of the player tickets, in chunks.
    #[serde(default = "default_view_distance")]
    pub view_distance: u8,
    /// Radius around players in which chunks tick.
    #[serde(default = "default_simulation_distance")]
    pub simulation_distance: u8,
    /// Threads of the generation and light worker pool.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Chunk writes that may be in flight before eager saving pauses.
    #[serde(default = "default_max_active_chunk_writes")]
    pub max_active_chunk_writes: usize,
    /// Unsaved chunks saved in the background per tick.
    #[serde(default = "default_chunks_saved_eagerly_per_tick")]
    pub chunks_saved_eagerly_per_tick: usize,
    /// Minimum time between two background saves of the same chunk.
    #[serde(default = "default_eager_save_cooldown_ms")]
    pub eager_save_cooldown_ms: u64,
    /// Chunks a non-flushing save writes per call.
    #[serde(default = "default_chunks_saved_per_tick")]
    pub chunks_saved_per_tick: usize,
    /// Light tasks per light engine batch.
    #[serde(default = "default_light_batch_size")]
    pub light_batch_size: usize,
    /// Player ticket positions processed at once.
    #[serde(default = "default_player_ticket_throttle")]
    pub player_ticket_throttle: usize,
    /// Radius around players in which chunks count for natural spawning.
    #[serde(default = "default_natural_spawn_radius")]
    pub natural_spawn_radius: u8,
    /// Queued unloads above which unloading continues even when the tick is out of time.
    #[serde(default = "default_unload_queue_backlog")]
    pub unload_queue_backlog: usize,
    /// Whether chunks are written to storage at all.
    #[serde(default = "default_save_enabled")]
    pub save_enabled: bool,
}

impl Default for ChunkSystemConfig {
    fn default() -> Self {
        Self {
            view_distance: default_view_distance(),
            simulation_distance: default_simulation_distance(),
            worker_threads: default_worker_threads(),
            max_active_chunk_writes: default_max_active_chunk_writes(),
            chunks_saved_eagerly_per_tick: default_chunks_saved_eagerly_per_tick(),
            eager_save_cooldown_ms: default_eager_save_cooldown_ms(),
            chunks_saved_per_tick: default_chunks_saved_per_tick(),
            light_batch_size: default_light_batch_size(),
            player_ticket_throttle: default_player_ticket_throttle(),
            natural_spawn_radius: default_natural_spawn_radius(),
            unload_queue_backlog: default_unload_queue_backlog(),
            save_enabled: default_save_enabled(),
        }
    }
}

impl ChunkSystemConfig {
    /// Parses a json5 document. Missing options take their defaults.
    pub fn from_json5(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json5::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config at `path`, writing the default file first if there is none.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_json5(&fs::read_to_string(path)?)
        } else {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, DEFAULT_CONFIG)?;
            log::info!("Wrote default chunk config to {}", path.display());
            Ok(Self::default())
        }
    }

    /// Checks every option against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("view_distance", self.view_distance),
            ("simulation_distance", self.simulation_distance),
        ] {
            if !(2..=32).contains(&value) {
                return Err(ConfigError::Distance { name, value });
            }
        }
        for (name, value) in [
            ("worker_threads", self.worker_threads),
            ("max_active_chunk_writes", self.max_active_chunk_writes),
            ("light_batch_size", self.light_batch_size),
            ("player_ticket_throttle", self.player_ticket_throttle),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.natural_spawn_radius > 32 {
            return Err(ConfigError::SpawnRadius(self.natural_spawn_radius));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_matches_defaults() {
        let parsed = ChunkSystemConfig::from_json5(DEFAULT_CONFIG).expect("default config parses");
        assert_eq!(parsed, ChunkSystemConfig::default());
    }

    #[test]
    fn test_missing_options_take_defaults() {
        let parsed =
            ChunkSystemConfig::from_json5("{ view_distance: 4, save_enabled: false }").expect("parses");
        assert_eq!(parsed.view_distance, 4);
        assert!(!parsed.save_enabled);
        assert_eq!(parsed.light_batch_size, 1000);
    }

    #[test]
    fn test_out_of_range_distance_is_rejected() {
        let error = ChunkSystemConfig::from_json5("{ simulation_distance: 40 }").unwrap_err();
        assert!(matches!(
            error,
            ConfigError::Distance {
                name: "simulation_distance",
                value: 40
            }
        ));
    }

    #[test]
    fn test_zero_counts_are_rejected() {
        let config = ChunkSystemConfig {
            player_ticket_throttle: 0,
            ..ChunkSystemConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero("player_ticket_throttle"))
        ));
    }
}
