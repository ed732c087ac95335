//! Spawn chunk generation with progress logging.
//!
//! During server startup, ticks the chunk system until the 7×7 Full area
//! around the spawn chunk is complete.

use std::time::{Duration, Instant};

use steel_core::chunk::ticket::TicketType;
use steel_utils::ChunkPos;

use crate::SteelServer;

/// Spawn chunk radius: chunks within this radius reach Full status.
pub const SPAWN_RADIUS: i32 = 3;
/// Number of chunks that must reach Full status (7×7).
pub const TOTAL_SPAWN_CHUNKS: usize = ((SPAWN_RADIUS * 2 + 1) * (SPAWN_RADIUS * 2 + 1)) as usize;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

fn spawn_area(center: ChunkPos) -> impl Iterator<Item = ChunkPos> {
    (-SPAWN_RADIUS..=SPAWN_RADIUS).flat_map(move |dz| {
        (-SPAWN_RADIUS..=SPAWN_RADIUS)
            .map(move |dx| ChunkPos::new(center.x() + dx, center.z() + dz))
    })
}

/// Ticks `server` until every chunk of the spawn area around `center` is full.
///
/// The spawn ticket stays, so the area remains loaded. Returns early if the server is cancelled.
pub fn generate_spawn_chunks(server: &SteelServer, center: ChunkPos) {
    log::info!("Preparing spawn area: {TOTAL_SPAWN_CHUNKS} chunks around chunk {center}");

    server
        .chunks
        .add_region_ticket(TicketType::Start, center, SPAWN_RADIUS as u8, 0);

    let start = Instant::now();
    let mut last_report = start;
    loop {
        server.tick();

        let completed = spawn_area(center)
            .filter(|pos| server.chunks.get_chunk_now(*pos).is_some())
            .count();
        if completed == TOTAL_SPAWN_CHUNKS {
            break;
        }
        if server.cancel_token.is_cancelled() {
            log::warn!("Spawn preparation cancelled at {completed}/{TOTAL_SPAWN_CHUNKS} chunks");
            return;
        }
        if last_report.elapsed() >= PROGRESS_INTERVAL {
            last_report = Instant::now();
            log::info!(
                "Preparing spawn area: {}%",
                completed * 100 / TOTAL_SPAWN_CHUNKS
            );
        }
    }

    log::info!(
        "Spawn area ready in {:.2}s ({} chunks loaded)",
        start.elapsed().as_secs_f64(),
        server.chunks.loaded_chunk_count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_area_covers_seven_by_seven() {
        let area: Vec<ChunkPos> = spawn_area(ChunkPos::new(10, -4)).collect();
        assert_eq!(area.len(), TOTAL_SPAWN_CHUNKS);
        assert!(area.contains(&ChunkPos::new(7, -7)));
        assert!(area.contains(&ChunkPos::new(13, -1)));
        assert!(!area.contains(&ChunkPos::new(14, -4)));
    }
}
