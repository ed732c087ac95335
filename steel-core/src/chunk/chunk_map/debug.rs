//! Human readable dumps of the holder table.
use std::{fmt::Write as _, io, sync::Arc};

use steel_utils::ChunkPos;

use super::{ChunkMap, HolderTable};
use crate::chunk::{
    chunk_access::ChunkAccess,
    chunk_future::ChunkFuture,
    chunk_holder::ChunkHolder,
    chunk_result::ChunkLoadError,
};

/// The header of [`ChunkMap::dump_chunks`].
pub const DUMP_HEADER: &str = "x,z,level,in_memory,status,full_status,accessible_ready,ticking_ready,entity_ticking_ready,ticket,spawning,ticking_level";

/// Describes the state of a future: `done`, `unloaded`, `not completed` or `failed <reason>`.
#[must_use]
pub fn describe_future(future: &ChunkFuture<Arc<ChunkAccess>>) -> String {
    match future.get_now() {
        None => "not completed".to_owned(),
        Some(Ok(_)) => "done".to_owned(),
        Some(Err(ChunkLoadError::Unloaded)) => "unloaded".to_owned(),
        Some(Err(error)) => format!("failed {error}"),
    }
}

fn csv_field(value: String) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value
    }
}

fn describe_holders(out: &mut String, holders: &HolderTable) {
    let mut positions: Vec<&i64> = holders.keys().collect();
    positions.sort_unstable();
    for pos in positions {
        let holder = &holders[pos];
        let _ = write!(out, "  {} (level {}):", holder.pos(), holder.ticket_level());
        for (status, future) in holder.generation().all_futures() {
            let _ = write!(out, " {status}={}", describe_future(&future));
        }
        out.push('\n');
    }
}

impl ChunkMap {
    /// Ticket level, stages and tier of the holder at `pos`, or `null` if there is none.
    #[must_use]
    pub fn chunk_debug_data(&self, pos: ChunkPos) -> String {
        let Some(holder) = self.visible_chunk_if_present(pos.as_i64()) else {
            return "null".to_owned();
        };
        let mut data = format!("{}\n", holder.ticket_level());
        if let Some(status) = holder.generation().latest_status() {
            let _ = writeln!(data, "St: {} {status}", status.index());
        }
        if let Some(chunk) = holder.generation().latest_chunk() {
            let persisted = chunk.persisted_status();
            let _ = writeln!(data, "Ch: {} {persisted}", persisted.index());
        }
        let _ = write!(data, "{}", holder.full_status());
        data
    }

    /// Writes one CSV row per visible holder, headed by [`DUMP_HEADER`]. Main thread only.
    pub fn dump_chunks(&self, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "{DUMP_HEADER}")?;
        let visible = self.visible_chunk_map.load();
        let mut holders: Vec<&Arc<ChunkHolder>> = visible.values().collect();
        holders.sort_unstable_by_key(|holder| (holder.pos().x(), holder.pos().z()));

        let distance_manager = self.distance_manager.lock();
        for holder in holders {
            let pos = holder.pos();
            let chunk = holder.generation().latest_chunk();
            let status = chunk
                .as_ref()
                .map(|chunk| chunk.persisted_status().to_string())
                .unwrap_or_default();
            let full_status = chunk
                .as_ref()
                .filter(|chunk| chunk.is_full())
                .map(|_| holder.full_status().to_string())
                .unwrap_or_default();
            writeln!(
                out,
                "{},{},{},{},{status},{full_status},{},{},{},{},{},{}",
                pos.x(),
                pos.z(),
                holder.ticket_level(),
                chunk.is_some(),
                csv_field(describe_future(&holder.full_chunk_future())),
                csv_field(describe_future(&holder.ticking_chunk_future())),
                csv_field(describe_future(&holder.entity_ticking_chunk_future())),
                csv_field(distance_manager.ticket_debug_string(pos)),
                distance_manager.has_players_nearby(pos),
                distance_manager.ticking_level(pos),
            )?;
        }
        Ok(())
    }

    /// Lists the futures of every holder, for fatal error reports.
    ///
    /// Tables that are locked right now are skipped rather than waited for.
    pub(super) fn future_diagnostic(&self) -> String {
        let mut diagnostic = String::from("Updating:\n");
        match self.updating_chunk_map.try_lock() {
            Some(updating) => describe_holders(&mut diagnostic, &updating),
            None => diagnostic.push_str("  <locked>\n"),
        }
        diagnostic.push_str("Visible:\n");
        describe_holders(&mut diagnostic, &self.visible_chunk_map.load());
        diagnostic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_future::Completable, chunk_result::ChunkResult};

    #[test]
    fn test_future_labels() {
        let pending: ChunkFuture<Arc<ChunkAccess>> = Completable::new();
        assert_eq!(describe_future(&pending), "not completed");

        let unloaded: ChunkFuture<Arc<ChunkAccess>> =
            Completable::completed(Err(ChunkLoadError::Unloaded));
        assert_eq!(describe_future(&unloaded), "unloaded");

        let failed: ChunkResult<Arc<ChunkAccess>> =
            Err(ChunkLoadError::Generation("noise exploded".to_owned()));
        let failed = Completable::completed(failed);
        assert!(describe_future(&failed).starts_with("failed "));
        assert!(describe_future(&failed).contains("noise exploded"));
    }

    #[test]
    fn test_csv_fields_with_commas_are_quoted() {
        assert_eq!(csv_field("done".to_owned()), "done");
        assert_eq!(
            csv_field("failed at [1, 2]".to_owned()),
            "\"failed at [1, 2]\""
        );
    }

    #[test]
    fn test_header_has_twelve_columns() {
        assert_eq!(DUMP_HEADER.split(',').count(), 12);
    }
}
