//! The distance manager turns tickets and player positions into chunk levels.
//!
//! Four trackers run the same propagation over different sources:
//! - the ticket tracker gives every position its ticket level, which decides what a holder may load,
//! - the natural spawn tracker counts chunks close enough to a player for mob spawning,
//! - the ticking tracker decides which chunks tick blocks and entities,
//! - the player ticket tracker places view distance tickets around players. Those tickets are
//!   applied through the throttled ticket dispatcher so a moving player does not flood the queue.
use std::{mem, sync::Arc};

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use steel_utils::ChunkPos;

use crate::chunk::{
    chunk_holder::ChunkHolder,
    chunk_level::ChunkLevel,
    chunk_tracker::ChunkTracker,
    ticket::{Ticket, TicketType},
};

/// Level of the tickets placed around players and force loaded chunks.
pub const PLAYER_TICKET_LEVEL: u8 = ChunkLevel::ENTITY_TICKING_LEVEL;
/// Level of force loaded chunks.
pub const FORCED_TICKET_LEVEL: u8 = ChunkLevel::ENTITY_TICKING_LEVEL;
/// The largest supported view distance.
pub const MAX_VIEW_DISTANCE: u8 = 32;

const TICKING_LEVEL_COUNT: u8 = ChunkLevel::FULL_STATUS_LEVEL + 1;
const PLAYER_QUEUE_LEVEL_DEFAULT: u8 = MAX_VIEW_DISTANCE + 2;

/// Identifies a player for chunk interest tracking.
pub type PlayerId = u64;

type TicketList = SmallVec<[Ticket; 2]>;

/// Receives ticket level changes and owns the holders they create.
pub trait ChunkLevelSink {
    /// Applies `new_level` to the holder at `pos`, creating one if the position starts loading.
    fn update_chunk_scheduling(
        &self,
        pos: i64,
        new_level: u8,
        old_level: u8,
    ) -> Option<Arc<ChunkHolder>>;
}

/// Whether a player view ticket should be placed or taken away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerTicketChange {
    /// Schedule adding a player ticket.
    Add,
    /// Remove the player ticket.
    Remove,
}

/// A change of the player ticket tracker the ticket dispatcher has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerTicketUpdate {
    /// The position.
    pub pos: i64,
    /// The new distance level from the closest player.
    pub level: u8,
    /// The previous queue level if the position has to be re-prioritized.
    pub old_queue_level: Option<u8>,
    /// What to do with the ticket at this position.
    pub change: Option<PlayerTicketChange>,
}

/// Everything a pass of [`DistanceManager::run_all_updates`] produced.
#[derive(Default)]
pub struct DistanceUpdate {
    /// Holders whose ticket level changed, in the order they changed.
    pub holders: Vec<Arc<ChunkHolder>>,
    /// Player ticket work for the ticket dispatcher.
    pub player_tickets: Vec<PlayerTicketUpdate>,
    /// Positions whose player ticket was applied and whose dispatcher slot can be released once they tick.
    pub tickets_to_release: Vec<i64>,
}

impl DistanceUpdate {
    /// Returns true if the pass changed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty() && self.player_tickets.is_empty() && self.tickets_to_release.is_empty()
    }
}

fn first_level(tickets: &FxHashMap<i64, TicketList>, pos: i64) -> u8 {
    tickets
        .get(&pos)
        .and_then(|list| list.first())
        .map_or(u8::MAX, |ticket| ticket.level)
}

fn insert_ticket(list: &mut TicketList, mut ticket: Ticket, tick: u64) {
    match list.binary_search(&ticket) {
        Ok(index) => list[index].set_created_tick(tick),
        Err(index) => {
            ticket.set_created_tick(tick);
            list.insert(index, ticket);
        }
    }
}

/// Manages tickets and the levels derived from them. Only used from the main thread.
pub struct DistanceManager {
    tickets: FxHashMap<i64, TicketList>,
    ticket_tracker: ChunkTracker,
    ticking_tickets: FxHashMap<i64, TicketList>,
    ticking_tracker: ChunkTracker,
    natural_spawn_tracker: ChunkTracker,
    player_ticket_tracker: ChunkTracker,
    player_view_distance: u8,
    player_queue_levels: FxHashMap<i64, u8>,
    players_per_chunk: FxHashMap<i64, FxHashSet<PlayerId>>,
    pending_player_tickets: Vec<PlayerTicketUpdate>,
    tickets_to_release: FxHashSet<i64>,
    ticket_tick_counter: u64,
    simulation_distance: u8,
}

impl DistanceManager {
    /// Creates an empty distance manager.
    #[must_use]
    pub fn new(natural_spawn_radius: u8, simulation_distance: u8) -> Self {
        Self {
            tickets: FxHashMap::default(),
            ticket_tracker: ChunkTracker::new(ChunkLevel::UNLOADED_LEVEL + 1),
            ticking_tickets: FxHashMap::default(),
            ticking_tracker: ChunkTracker::new(TICKING_LEVEL_COUNT + 1),
            natural_spawn_tracker: ChunkTracker::new(natural_spawn_radius + 2),
            player_ticket_tracker: ChunkTracker::new(MAX_VIEW_DISTANCE + 2),
            player_view_distance: 0,
            player_queue_levels: FxHashMap::default(),
            players_per_chunk: FxHashMap::default(),
            pending_player_tickets: Vec::new(),
            tickets_to_release: FxHashSet::default(),
            ticket_tick_counter: 0,
            simulation_distance,
        }
    }

    /// Adds a ticket. Adding a ticket that already exists only refreshes its timeout.
    pub fn add_ticket(&mut self, pos: ChunkPos, ticket_type: TicketType, level: u8, key: u64) {
        self.add_ticket_internal(pos.as_i64(), Ticket::new(ticket_type, level, key));
    }

    /// Removes a ticket. Removing a ticket that does not exist does nothing.
    pub fn remove_ticket(&mut self, pos: ChunkPos, ticket_type: TicketType, level: u8, key: u64) {
        self.remove_ticket_internal(pos.as_i64(), Ticket::new(ticket_type, level, key));
    }

    /// Adds a ticket keeping every chunk within `distance` of `pos` at least full.
    pub fn add_region_ticket(
        &mut self,
        ticket_type: TicketType,
        pos: ChunkPos,
        distance: u8,
        key: u64,
    ) {
        let ticket = Ticket::new(
            ticket_type,
            ChunkLevel::FULL_STATUS_LEVEL.saturating_sub(distance),
            key,
        );
        self.add_ticket_internal(pos.as_i64(), ticket);
        self.add_ticking_ticket(pos.as_i64(), ticket);
    }

    /// Removes a ticket added with [`DistanceManager::add_region_ticket`].
    pub fn remove_region_ticket(
        &mut self,
        ticket_type: TicketType,
        pos: ChunkPos,
        distance: u8,
        key: u64,
    ) {
        let ticket = Ticket::new(
            ticket_type,
            ChunkLevel::FULL_STATUS_LEVEL.saturating_sub(distance),
            key,
        );
        self.remove_ticket_internal(pos.as_i64(), ticket);
        self.remove_ticking_ticket(pos.as_i64(), ticket);
    }

    /// Force loads or releases a chunk.
    pub fn update_chunk_forced(&mut self, pos: ChunkPos, add: bool) {
        let key = pos.as_i64();
        let ticket = Ticket::new(TicketType::Forced, FORCED_TICKET_LEVEL, key as u64);
        if add {
            self.add_ticket_internal(key, ticket);
            self.add_ticking_ticket(key, ticket);
        } else {
            self.remove_ticket_internal(key, ticket);
            self.remove_ticking_ticket(key, ticket);
        }
    }

    fn add_ticket_internal(&mut self, pos: i64, ticket: Ticket) {
        let old_level = first_level(&self.tickets, pos);
        insert_ticket(
            self.tickets.entry(pos).or_default(),
            ticket,
            self.ticket_tick_counter,
        );
        if ticket.level < old_level {
            let tickets = &self.tickets;
            self.ticket_tracker
                .update(pos, ticket.level, true, &|p| first_level(tickets, p));
        }
    }

    fn remove_ticket_internal(&mut self, pos: i64, ticket: Ticket) {
        let Some(list) = self.tickets.get_mut(&pos) else {
            return;
        };
        let Ok(index) = list.binary_search(&ticket) else {
            return;
        };
        list.remove(index);
        if list.is_empty() {
            self.tickets.remove(&pos);
        }

        let tickets = &self.tickets;
        let new_level = first_level(tickets, pos);
        self.ticket_tracker
            .update(pos, new_level, false, &|p| first_level(tickets, p));
    }

    fn add_ticking_ticket(&mut self, pos: i64, ticket: Ticket) {
        let old_level = first_level(&self.ticking_tickets, pos);
        insert_ticket(
            self.ticking_tickets.entry(pos).or_default(),
            ticket,
            self.ticket_tick_counter,
        );
        if ticket.level < old_level {
            let tickets = &self.ticking_tickets;
            self.ticking_tracker
                .update(pos, ticket.level, true, &|p| first_level(tickets, p));
        }
    }

    fn remove_ticking_ticket(&mut self, pos: i64, ticket: Ticket) {
        let Some(list) = self.ticking_tickets.get_mut(&pos) else {
            return;
        };
        let Ok(index) = list.binary_search(&ticket) else {
            return;
        };
        list.remove(index);
        if list.is_empty() {
            self.ticking_tickets.remove(&pos);
        }

        let tickets = &self.ticking_tickets;
        let new_level = first_level(tickets, pos);
        self.ticking_tracker
            .update(pos, new_level, false, &|p| first_level(tickets, p));
    }

    /// The level of the ticking tickets around players for the current simulation distance.
    #[must_use]
    pub const fn player_ticking_ticket_level(&self) -> u8 {
        ChunkLevel::ENTITY_TICKING_LEVEL.saturating_sub(self.simulation_distance)
    }

    /// Registers a player standing in `pos`.
    pub fn add_player(&mut self, pos: ChunkPos, player: PlayerId) {
        let key = pos.as_i64();
        self.players_per_chunk.entry(key).or_default().insert(player);

        let players = &self.players_per_chunk;
        let source = |p: i64| if players.contains_key(&p) { 0 } else { u8::MAX };
        self.natural_spawn_tracker.update(key, 0, true, &source);
        self.player_ticket_tracker.update(key, 0, true, &source);

        let level = self.player_ticking_ticket_level();
        self.add_ticking_ticket(key, Ticket::new(TicketType::Player, level, key as u64));
    }

    /// Unregisters a player from `pos`. Unknown players are ignored.
    pub fn remove_player(&mut self, pos: ChunkPos, player: PlayerId) {
        let key = pos.as_i64();
        let Some(players) = self.players_per_chunk.get_mut(&key) else {
            return;
        };
        if !players.remove(&player) || !players.is_empty() {
            return;
        }
        self.players_per_chunk.remove(&key);

        let players = &self.players_per_chunk;
        let source = |p: i64| if players.contains_key(&p) { 0 } else { u8::MAX };
        self.natural_spawn_tracker.update(key, u8::MAX, false, &source);
        self.player_ticket_tracker.update(key, u8::MAX, false, &source);

        let level = self.player_ticking_ticket_level();
        self.remove_ticking_ticket(key, Ticket::new(TicketType::Player, level, key as u64));
    }

    /// Moves a player between chunks.
    pub fn move_player(&mut self, from: ChunkPos, to: ChunkPos, player: PlayerId) {
        if from != to {
            self.remove_player(from, player);
            self.add_player(to, player);
        }
    }

    /// Changes the view distance the player tickets cover.
    pub fn update_player_tickets(&mut self, view_distance: u8) {
        let view_distance = view_distance.min(MAX_VIEW_DISTANCE);
        let old_view_distance = self.player_view_distance;
        for (pos, level) in self.player_ticket_tracker.levels() {
            let had_ticket = level <= old_view_distance;
            let has_ticket = level <= view_distance;
            if had_ticket != has_ticket {
                self.pending_player_tickets.push(PlayerTicketUpdate {
                    pos,
                    level,
                    old_queue_level: None,
                    change: Some(if has_ticket {
                        PlayerTicketChange::Add
                    } else {
                        PlayerTicketChange::Remove
                    }),
                });
            }
        }
        self.player_view_distance = view_distance;
    }

    /// Changes the simulation distance and re-levels the ticking tickets around players.
    pub fn update_simulation_distance(&mut self, simulation_distance: u8) {
        if simulation_distance == self.simulation_distance {
            return;
        }
        let old_level = self.player_ticking_ticket_level();
        self.simulation_distance = simulation_distance;
        let new_level = self.player_ticking_ticket_level();

        let positions: Vec<i64> = self.players_per_chunk.keys().copied().collect();
        for pos in positions {
            self.remove_ticking_ticket(pos, Ticket::new(TicketType::Player, old_level, pos as u64));
            self.add_ticking_ticket(pos, Ticket::new(TicketType::Player, new_level, pos as u64));
        }
    }

    /// Applies a player ticket the ticket dispatcher admitted.
    ///
    /// Returns false if the position left the view distance in the meantime, in which case the
    /// caller must release the dispatcher slot itself.
    pub fn apply_player_ticket(&mut self, pos: i64) -> bool {
        if self.player_ticket_tracker.level(pos) > self.player_view_distance {
            return false;
        }
        self.add_ticket_internal(pos, Ticket::new(TicketType::Player, PLAYER_TICKET_LEVEL, pos as u64));
        self.tickets_to_release.insert(pos);
        true
    }

    /// Removes the player ticket at `pos`.
    pub fn remove_player_ticket(&mut self, pos: i64) {
        self.remove_ticket_internal(pos, Ticket::new(TicketType::Player, PLAYER_TICKET_LEVEL, pos as u64));
    }

    /// Expires timed out tickets. Called once per tick.
    pub fn purge_stale_tickets(&mut self) {
        self.ticket_tick_counter += 1;
        let tick = self.ticket_tick_counter;

        let mut changed = Vec::new();
        self.tickets.retain(|pos, list| {
            let before = list.len();
            list.retain(|ticket| !ticket.timed_out(tick));
            if list.len() != before {
                changed.push(*pos);
            }
            !list.is_empty()
        });
        let tickets = &self.tickets;
        for pos in changed {
            self.ticket_tracker
                .update(pos, first_level(tickets, pos), false, &|p| first_level(tickets, p));
        }

        let mut changed = Vec::new();
        self.ticking_tickets.retain(|pos, list| {
            let before = list.len();
            list.retain(|ticket| !ticket.timed_out(tick));
            if list.len() != before {
                changed.push(*pos);
            }
            !list.is_empty()
        });
        let tickets = &self.ticking_tickets;
        for pos in changed {
            self.ticking_tracker
                .update(pos, first_level(tickets, pos), false, &|p| first_level(tickets, p));
        }
    }

    /// Drops the transient tickets that should not keep chunks loaded while the server shuts down.
    pub fn remove_tickets_on_closing(&mut self) {
        let transient = |ticket: &Ticket| {
            matches!(
                ticket.ticket_type,
                TicketType::Unknown | TicketType::PostTeleport
            )
        };
        let doomed: Vec<(i64, Ticket)> = self
            .tickets
            .iter()
            .flat_map(|(pos, list)| {
                list.iter()
                    .filter(|ticket| transient(ticket))
                    .map(|ticket| (*pos, *ticket))
            })
            .collect();
        for (pos, ticket) in doomed {
            self.remove_ticket_internal(pos, ticket);
            self.remove_ticking_ticket(pos, ticket);
        }
    }

    /// Brings every tracker to a fixed point and reports what the chunk map has to act on.
    pub fn run_all_updates(&mut self, sink: &impl ChunkLevelSink) -> DistanceUpdate {
        let players = &self.players_per_chunk;
        let player_source = |p: i64| if players.contains_key(&p) { 0 } else { u8::MAX };
        self.natural_spawn_tracker
            .run_all_updates(&player_source, &mut |_, _, _| {});

        let ticking_tickets = &self.ticking_tickets;
        self.ticking_tracker
            .run_all_updates(&|p| first_level(ticking_tickets, p), &mut |_, _, _| {});

        self.run_player_ticket_updates();

        let mut update = DistanceUpdate::default();
        let mut seen = FxHashSet::default();
        let tickets = &self.tickets;
        self.ticket_tracker.run_all_updates(
            &|p| first_level(tickets, p),
            &mut |pos, old, new| {
                if let Some(holder) = sink.update_chunk_scheduling(pos, new, old)
                    && seen.insert(pos)
                {
                    update.holders.push(holder);
                }
            },
        );

        update.player_tickets = mem::take(&mut self.pending_player_tickets);
        let tickets = &self.tickets;
        update.tickets_to_release = self
            .tickets_to_release
            .drain()
            .filter(|pos| {
                tickets.get(pos).is_some_and(|list| {
                    list.iter()
                        .any(|ticket| ticket.ticket_type == TicketType::Player)
                })
            })
            .collect();
        update
    }

    fn run_player_ticket_updates(&mut self) {
        let mut to_update = FxHashSet::default();
        let players = &self.players_per_chunk;
        self.player_ticket_tracker.run_all_updates(
            &|p: i64| if players.contains_key(&p) { 0 } else { u8::MAX },
            &mut |pos, _, _| {
                to_update.insert(pos);
            },
        );

        for pos in to_update {
            let queue_level = self
                .player_queue_levels
                .get(&pos)
                .copied()
                .unwrap_or(PLAYER_QUEUE_LEVEL_DEFAULT);
            let level = self.player_ticket_tracker.level(pos);
            if queue_level == level {
                continue;
            }

            let had_ticket = queue_level <= self.player_view_distance;
            let has_ticket = level <= self.player_view_distance;
            let change = match (had_ticket, has_ticket) {
                (false, true) => Some(PlayerTicketChange::Add),
                (true, false) => Some(PlayerTicketChange::Remove),
                _ => None,
            };
            self.pending_player_tickets.push(PlayerTicketUpdate {
                pos,
                level,
                old_queue_level: Some(queue_level),
                change,
            });

            if level >= self.player_ticket_tracker.sentinel() {
                self.player_queue_levels.remove(&pos);
            } else {
                self.player_queue_levels.insert(pos, level);
            }
        }
    }

    /// Returns true if any tracker still has queued work.
    #[must_use]
    pub fn has_pending_updates(&self) -> bool {
        self.ticket_tracker.has_work()
            || self.ticking_tracker.has_work()
            || self.natural_spawn_tracker.has_work()
            || self.player_ticket_tracker.has_work()
    }

    /// The ticket level of `pos`.
    #[must_use]
    pub fn ticket_level(&self, pos: ChunkPos) -> u8 {
        self.ticket_tracker.level(pos.as_i64())
    }

    /// The ticking level of `pos`.
    #[must_use]
    pub fn ticking_level(&self, pos: ChunkPos) -> u8 {
        self.ticking_tracker.level(pos.as_i64())
    }

    /// Whether entities in `pos` tick.
    #[must_use]
    pub fn in_entity_ticking_range(&self, pos: ChunkPos) -> bool {
        ChunkLevel::is_entity_ticking(self.ticking_level(pos))
    }

    /// Whether blocks in `pos` tick.
    #[must_use]
    pub fn in_block_ticking_range(&self, pos: ChunkPos) -> bool {
        ChunkLevel::is_block_ticking(self.ticking_level(pos))
    }

    /// The number of chunks close enough to a player for natural spawning.
    #[must_use]
    pub fn natural_spawn_chunk_count(&self) -> usize {
        self.natural_spawn_tracker.tracked_count()
    }

    /// Whether a player is within the natural spawn radius of `pos`.
    #[must_use]
    pub fn has_players_nearby(&self, pos: ChunkPos) -> bool {
        self.natural_spawn_tracker.level(pos.as_i64()) < self.natural_spawn_tracker.sentinel()
    }

    /// Every chunk close enough to a player for natural spawning.
    #[must_use]
    pub fn spawn_candidate_chunks(&self) -> Vec<ChunkPos> {
        self.natural_spawn_tracker
            .levels()
            .map(|(pos, _)| ChunkPos::from_i64(pos))
            .collect()
    }

    /// Whether any ticket exists.
    #[must_use]
    pub fn has_tickets(&self) -> bool {
        !self.tickets.is_empty()
    }

    /// The tickets at `pos`, most urgent first.
    #[must_use]
    pub fn tickets(&self, pos: ChunkPos) -> &[Ticket] {
        self.tickets
            .get(&pos.as_i64())
            .map_or(&[], |list| list.as_slice())
    }

    /// A short description of the most urgent ticket at `pos`.
    #[must_use]
    pub fn ticket_debug_string(&self, pos: ChunkPos) -> String {
        self.tickets(pos)
            .first()
            .map_or_else(|| "no_ticket".to_owned(), ToString::to_string)
    }

    /// The current simulation distance.
    #[must_use]
    pub const fn simulation_distance(&self) -> u8 {
        self.simulation_distance
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        changes: RefCell<Vec<(i64, u8, u8)>>,
    }

    impl ChunkLevelSink for RecordingSink {
        fn update_chunk_scheduling(
            &self,
            pos: i64,
            new_level: u8,
            old_level: u8,
        ) -> Option<Arc<ChunkHolder>> {
            self.changes.borrow_mut().push((pos, new_level, old_level));
            None
        }
    }

    fn manager() -> DistanceManager {
        DistanceManager::new(8, 10)
    }

    #[test]
    fn test_player_ticket_scenario_levels() {
        let mut manager = manager();
        let sink = RecordingSink::default();
        manager.add_ticket(ChunkPos::new(0, 0), TicketType::Player, 31, 0);
        manager.add_ticket(ChunkPos::new(2, 0), TicketType::Player, 31, 1);
        manager.run_all_updates(&sink);

        assert_eq!(manager.ticket_level(ChunkPos::new(0, 0)), 31);
        assert_eq!(manager.ticket_level(ChunkPos::new(1, 0)), 32);
        assert_eq!(manager.ticket_level(ChunkPos::new(3, 0)), 32);
        assert_eq!(manager.ticket_level(ChunkPos::new(4, 0)), 33);
        assert_eq!(
            manager.ticket_level(ChunkPos::new(30, 0)),
            ChunkLevel::UNLOADED_LEVEL
        );
        assert!(!manager.has_pending_updates());
    }

    #[test]
    fn test_sink_sees_every_level_change() {
        let mut manager = manager();
        let sink = RecordingSink::default();
        manager.add_ticket(ChunkPos::new(0, 0), TicketType::Start, 44, 0);
        manager.run_all_updates(&sink);

        let changes = sink.changes.borrow();
        assert_eq!(changes.as_slice(), &[(ChunkPos::new(0, 0).as_i64(), 44, 45)]);
    }

    #[test]
    fn test_add_and_remove_are_idempotent() {
        let mut manager = manager();
        let sink = RecordingSink::default();
        let pos = ChunkPos::new(3, 3);

        manager.add_ticket(pos, TicketType::Forced, 31, 9);
        manager.add_ticket(pos, TicketType::Forced, 31, 9);
        assert_eq!(manager.tickets(pos).len(), 1);

        manager.remove_ticket(pos, TicketType::Forced, 31, 9);
        manager.remove_ticket(pos, TicketType::Forced, 31, 9);
        manager.remove_ticket(ChunkPos::new(100, 100), TicketType::Player, 31, 0);
        manager.run_all_updates(&sink);

        assert!(!manager.has_tickets());
        assert_eq!(manager.ticket_level(pos), ChunkLevel::UNLOADED_LEVEL);
    }

    #[test]
    fn test_removing_lowest_ticket_raises_level() {
        let mut manager = manager();
        let sink = RecordingSink::default();
        let pos = ChunkPos::new(0, 0);
        manager.add_ticket(pos, TicketType::Start, 33, 0);
        manager.add_ticket(pos, TicketType::Forced, 31, 0);
        manager.run_all_updates(&sink);
        assert_eq!(manager.ticket_level(pos), 31);

        manager.remove_ticket(pos, TicketType::Forced, 31, 0);
        manager.run_all_updates(&sink);
        assert_eq!(manager.ticket_level(pos), 33);
        assert_eq!(manager.ticket_level(ChunkPos::new(1, 0)), 34);
    }

    #[test]
    fn test_stale_tickets_expire() {
        let mut manager = manager();
        let sink = RecordingSink::default();
        let pos = ChunkPos::new(0, 0);
        manager.add_ticket(pos, TicketType::Unknown, 33, 0);
        manager.run_all_updates(&sink);

        manager.purge_stale_tickets();
        assert!(manager.has_tickets());
        manager.purge_stale_tickets();
        assert!(!manager.has_tickets());
        manager.run_all_updates(&sink);
        assert_eq!(manager.ticket_level(pos), ChunkLevel::UNLOADED_LEVEL);
    }

    #[test]
    fn test_forced_chunks_tick() {
        let mut manager = manager();
        let sink = RecordingSink::default();
        let pos = ChunkPos::new(4, -4);
        manager.update_chunk_forced(pos, true);
        manager.run_all_updates(&sink);

        assert!(manager.in_entity_ticking_range(pos));
        assert!(manager.in_block_ticking_range(ChunkPos::new(5, -4)));
        assert!(!manager.in_entity_ticking_range(ChunkPos::new(5, -4)));

        manager.update_chunk_forced(pos, false);
        manager.run_all_updates(&sink);
        assert!(!manager.in_block_ticking_range(pos));
    }

    #[test]
    fn test_players_drive_spawn_and_ticking_ranges() {
        let mut manager = manager();
        let sink = RecordingSink::default();
        manager.add_player(ChunkPos::new(0, 0), 1);
        manager.run_all_updates(&sink);

        assert_eq!(manager.natural_spawn_chunk_count(), 17 * 17);
        assert!(manager.has_players_nearby(ChunkPos::new(8, -8)));
        assert!(!manager.has_players_nearby(ChunkPos::new(9, 0)));
        assert!(manager.in_entity_ticking_range(ChunkPos::new(10, 0)));
        assert!(manager.in_block_ticking_range(ChunkPos::new(11, 0)));
        assert!(!manager.in_block_ticking_range(ChunkPos::new(12, 0)));

        manager.move_player(ChunkPos::new(0, 0), ChunkPos::new(20, 0), 1);
        manager.run_all_updates(&sink);
        assert!(!manager.has_players_nearby(ChunkPos::new(0, 0)));
        assert!(manager.has_players_nearby(ChunkPos::new(20, 0)));

        manager.remove_player(ChunkPos::new(20, 0), 1);
        manager.remove_player(ChunkPos::new(20, 0), 1);
        manager.run_all_updates(&sink);
        assert_eq!(manager.natural_spawn_chunk_count(), 0);
    }

    #[test]
    fn test_simulation_distance_change_moves_ticking_range() {
        let mut manager = manager();
        let sink = RecordingSink::default();
        manager.add_player(ChunkPos::new(0, 0), 1);
        manager.run_all_updates(&sink);
        assert!(manager.in_entity_ticking_range(ChunkPos::new(10, 0)));

        manager.update_simulation_distance(4);
        manager.run_all_updates(&sink);
        assert!(manager.in_entity_ticking_range(ChunkPos::new(4, 0)));
        assert!(!manager.in_entity_ticking_range(ChunkPos::new(5, 0)));
    }

    #[test]
    fn test_player_tickets_are_requested_within_view_distance() {
        let mut manager = manager();
        let sink = RecordingSink::default();
        manager.update_player_tickets(2);
        manager.add_player(ChunkPos::new(0, 0), 1);
        let update = manager.run_all_updates(&sink);

        let adds = update
            .player_tickets
            .iter()
            .filter(|ticket| ticket.change == Some(PlayerTicketChange::Add))
            .count();
        assert_eq!(adds, 25);

        let center = ChunkPos::new(0, 0).as_i64();
        assert!(manager.apply_player_ticket(center));
        assert!(!manager.apply_player_ticket(ChunkPos::new(5, 0).as_i64()));
        let update = manager.run_all_updates(&sink);
        assert_eq!(update.tickets_to_release, vec![center]);
        assert_eq!(manager.ticket_level(ChunkPos::new(0, 0)), PLAYER_TICKET_LEVEL);
    }

    #[test]
    fn test_closing_drops_transient_tickets() {
        let mut manager = manager();
        let sink = RecordingSink::default();
        manager.add_ticket(ChunkPos::new(0, 0), TicketType::Unknown, 33, 0);
        manager.add_ticket(ChunkPos::new(1, 0), TicketType::Start, 33, 0);
        manager.remove_tickets_on_closing();
        manager.run_all_updates(&sink);

        assert!(manager.tickets(ChunkPos::new(0, 0)).is_empty());
        assert_eq!(manager.tickets(ChunkPos::new(1, 0)).len(), 1);
        assert_eq!(manager.ticket_debug_string(ChunkPos::new(0, 0)), "no_ticket");
    }
}
