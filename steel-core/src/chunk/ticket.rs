//! Tickets: claims of interest in keeping a chunk loaded at some level.
use std::{
    cmp::Ordering,
    fmt::{self, Display},
};

/// What kind of interest a ticket represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TicketType {
    /// Keeps the spawn area loaded.
    Start,
    /// Added around players.
    Player,
    /// Added for force loaded chunks.
    Forced,
    /// Keeps chunks loaded while light is computed across them.
    Light,
    /// Added when an entity travels through a portal.
    Portal,
    /// Added after a teleport so the destination loads.
    PostTeleport,
    /// Added for blocking chunk requests.
    Unknown,
}

impl TicketType {
    /// The number of ticket ticks after which a ticket of this type expires. Zero means never.
    #[must_use]
    pub const fn timeout(self) -> u64 {
        match self {
            Self::Portal => 300,
            Self::PostTeleport => 5,
            Self::Unknown => 1,
            Self::Start | Self::Player | Self::Forced | Self::Light => 0,
        }
    }

    /// The lowercase name of the type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Player => "player",
            Self::Forced => "forced",
            Self::Light => "light",
            Self::Portal => "portal",
            Self::PostTeleport => "post_teleport",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single claim. Equality and ordering ignore the creation tick, so re-adding refreshes an existing ticket.
#[derive(Debug, Clone, Copy)]
pub struct Ticket {
    /// The kind of interest.
    pub ticket_type: TicketType,
    /// The level the ticket holds its chunk at. Lower is more urgent.
    pub level: u8,
    /// Distinguishes tickets of the same type and level, e.g. a position or an id.
    pub key: u64,
    created_tick: u64,
}

impl Ticket {
    /// Creates a new ticket.
    #[must_use]
    pub const fn new(ticket_type: TicketType, level: u8, key: u64) -> Self {
        Self {
            ticket_type,
            level,
            key,
            created_tick: 0,
        }
    }

    pub(crate) const fn set_created_tick(&mut self, tick: u64) {
        self.created_tick = tick;
    }

    /// Whether the ticket has expired at `current_tick`.
    #[must_use]
    pub const fn timed_out(&self, current_tick: u64) -> bool {
        let timeout = self.ticket_type.timeout();
        timeout != 0 && current_tick.saturating_sub(self.created_tick) > timeout
    }
}

impl PartialEq for Ticket {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ticket {}

impl PartialOrd for Ticket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ticket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then(self.ticket_type.cmp(&other.ticket_type))
            .then(self.key.cmp(&other.key))
    }
}

impl Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ticket[{} {} ({})] at {}",
            self.ticket_type, self.level, self.key, self.created_tick
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_prefers_lower_level() {
        let player = Ticket::new(TicketType::Player, 31, 0);
        let start = Ticket::new(TicketType::Start, 33, 0);
        assert!(player < start);
    }

    #[test]
    fn test_equality_ignores_created_tick() {
        let mut a = Ticket::new(TicketType::Forced, 31, 7);
        let b = Ticket::new(TicketType::Forced, 31, 7);
        a.set_created_tick(10);
        assert_eq!(a, b);
        assert_ne!(a, Ticket::new(TicketType::Forced, 31, 8));
    }

    #[test]
    fn test_timeouts() {
        let mut ticket = Ticket::new(TicketType::PostTeleport, 32, 0);
        ticket.set_created_tick(10);
        assert!(!ticket.timed_out(15));
        assert!(ticket.timed_out(16));

        let forced = Ticket::new(TicketType::Forced, 31, 0);
        assert!(!forced.timed_out(u64::MAX));
    }
}
