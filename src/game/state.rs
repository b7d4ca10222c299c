//! Session State Definitions
//!
//! Per-player and per-round state owned by the coordinator.

use std::collections::HashSet;

use tokio::time::Instant;

// =============================================================================
// ACTIONS
// =============================================================================

/// Grid direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards row 0.
    Up,
    /// Towards the last row.
    Down,
    /// Towards column 0.
    Left,
    /// Towards the last column.
    Right,
}

impl Direction {
    /// Parse `up`, `down`, `left` or `right` (case-insensitive).
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    /// Lowercase name as typed by players.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// One round action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Step one cell.
    Move(Direction),
    /// Ask where the target is (once per puzzle).
    Hint,
    /// Ask which move to make (once per puzzle).
    Suggest,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Move(dir) => write!(f, "move {}", dir.as_str()),
            Action::Hint => write!(f, "hint"),
            Action::Suggest => write!(f, "suggest"),
        }
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// Grid cell, row 0 at the top.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Cell {
    /// Row index.
    pub row: usize,
    /// Column index.
    pub col: usize,
}

impl Cell {
    /// Create a cell.
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// A player's state within a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerActor {
    /// Login name.
    pub identity: String,
    /// Position in turn order, 0-based.
    pub ordinal: usize,
    /// Current cell.
    pub position: Cell,
    /// Hint consumed for the current puzzle.
    pub hint_used: bool,
    /// Suggestion consumed for the current puzzle.
    pub suggest_used: bool,
    /// Puzzles won this session.
    pub score: u32,
}

impl PlayerActor {
    /// Create a fresh actor.
    pub fn new(identity: impl Into<String>, ordinal: usize) -> Self {
        Self {
            identity: identity.into(),
            ordinal,
            position: Cell::default(),
            hint_used: false,
            suggest_used: false,
            score: 0,
        }
    }

    /// Reset per-puzzle flags. Score is kept.
    pub fn reset_for_puzzle(&mut self) {
        self.hint_used = false;
        self.suggest_used = false;
    }

    /// Number shown for this player on the grid.
    pub fn label(&self) -> usize {
        self.ordinal + 1
    }
}

// =============================================================================
// ROUND / PHASE
// =============================================================================

/// An open round.
#[derive(Clone, Debug)]
pub struct Round {
    /// Round number within the current puzzle.
    pub index: u32,
    /// Actions arriving after this instant are rejected.
    pub deadline: Instant,
    /// Peers that have acted this round.
    pub acted: HashSet<String>,
    /// Whether the round start has reached the peers.
    pub announced: bool,
}

impl Round {
    /// Open a round.
    pub fn new(index: u32, deadline: Instant) -> Self {
        Self {
            index,
            deadline,
            acted: HashSet::new(),
            announced: false,
        }
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.deadline
    }

    /// Whether every peer in `roster` has acted.
    pub fn is_complete<'a>(&self, roster: impl IntoIterator<Item = &'a String>) -> bool {
        roster.into_iter().all(|identity| self.acted.contains(identity))
    }
}

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for enough peers.
    NotStarted,
    /// A puzzle is in play.
    Active,
    /// A puzzle was won; the next one opens at `resume_at`.
    PausedForRestart {
        /// When the next puzzle starts.
        resume_at: Instant,
    },
}
