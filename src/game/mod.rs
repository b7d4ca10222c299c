//! Game Logic Module
//!
//! Session coordination and the puzzle it runs. No I/O happens here;
//! every transition takes the current instant and returns notices.
//!
//! ## Module Structure
//!
//! - `state`: actors, rounds, session phase, actions
//! - `rules`: the `Rules` seam and the treasure hunt puzzle
//! - `session`: round lifecycle state machine

pub mod rules;
pub mod session;
pub mod state;

// Re-export key types
pub use rules::{ActionOutcome, Rules, TreasureHunt};
pub use session::{
    ActionReport, Notice, Recipient, RoundMode, SessionConfig, SessionCoordinator, SessionError,
};
pub use state::{Action, Cell, Direction, PlayerActor, Round, SessionPhase};
