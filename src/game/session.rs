//! Session Coordinator
//!
//! Round-based state machine for one shared game.
//!
//! ```text
//!  NotStarted ──peers ≥ min──▶ Active ──win──▶ PausedForRestart
//!      ▲                        │  ▲                 │ resume_at
//!      │      peers < min       │  └─────────────────┘ (same peers,
//!      └────────────────────────┴──────────────────────  new puzzle)
//! ```
//!
//! Inside `Active` a round closes exactly once: either the last peer acts
//! or the tick after the deadline skips whoever has not. Closing a round
//! opens the next one.
//!
//! Every operation is a synchronous transition that takes the current
//! instant and returns the [`Notice`]s to deliver. Callers hold the
//! coordinator behind a single lock and deliver notices before releasing it.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::rng::derive_puzzle_seed;
use crate::game::rules::Rules;
use crate::game::state::{Action, Cell, PlayerActor, Round, SessionPhase};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// How a round completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundMode {
    /// Every peer acts once; the round closes when all have acted.
    #[default]
    Simultaneous,
    /// The first accepted action closes the round.
    FirstToAct,
}

impl FromStr for RoundMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simultaneous" => Ok(RoundMode::Simultaneous),
            "first_to_act" | "first-to-act" => Ok(RoundMode::FirstToAct),
            other => Err(format!("unknown round mode: {other}")),
        }
    }
}

/// Session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Peers needed to start (and keep) a session.
    pub min_peers: usize,
    /// Time allowed per round.
    pub round_timeout: Duration,
    /// Pause between a win and the next puzzle.
    pub restart_delay: Duration,
    /// Round completion rule.
    pub round_mode: RoundMode,
    /// Puzzle grid side length.
    pub grid_size: usize,
    /// Session seed; random when `None`.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_peers: 2,
            round_timeout: Duration::from_secs(10),
            restart_delay: Duration::from_secs(5),
            round_mode: RoundMode::Simultaneous,
            grid_size: 3,
            seed: None,
        }
    }
}

// =============================================================================
// NOTICES & ERRORS
// =============================================================================

/// Who a notice is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// Every registered peer.
    All,
    /// Every registered peer but one.
    AllExcept(String),
    /// A single peer.
    Peer(String),
}

/// A text message produced by a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Addressee.
    pub recipient: Recipient,
    /// Message body.
    pub text: String,
}

impl Notice {
    /// Notice for everyone.
    pub fn all(text: impl Into<String>) -> Self {
        Self { recipient: Recipient::All, text: text.into() }
    }

    /// Notice for everyone except `identity`.
    pub fn all_except(identity: &str, text: impl Into<String>) -> Self {
        Self { recipient: Recipient::AllExcept(identity.to_string()), text: text.into() }
    }

    /// Notice for one peer.
    pub fn peer(identity: &str, text: impl Into<String>) -> Self {
        Self { recipient: Recipient::Peer(identity.to_string()), text: text.into() }
    }
}

/// Rejected session operations. The display text is the reply sent back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No round is open.
    #[error("No round in progress. Waiting for the game to start.")]
    SessionNotActive,

    /// The identity never joined.
    #[error("{0} is not in the game.")]
    NotAPlayer(String),

    /// The identity already joined.
    #[error("{0} already joined.")]
    AlreadyJoined(String),

    /// One action per peer per round.
    #[error("You already acted this round. Wait for the next one.")]
    AlreadyActedThisRound,

    /// The deadline passed before the action arrived.
    #[error("Too late, this round is over.")]
    RoundExpired,
}

/// Result of an accepted action.
#[derive(Clone, Debug)]
pub struct ActionReport {
    /// The action solved the puzzle.
    pub won: bool,
    /// Reply from the rules for the acting peer.
    pub message: String,
    /// The action closed the round.
    pub round_closed: bool,
    /// Everything to deliver, the actor's reply first.
    pub notices: Vec<Notice>,
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Turn and round coordinator for one game.
pub struct SessionCoordinator<R: Rules> {
    config: SessionConfig,
    rules: R,
    /// Turn order. Ordinals are positions in this list.
    roster: Vec<String>,
    actors: HashMap<String, PlayerActor>,
    phase: SessionPhase,
    round: Option<Round>,
    round_index: u32,
    /// Puzzles generated so far.
    generation: u64,
    seed: u64,
    game_id: Uuid,
}

impl<R: Rules> SessionCoordinator<R> {
    /// Create a coordinator with no peers.
    pub fn new(config: SessionConfig, rules: R) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        Self {
            config,
            rules,
            roster: Vec::new(),
            actors: HashMap::new(),
            phase: SessionPhase::NotStarted,
            round: None,
            round_index: 0,
            generation: 0,
            seed,
            game_id: Uuid::new_v4(),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Whether a puzzle is in play.
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    /// The open round, if any.
    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    /// Index of the open (or next) round within the current puzzle.
    pub fn round_index(&self) -> u32 {
        self.round_index
    }

    /// Peers in turn order.
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    /// Number of peers in the session.
    pub fn peer_count(&self) -> usize {
        self.roster.len()
    }

    /// Actor state for a peer.
    pub fn actor(&self, identity: &str) -> Option<&PlayerActor> {
        self.actors.get(identity)
    }

    /// Wins recorded for a peer.
    pub fn score(&self, identity: &str) -> Option<u32> {
        self.actors.get(identity).map(|a| a.score)
    }

    /// Scores in turn order, e.g. `ana 1, bia 0`.
    pub fn scoreboard(&self) -> String {
        self.ordered_actors()
            .iter()
            .map(|a| format!("{} {}", a.identity, a.score))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Puzzles generated so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Identifier of this game, for logs.
    pub fn game_id(&self) -> Uuid {
        self.game_id
    }

    /// The puzzle rules.
    pub fn rules(&self) -> &R {
        &self.rules
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Add a logged-in peer and start the session if it is now possible.
    pub fn join(&mut self, identity: &str, now: Instant) -> Result<Vec<Notice>, SessionError> {
        if self.actors.contains_key(identity) {
            return Err(SessionError::AlreadyJoined(identity.to_string()));
        }

        let mut actor = PlayerActor::new(identity, self.roster.len());
        self.rules.place_actor(&mut actor);
        let label = actor.label();

        self.roster.push(identity.to_string());
        self.actors.insert(identity.to_string(), actor);
        info!(game = %self.game_id, "{} joined as player {}", identity, label);

        let mut notices = vec![Notice::all_except(
            identity,
            format!("{identity} joined the game (player {label})."),
        )];

        match self.phase {
            SessionPhase::NotStarted => {
                if self.roster.len() >= self.config.min_peers {
                    notices.extend(self.try_start(now));
                } else {
                    notices.push(Notice::peer(
                        identity,
                        format!(
                            "Waiting for players ({}/{})...",
                            self.roster.len(),
                            self.config.min_peers
                        ),
                    ));
                }
            }
            SessionPhase::Active => {
                if let Some(actor) = self.actors.get(identity) {
                    notices.push(Notice::peer(identity, self.rules.describe(actor)));
                }
            }
            SessionPhase::PausedForRestart { .. } => {
                notices.push(Notice::peer(identity, "A new puzzle starts shortly."));
            }
        }

        Ok(notices)
    }

    /// Remove a peer that logged out, timed out or became unreachable.
    pub fn on_peer_leave(&mut self, identity: &str, now: Instant) -> Vec<Notice> {
        if self.actors.remove(identity).is_none() {
            return Vec::new();
        }
        self.roster.retain(|id| id != identity);
        for (ordinal, id) in self.roster.iter().enumerate() {
            if let Some(actor) = self.actors.get_mut(id) {
                actor.ordinal = ordinal;
            }
        }
        if let Some(round) = self.round.as_mut() {
            round.acted.remove(identity);
        }
        info!(game = %self.game_id, "{} left ({} remaining)", identity, self.roster.len());

        let mut notices = vec![Notice::all(format!("{identity} left the game."))];

        if self.roster.len() < self.config.min_peers {
            if self.phase != SessionPhase::NotStarted {
                info!(game = %self.game_id, "Not enough peers, session stopped");
                self.phase = SessionPhase::NotStarted;
                self.round = None;
                notices.push(Notice::all("Not enough players. Waiting for players..."));
            }
            return notices;
        }

        let complete = self
            .round
            .as_ref()
            .is_some_and(|round| round.is_complete(&self.roster));
        if self.is_active() && complete {
            notices.extend(self.close_round(now));
        }

        notices
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the session if it has not started and enough peers are present.
    pub fn try_start(&mut self, now: Instant) -> Vec<Notice> {
        if self.phase != SessionPhase::NotStarted || self.roster.len() < self.config.min_peers {
            return Vec::new();
        }

        info!(game = %self.game_id, "Session starting with {} peers", self.roster.len());
        let mut notices = vec![Notice::all(format!(
            "Game started with {} players! Find the treasure.",
            self.roster.len()
        ))];
        notices.extend(self.start_puzzle(now));
        notices
    }

    /// Open the round at the current index.
    pub fn open_round(&mut self, now: Instant) -> Vec<Notice> {
        let round = Round::new(self.round_index, now + self.config.round_timeout);
        debug!(game = %self.game_id, "Opening round {}", round.index);
        self.round = Some(round);

        let mut notices = vec![Notice::all(format!(
            "Round {} started. You have {}.",
            self.round_index + 1,
            seconds(self.config.round_timeout)
        ))];

        for actor in self.ordered_actors() {
            notices.push(Notice::peer(&actor.identity, self.rules.describe(actor)));
        }
        notices
    }

    /// Restart the open round's clock once its start has been delivered.
    ///
    /// Delivery can take a while when a peer is slow to acknowledge; the
    /// round time is counted from the moment every peer has been told.
    /// Returns `false` if there is no round or it was already announced.
    pub fn announce_round(&mut self, now: Instant) -> bool {
        let Some(round) = self.round.as_mut() else {
            return false;
        };
        if round.announced {
            return false;
        }
        round.announced = true;
        round.deadline = now + self.config.round_timeout;
        true
    }

    /// Accept one action from `identity` for the open round.
    pub fn submit_action(
        &mut self,
        identity: &str,
        action: Action,
        now: Instant,
    ) -> Result<ActionReport, SessionError> {
        if !self.is_active() {
            return Err(SessionError::SessionNotActive);
        }
        let round = self.round.as_mut().ok_or(SessionError::SessionNotActive)?;
        let actor = self
            .actors
            .get_mut(identity)
            .ok_or_else(|| SessionError::NotAPlayer(identity.to_string()))?;

        if round.acted.contains(identity) {
            return Err(SessionError::AlreadyActedThisRound);
        }
        if round.is_expired(now) {
            return Err(SessionError::RoundExpired);
        }

        let outcome = self.rules.apply_action(actor, action);
        round.acted.insert(identity.to_string());
        debug!(game = %self.game_id, "{} -> {} (round {})", identity, action, round.index);

        let mut notices = vec![Notice::peer(identity, outcome.message.clone())];
        let mut round_closed = false;

        if outcome.won {
            notices.extend(self.on_win(identity, now));
            round_closed = true;
        } else if self.config.round_mode == RoundMode::FirstToAct
            || round.is_complete(&self.roster)
        {
            notices.extend(self.close_round(now));
            round_closed = true;
        } else {
            notices.push(Notice::peer(identity, "Waiting for the other players..."));
        }

        Ok(ActionReport {
            won: outcome.won,
            message: outcome.message,
            round_closed,
            notices,
        })
    }

    /// Periodic check: expire the open round or resume after a restart delay.
    ///
    /// Calling it again before anything is due does nothing.
    pub fn on_timeout_tick(&mut self, now: Instant) -> Vec<Notice> {
        match self.phase {
            SessionPhase::PausedForRestart { resume_at } if now >= resume_at => self.resume(now),
            SessionPhase::Active => {
                let Some(round) = self.round.as_ref() else {
                    return Vec::new();
                };
                if !round.is_expired(now) || round.is_complete(&self.roster) {
                    return Vec::new();
                }

                let skipped: Vec<&str> = self
                    .roster
                    .iter()
                    .filter(|id| !round.acted.contains(*id))
                    .map(String::as_str)
                    .collect();
                info!(game = %self.game_id, "Round {} timed out, skipped: {:?}", round.index, skipped);

                let mut notices = vec![Notice::all(format!("Time's up! Skipped: {}.", skipped.join(", ")))];
                notices.extend(self.close_round(now));
                notices
            }
            _ => Vec::new(),
        }
    }

    /// Record a win and pause until the restart delay has passed.
    pub fn on_win(&mut self, winner: &str, now: Instant) -> Vec<Notice> {
        if let Some(actor) = self.actors.get_mut(winner) {
            actor.score += 1;
        }

        let grid = self.rules.render(&self.ordered_actors());
        let resume_at = now + self.config.restart_delay;
        self.phase = SessionPhase::PausedForRestart { resume_at };
        self.round = None;
        info!(game = %self.game_id, "{} won puzzle {}", winner, self.generation);

        vec![
            Notice::all(format!("{winner} found the treasure!\n{grid}")),
            Notice::all(format!(
                "New puzzle in {}. Scores: {}",
                seconds(self.config.restart_delay),
                self.scoreboard()
            )),
        ]
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn resume(&mut self, now: Instant) -> Vec<Notice> {
        if self.roster.len() < self.config.min_peers {
            self.phase = SessionPhase::NotStarted;
            self.round = None;
            return vec![Notice::all("Not enough players. Waiting for players...")];
        }

        let mut notices = vec![Notice::all("New puzzle! Same players, new treasure.")];
        notices.extend(self.start_puzzle(now));
        notices
    }

    fn start_puzzle(&mut self, now: Instant) -> Vec<Notice> {
        self.generation += 1;
        let seed = derive_puzzle_seed(self.seed, self.generation, &self.roster);
        self.rules.new_puzzle(seed);

        for actor in self.actors.values_mut() {
            self.rules.place_actor(actor);
        }

        self.phase = SessionPhase::Active;
        self.round_index = 0;
        self.open_round(now)
    }

    fn close_round(&mut self, now: Instant) -> Vec<Notice> {
        let actors = self.ordered_actors();
        let mut text = format!("Round {} over.\n{}", self.round_index + 1, self.rules.render(&actors));
        for group in colocated(&actors) {
            text.push('\n');
            text.push_str(&format!("{} are on the same cell!", join_names(&group)));
        }

        self.round_index += 1;
        let mut notices = vec![Notice::all(text)];
        notices.extend(self.open_round(now));
        notices
    }

    fn ordered_actors(&self) -> Vec<&PlayerActor> {
        self.roster
            .iter()
            .filter_map(|id| self.actors.get(id))
            .collect()
    }
}

/// `10 seconds`, `1.5 seconds`.
fn seconds(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{} seconds", duration.as_secs())
    } else {
        format!("{} seconds", duration.as_secs_f64())
    }
}

/// Groups of two or more actors sharing a cell, in turn order.
fn colocated<'a>(actors: &[&'a PlayerActor]) -> Vec<Vec<&'a str>> {
    let mut cells: Vec<(Cell, Vec<&'a str>)> = Vec::new();
    for actor in actors {
        match cells.iter_mut().find(|(cell, _)| *cell == actor.position) {
            Some((_, names)) => names.push(&actor.identity),
            None => cells.push((actor.position, vec![&actor.identity])),
        }
    }
    cells
        .into_iter()
        .filter(|(_, names)| names.len() > 1)
        .map(|(_, names)| names)
        .collect()
}

fn join_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [only] => only.to_string(),
        [rest @ .., last] => format!("{} and {}", rest.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::ActionOutcome;
    use crate::game::state::Direction;

    /// Rules where `suggest` wins and everything else is a plain move.
    #[derive(Default)]
    struct StubRules {
        puzzles: Vec<u64>,
    }

    impl Rules for StubRules {
        fn new_puzzle(&mut self, seed: u64) {
            self.puzzles.push(seed);
        }

        fn place_actor(&self, actor: &mut PlayerActor) {
            actor.position = Cell::new(0, 0);
            actor.reset_for_puzzle();
        }

        fn apply_action(&mut self, actor: &mut PlayerActor, action: Action) -> ActionOutcome {
            if let Action::Move(Direction::Right) = action {
                actor.position.col += 1;
            }
            ActionOutcome {
                won: action == Action::Suggest,
                message: format!("ok: {action}"),
            }
        }

        fn render(&self, actors: &[&PlayerActor]) -> String {
            actors.iter().map(|a| a.identity.as_str()).collect::<Vec<_>>().join("|")
        }

        fn describe(&self, actor: &PlayerActor) -> String {
            format!("you are {}", actor.identity)
        }
    }

    const UP: Action = Action::Move(Direction::Up);

    fn config() -> SessionConfig {
        SessionConfig {
            seed: Some(7),
            ..SessionConfig::default()
        }
    }

    fn coordinator(config: SessionConfig) -> SessionCoordinator<StubRules> {
        SessionCoordinator::new(config, StubRules::default())
    }

    /// Coordinator with ana and bia joined and round 0 open.
    fn started(now: Instant) -> SessionCoordinator<StubRules> {
        let mut c = coordinator(config());
        c.join("ana", now).unwrap();
        c.join("bia", now).unwrap();
        c
    }

    fn texts(notices: &[Notice]) -> Vec<&str> {
        notices.iter().map(|n| n.text.as_str()).collect()
    }

    #[test]
    fn test_single_peer_never_starts() {
        let now = Instant::now();
        let mut c = coordinator(config());

        let notices = c.join("ana", now).unwrap();
        assert_eq!(c.phase(), SessionPhase::NotStarted);
        assert!(c.round().is_none());
        assert!(texts(&notices).contains(&"Waiting for players (1/2)..."));

        assert!(c.try_start(now).is_empty());
        assert!(c.on_timeout_tick(now + Duration::from_secs(60)).is_empty());
        assert_eq!(c.submit_action("ana", UP, now).unwrap_err(), SessionError::SessionNotActive);
    }

    #[test]
    fn test_second_peer_starts_round_zero() {
        let now = Instant::now();
        let c = started(now);

        assert!(c.is_active());
        assert_eq!(c.round_index(), 0);
        assert_eq!(c.generation(), 1);
        let round = c.round().unwrap();
        assert_eq!(round.deadline, now + Duration::from_secs(10));
        assert!(round.acted.is_empty());
        assert_eq!(c.rules().puzzles.len(), 1);
    }

    #[test]
    fn test_open_round_prompts_every_peer() {
        let now = Instant::now();
        let mut c = started(now);

        let notices = c.open_round(now);
        assert_eq!(notices[0].recipient, Recipient::All);
        assert!(notices.contains(&Notice::peer("ana", "you are ana")));
        assert!(notices.contains(&Notice::peer("bia", "you are bia")));
    }

    #[test]
    fn test_duplicate_join_rejected() {
        let now = Instant::now();
        let mut c = started(now);
        assert_eq!(c.join("ana", now).unwrap_err(), SessionError::AlreadyJoined("ana".into()));
        assert_eq!(c.peer_count(), 2);
    }

    #[test]
    fn test_round_closes_when_all_acted() {
        let now = Instant::now();
        let mut c = started(now);

        let first = c.submit_action("ana", UP, now).unwrap();
        assert!(!first.round_closed);
        assert_eq!(first.message, "ok: move up");
        assert_eq!(c.round_index(), 0);

        let second = c.submit_action("bia", UP, now).unwrap();
        assert!(second.round_closed);
        assert_eq!(c.round_index(), 1);
        assert!(c.round().unwrap().acted.is_empty());
        assert!(texts(&second.notices).iter().any(|t| t.starts_with("Round 1 over.\nana|bia")));
    }

    #[test]
    fn test_double_submit_rejected_without_double_close() {
        let now = Instant::now();
        let mut c = started(now);

        c.submit_action("ana", UP, now).unwrap();
        assert_eq!(
            c.submit_action("ana", UP, now).unwrap_err(),
            SessionError::AlreadyActedThisRound
        );
        assert_eq!(c.round_index(), 0);

        c.submit_action("bia", UP, now).unwrap();
        assert_eq!(c.round_index(), 1);
        // The next round accepts ana again.
        assert!(c.submit_action("ana", UP, now).is_ok());
    }

    #[test]
    fn test_late_action_rejected() {
        let now = Instant::now();
        let mut c = started(now);

        let late = now + Duration::from_secs(11);
        assert_eq!(c.submit_action("ana", UP, late).unwrap_err(), SessionError::RoundExpired);
        assert!(c.round().unwrap().acted.is_empty());
    }

    #[test]
    fn test_unknown_player_rejected() {
        let now = Instant::now();
        let mut c = started(now);
        assert_eq!(
            c.submit_action("zed", UP, now).unwrap_err(),
            SessionError::NotAPlayer("zed".into())
        );
    }

    #[test]
    fn test_timeout_skips_and_is_idempotent() {
        let now = Instant::now();
        let mut c = started(now);
        c.submit_action("ana", UP, now).unwrap();

        // Before the deadline nothing happens.
        assert!(c.on_timeout_tick(now + Duration::from_secs(10)).is_empty());

        let expired = now + Duration::from_secs(11);
        let notices = c.on_timeout_tick(expired);
        assert!(texts(&notices).contains(&"Time's up! Skipped: bia."));
        assert_eq!(c.round_index(), 1);
        assert_eq!(c.round().unwrap().deadline, expired + Duration::from_secs(10));

        assert!(c.on_timeout_tick(expired).is_empty());
        assert!(c.on_timeout_tick(expired + Duration::from_secs(5)).is_empty());
        assert_eq!(c.round_index(), 1);
        // Skipped peer stays in the game.
        assert_eq!(c.peer_count(), 2);
    }

    #[test]
    fn test_completed_round_is_not_closed_again_by_tick() {
        let now = Instant::now();
        let mut c = started(now);
        c.submit_action("ana", UP, now).unwrap();
        c.submit_action("bia", UP, now).unwrap();
        assert_eq!(c.round_index(), 1);

        // The fresh round has its own deadline.
        assert!(c.on_timeout_tick(now + Duration::from_secs(9)).is_empty());
        assert_eq!(c.round_index(), 1);
    }

    #[test]
    fn test_first_to_act_mode() {
        let now = Instant::now();
        let mut c = coordinator(SessionConfig {
            round_mode: RoundMode::FirstToAct,
            ..config()
        });
        c.join("ana", now).unwrap();
        c.join("bia", now).unwrap();

        let report = c.submit_action("bia", UP, now).unwrap();
        assert!(report.round_closed);
        assert_eq!(c.round_index(), 1);
    }

    #[test]
    fn test_win_pauses_then_resumes_with_same_peers() {
        let now = Instant::now();
        let mut c = started(now);

        let report = c.submit_action("bia", Action::Suggest, now).unwrap();
        assert!(report.won);
        assert!(report.round_closed);
        assert_eq!(c.score("bia"), Some(1));
        assert_eq!(c.score("ana"), Some(0));
        assert!(texts(&report.notices).contains(&"New puzzle in 5 seconds. Scores: ana 0, bia 1"));

        let resume_at = now + Duration::from_secs(5);
        assert_eq!(c.phase(), SessionPhase::PausedForRestart { resume_at });
        assert_eq!(c.submit_action("ana", UP, now).unwrap_err(), SessionError::SessionNotActive);

        assert!(c.on_timeout_tick(now + Duration::from_secs(4)).is_empty());
        let notices = c.on_timeout_tick(resume_at);
        assert!(!notices.is_empty());
        assert!(c.is_active());
        assert_eq!(c.round_index(), 0);
        assert_eq!(c.generation(), 2);
        assert_eq!(c.roster(), ["ana".to_string(), "bia".to_string()]);

        // Different puzzle seeds per generation.
        let puzzles = &c.rules().puzzles;
        assert_ne!(puzzles[0], puzzles[1]);
    }

    #[test]
    fn test_resume_without_enough_peers_stays_stopped() {
        let now = Instant::now();
        let mut c = started(now);
        c.submit_action("ana", Action::Suggest, now).unwrap();

        c.on_peer_leave("bia", now);
        assert_eq!(c.phase(), SessionPhase::NotStarted);
        assert!(c.on_timeout_tick(now + Duration::from_secs(6)).is_empty());
        assert!(c.round().is_none());
    }

    #[test]
    fn test_leave_below_minimum_stops_session() {
        let now = Instant::now();
        let mut c = started(now);

        let notices = c.on_peer_leave("ana", now);
        assert_eq!(c.phase(), SessionPhase::NotStarted);
        assert!(c.round().is_none());
        assert!(texts(&notices).contains(&"Not enough players. Waiting for players..."));

        // Leaving twice is harmless.
        assert!(c.on_peer_leave("ana", now).is_empty());

        // A new peer restarts the session.
        c.join("caio", now).unwrap();
        assert!(c.is_active());
        assert_eq!(c.actor("caio").unwrap().ordinal, 1);
        assert_eq!(c.actor("bia").unwrap().ordinal, 0);
    }

    #[test]
    fn test_leave_of_last_pending_peer_closes_round() {
        let now = Instant::now();
        let mut c = coordinator(config());
        for id in ["ana", "bia", "caio"] {
            c.join(id, now).unwrap();
        }
        c.submit_action("ana", UP, now).unwrap();
        c.submit_action("bia", UP, now).unwrap();
        assert_eq!(c.round_index(), 0);

        c.on_peer_leave("caio", now);
        assert_eq!(c.round_index(), 1);
        assert!(c.is_active());
    }

    #[test]
    fn test_colocation_announced() {
        let now = Instant::now();
        let mut c = started(now);

        c.submit_action("ana", UP, now).unwrap();
        let report = c.submit_action("bia", UP, now).unwrap();
        assert!(texts(&report.notices)
            .iter()
            .any(|t| t.ends_with("ana and bia are on the same cell!")));

        let ana = Action::Move(Direction::Right);
        c.submit_action("ana", ana, now).unwrap();
        let report = c.submit_action("bia", UP, now).unwrap();
        assert!(!texts(&report.notices).iter().any(|t| t.contains("same cell")));
    }

    #[test]
    fn test_announce_round_restarts_clock_once() {
        let now = Instant::now();
        let mut c = started(now);

        // Round start took 25 s to reach everyone.
        let delivered = now + Duration::from_secs(25);
        assert!(c.announce_round(delivered));
        assert!(!c.announce_round(delivered + Duration::from_secs(5)));
        assert_eq!(c.round().unwrap().deadline, delivered + Duration::from_secs(10));

        assert!(c.on_timeout_tick(now + Duration::from_secs(11)).is_empty());
        c.submit_action("ana", UP, now + Duration::from_secs(30)).unwrap();

        // The next round gets its own announcement.
        let expired = c.on_timeout_tick(delivered + Duration::from_secs(11));
        assert!(texts(&expired).contains(&"Time's up! Skipped: bia."));
        assert!(c.announce_round(delivered + Duration::from_secs(12)));
    }

    #[test]
    fn test_announce_without_round() {
        let mut c = coordinator(config());
        assert!(!c.announce_round(Instant::now()));
    }

    #[test]
    fn test_sub_second_timeout_is_spelled_out() {
        let now = Instant::now();
        let mut c = coordinator(SessionConfig {
            round_timeout: Duration::from_millis(1500),
            ..config()
        });
        c.join("ana", now).unwrap();
        let notices = c.join("bia", now).unwrap();

        assert!(texts(&notices).contains(&"Round 1 started. You have 1.5 seconds."));
        assert_eq!(seconds(Duration::from_secs(10)), "10 seconds");
        assert_eq!(seconds(Duration::from_millis(250)), "0.25 seconds");
    }

    #[test]
    fn test_join_names() {
        assert_eq!(join_names(&["a"]), "a");
        assert_eq!(join_names(&["a", "b"]), "a and b");
        assert_eq!(join_names(&["a", "b", "c"]), "a, b and c");
    }

    #[test]
    fn test_round_mode_parse() {
        assert_eq!("first_to_act".parse::<RoundMode>(), Ok(RoundMode::FirstToAct));
        assert_eq!("Simultaneous".parse::<RoundMode>(), Ok(RoundMode::Simultaneous));
        assert!("whatever".parse::<RoundMode>().is_err());
    }
}
