//! Puzzle Rules
//!
//! The coordinator knows nothing about the puzzle itself. It places actors,
//! forwards their actions and broadcasts whatever the rules render.
//!
//! [`TreasureHunt`] is the bundled puzzle: a hidden treasure on an N×N grid.
//!
//! ```text
//!   y
//!   3 | .  .  .        players start at (1,1), bottom-left
//!   2 | .  .  .        the treasure is never placed there
//!   1 | 1  .  .
//!     +---------- x
//!       1  2  3
//! ```

use crate::core::rng::DeterministicRng;
use crate::game::state::{Action, Cell, Direction, PlayerActor};

/// Result of one action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    /// The action solved the puzzle.
    pub won: bool,
    /// Reply for the acting player.
    pub message: String,
}

impl ActionOutcome {
    fn reply(message: impl Into<String>) -> Self {
        Self { won: false, message: message.into() }
    }
}

/// Puzzle rules consumed by the session coordinator.
pub trait Rules: Send + 'static {
    /// Generate a fresh puzzle from `seed`.
    fn new_puzzle(&mut self, seed: u64);

    /// Put an actor on its starting cell.
    fn place_actor(&self, actor: &mut PlayerActor);

    /// Apply one action, mutating the actor.
    fn apply_action(&mut self, actor: &mut PlayerActor, action: Action) -> ActionOutcome;

    /// Shared state shown to everyone at round close. `actors` are in turn order.
    fn render(&self, actors: &[&PlayerActor]) -> String;

    /// Private state and prompt for one actor.
    fn describe(&self, actor: &PlayerActor) -> String;
}

/// Hidden-treasure grid puzzle.
#[derive(Clone, Debug)]
pub struct TreasureHunt {
    size: usize,
    treasure: Cell,
}

impl TreasureHunt {
    /// Create a puzzle on a `size`×`size` grid. Call [`Rules::new_puzzle`]
    /// before play.
    pub fn new(size: usize) -> Self {
        let size = size.max(2);
        Self {
            size,
            treasure: Cell::new(0, size - 1),
        }
    }

    /// Create a puzzle with a fixed treasure cell.
    pub fn with_treasure(size: usize, treasure: Cell) -> Self {
        Self { size: size.max(2), treasure }
    }

    /// Grid side length.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Where the treasure is.
    pub fn treasure(&self) -> Cell {
        self.treasure
    }

    /// Starting cell, bottom-left.
    pub fn start(&self) -> Cell {
        Cell::new(self.size - 1, 0)
    }

    /// Cell in player coordinates: x grows right, y grows up, both from 1.
    pub fn to_player_coords(&self, cell: Cell) -> (usize, usize) {
        (cell.col + 1, self.size - cell.row)
    }

    fn step(&self, from: Cell, dir: Direction) -> Option<Cell> {
        let Cell { row, col } = from;
        let to = match dir {
            Direction::Up => Cell::new(row.checked_sub(1)?, col),
            Direction::Down => Cell::new(row + 1, col),
            Direction::Left => Cell::new(row, col.checked_sub(1)?),
            Direction::Right => Cell::new(row, col + 1),
        };
        (to.row < self.size && to.col < self.size).then_some(to)
    }

    /// Direction towards the treasure, vertical first.
    fn heading(&self, from: Cell) -> Option<Direction> {
        let t = self.treasure;
        if t.row < from.row {
            Some(Direction::Up)
        } else if t.row > from.row {
            Some(Direction::Down)
        } else if t.col > from.col {
            Some(Direction::Right)
        } else if t.col < from.col {
            Some(Direction::Left)
        } else {
            None
        }
    }
}

impl Rules for TreasureHunt {
    fn new_puzzle(&mut self, seed: u64) {
        let mut rng = DeterministicRng::new(seed);
        let start = self.start();

        // Pick among every cell except the start.
        let cells = self.size * self.size;
        let mut index = rng.next_index(cells - 1);
        if index >= start.row * self.size + start.col {
            index += 1;
        }
        self.treasure = Cell::new(index / self.size, index % self.size);
    }

    fn place_actor(&self, actor: &mut PlayerActor) {
        actor.position = self.start();
        actor.reset_for_puzzle();
    }

    fn apply_action(&mut self, actor: &mut PlayerActor, action: Action) -> ActionOutcome {
        match action {
            Action::Move(dir) => match self.step(actor.position, dir) {
                None => ActionOutcome::reply("Invalid move."),
                Some(cell) => {
                    actor.position = cell;
                    if cell == self.treasure {
                        ActionOutcome { won: true, message: "You found the treasure!".into() }
                    } else {
                        ActionOutcome::reply("Move done.")
                    }
                }
            },
            Action::Hint => {
                if actor.hint_used {
                    return ActionOutcome::reply("You already used your hint.");
                }
                actor.hint_used = true;

                match self.heading(actor.position) {
                    None => ActionOutcome::reply("You are on the treasure!"),
                    Some(Direction::Up) => ActionOutcome::reply("Hint: the treasure is above."),
                    Some(Direction::Down) => ActionOutcome::reply("Hint: the treasure is below."),
                    Some(Direction::Right) => ActionOutcome::reply("Hint: the treasure is to the right."),
                    Some(Direction::Left) => ActionOutcome::reply("Hint: the treasure is to the left."),
                }
            }
            Action::Suggest => {
                if actor.suggest_used {
                    return ActionOutcome::reply("You already used your suggestion.");
                }
                actor.suggest_used = true;

                match self.heading(actor.position) {
                    None => ActionOutcome::reply("You are on the treasure!"),
                    Some(dir) => ActionOutcome::reply(format!("Suggestion: move {}", dir.as_str())),
                }
            }
        }
    }

    fn render(&self, actors: &[&PlayerActor]) -> String {
        let mut grid = vec![vec![".".to_string(); self.size]; self.size];

        for actor in actors {
            let Cell { row, col } = actor.position;
            if row >= self.size || col >= self.size {
                continue;
            }
            if actor.position == self.treasure {
                grid[row][col] = "T".into();
            } else if grid[row][col] == "." {
                grid[row][col] = actor.label().to_string();
            }
        }

        grid.iter()
            .map(|row| row.join(" "))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn describe(&self, actor: &PlayerActor) -> String {
        let (x, y) = self.to_player_coords(actor.position);
        let mut extras = Vec::new();
        if !actor.hint_used {
            extras.push("hint");
        }
        if !actor.suggest_used {
            extras.push("suggest");
        }

        let mut text = format!(
            "Player {} at ({},{}). Your move: move up|down|left|right",
            actor.label(),
            x,
            y
        );
        for extra in extras {
            text.push_str(", ");
            text.push_str(extra);
        }
        text
    }
}
