//! Application Protocol
//!
//! Messages are UTF-8 text, one command per reliable message.
//!
//! | Client sends                        | Meaning                   |
//! |-------------------------------------|---------------------------|
//! | `login <name>`                      | handshake (unregistered)  |
//! | `move up\|down\|left\|right`, `up`… | move one cell             |
//! | `hint`, `suggest`                   | one-shot helpers          |
//! | `score`                             | report own wins           |
//! | `logout`                            | leave the session         |
//!
//! Everything the server sends is free text.

use std::str::FromStr;

use crate::game::state::{Action, Direction};

/// Parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `login <name>`.
    Login(String),
    /// A round action.
    Action(Action),
    /// Leave the session.
    Logout,
    /// Ask for the caller's score.
    Score,
}

/// Commands the server does not understand. The display text is the reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Empty message.
    #[error("Empty command.")]
    Empty,

    /// Anything else.
    #[error("Invalid command: {0}. Use move up|down|left|right, hint, suggest, score or logout.")]
    Unknown(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let unknown = || CommandError::Unknown(text.trim().to_string());

        let Some(first) = words.first() else {
            return Err(CommandError::Empty);
        };

        match (first.to_ascii_lowercase().as_str(), &words[1..]) {
            ("login", [name]) => Ok(Command::Login(name.to_string())),
            ("move", [dir]) => Direction::parse(dir)
                .map(|d| Command::Action(Action::Move(d)))
                .ok_or_else(unknown),
            ("hint", []) => Ok(Command::Action(Action::Hint)),
            ("suggest", []) => Ok(Command::Action(Action::Suggest)),
            ("score", []) => Ok(Command::Score),
            ("logout", []) => Ok(Command::Logout),
            (word, []) => Direction::parse(word)
                .map(|d| Command::Action(Action::Move(d)))
                .ok_or_else(unknown),
            _ => Err(unknown()),
        }
    }
}

impl Command {
    /// Parse a raw payload, rejecting invalid UTF-8 as unknown.
    pub fn from_payload(payload: &[u8]) -> Result<Self, CommandError> {
        match std::str::from_utf8(payload) {
            Ok(text) => text.parse(),
            Err(_) => Err(CommandError::Unknown(String::from_utf8_lossy(payload).into_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_moves() {
        assert_eq!("move up".parse::<Command>(), Ok(Command::Action(Action::Move(Direction::Up))));
        assert_eq!("MOVE Left".parse::<Command>(), Ok(Command::Action(Action::Move(Direction::Left))));
        assert_eq!("down".parse::<Command>(), Ok(Command::Action(Action::Move(Direction::Down))));
        assert!("move".parse::<Command>().is_err());
        assert!("move sideways".parse::<Command>().is_err());
    }

    #[test]
    fn test_parse_other_commands() {
        assert_eq!("hint".parse::<Command>(), Ok(Command::Action(Action::Hint)));
        assert_eq!(" suggest ".parse::<Command>(), Ok(Command::Action(Action::Suggest)));
        assert_eq!("score".parse::<Command>(), Ok(Command::Score));
        assert_eq!("logout".parse::<Command>(), Ok(Command::Logout));
        assert_eq!("login ana".parse::<Command>(), Ok(Command::Login("ana".into())));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!(
            "dance now".parse::<Command>(),
            Err(CommandError::Unknown("dance now".into()))
        );
        assert!("hint please".parse::<Command>().is_err());
    }

    #[test]
    fn test_from_payload_rejects_invalid_utf8() {
        assert!(matches!(
            Command::from_payload(&[0xff, 0xfe]),
            Err(CommandError::Unknown(_))
        ));
        assert_eq!(Command::from_payload(b"up"), Ok(Command::Action(Action::Move(Direction::Up))));
    }
}
