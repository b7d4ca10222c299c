//! # RDT Hunt Server
//!
//! Reliable message delivery over UDP and a round-based multiplayer
//! treasure hunt running on top of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RDT HUNT SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure primitives                           │
//! │  ├── hash.rs     - Truncated SHA-256 packet digest           │
//! │  └── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │                                                              │
//! │  game/           - Session logic (no I/O)                    │
//! │  ├── state.rs    - Actors, rounds, phases, actions           │
//! │  ├── rules.rs    - Rules seam and the treasure hunt          │
//! │  └── session.rs  - Round lifecycle state machine             │
//! │                                                              │
//! │  network/        - Transport and server                      │
//! │  ├── packet.rs   - Wire codec                                │
//! │  ├── loss.rs     - Simulated loss                            │
//! │  ├── channel.rs  - Stop-and-wait ARQ                         │
//! │  ├── registry.rs - Peer table and fan-out                   │
//! │  ├── login.rs    - Login handshake, contact book             │
//! │  ├── protocol.rs - Text commands                             │
//! │  ├── server.rs   - Dispatcher and background loops           │
//! │  └── client.rs   - Client side                               │
//! │                                                              │
//! │  config.rs       - JSON and environment configuration        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Guarantee
//!
//! Each successful `send` is delivered exactly once and in order to the
//! remote `recv`. A send retries until acknowledged or the attempt limit is
//! reached; nothing beyond that is promised.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::ConfigError;
pub use core::rng::DeterministicRng;
pub use game::rules::{Rules, TreasureHunt};
pub use game::session::{RoundMode, SessionConfig, SessionCoordinator};
pub use network::channel::{ArqConfig, ReliableChannel};
pub use network::client::Client;
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
