//! Core primitives.
//!
//! Pure helpers shared by the transport and the session layers.

pub mod hash;
pub mod rng;

pub use hash::{packet_digest, PacketDigest, DIGEST_LEN};
pub use rng::{derive_puzzle_seed, DeterministicRng};
