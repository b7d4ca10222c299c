//! Network Layer
//!
//! Reliable delivery over UDP and the server built on it.
//!
//! - `packet`: wire codec (sequence bit, digest, payload)
//! - `loss`: simulated packet loss
//! - `channel`: stop-and-wait ARQ, one per remote endpoint
//! - `registry`: logged-in peers and reliable fan-out
//! - `login`: login handshake and contact book
//! - `protocol`: text commands
//! - `server`: dispatcher, peer tasks and background loops
//! - `client`: client side of a channel

pub mod channel;
pub mod client;
pub mod login;
pub mod loss;
pub mod packet;
pub mod protocol;
pub mod registry;
pub mod server;

pub use channel::{ArqConfig, ChannelError, ChannelStats, Inbound, ReliableChannel};
pub use client::{Client, ClientError};
pub use login::{Contact, ContactBook, LoginError};
pub use loss::LossModel;
pub use packet::{Packet, PacketError, SeqBit};
pub use protocol::{Command, CommandError};
pub use registry::{BroadcastOutcome, Peer, PeerRegistry, RegistryError};
pub use server::{GameServer, ServerConfig, ServerError, ShutdownHandle};
