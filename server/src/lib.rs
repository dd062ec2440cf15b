//! # Authoritative Game Server
//!
//! The server owns the only trusted copy of the world. Clients send intent
//! (input commands) and receive copies of the world (snapshots); nothing a
//! client reports about its own position is ever applied.
//!
//! ## Transport
//!
//! Each client holds two channels to the server:
//! - A TCP stream for lifecycle events (join, join response, player joined,
//!   player left). These are ordered and delivered exactly once.
//! - A UDP socket for per-tick traffic (input commands, snapshots). These
//!   may be lost, duplicated or reordered.
//!
//! A client ties its datagram address to its stream by echoing the session
//! token from its join response in a `BindDatagram` packet. Input from an
//! address that is not bound to the owning connection is dropped.
//!
//! ## Join Rules
//!
//! Join requests are checked in a fixed order:
//! 1. The protocol version must match exactly ("Version mismatch")
//! 2. A connection that already joined gets its existing id back
//! 3. The joined count must be below capacity ("Server full")
//! 4. A known previous id is reclaimed, otherwise the next id is allocated
//!
//! A rejection leaves the player count and id counter untouched.
//!
//! ## Simulation
//!
//! Each accepted input event adds the real time since the previous event to
//! an accumulator that is drained in whole fixed steps of 1/60 s. A step
//! consumes at most one buffered command per player; a player without
//! buffered input is left as is for that step.
//!
//! A separate task copies the world every 50 ms and sends the copy to every
//! bound player. Players not stepped for more than 10 s, or whose stream is
//! gone, are removed by a periodic sweep and announced as "Timeout".
//!
//! ## Module Organization
//!
//! - `config`: tunables with reference defaults
//! - `physics`: one fixed step for one player
//! - `game`: player arena, input buffers and the step accumulator
//! - `client_manager`: connections, identities and admission
//! - `authority`: the single critical section combining the two above
//! - `network`: sockets and the tasks around them
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod authority;
pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
pub mod physics;
