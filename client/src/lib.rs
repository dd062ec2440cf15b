//! # Client Synchronizer
//!
//! Keeps a local view of a world owned by a remote authoritative server.
//! The client never simulates; it sends intent and displays what the server
//! reports back.
//!
//! ## Data Flow
//!
//! ```text
//!  InputSampler ──InputCommand──► SyncClient ──UDP──► server
//!                                     ▲
//!  server ──TCP: join/leave events────┤
//!  server ──UDP: WorldSnapshot────────┘
//!                                     │
//!                          ClientGameState (previous, current)
//!                                     │
//!                          interpolate(id, alpha) ──► renderer
//! ```
//!
//! Background tasks own the sockets and push everything they read onto a
//! single queue. [`network::SyncClient::poll`] drains it once per frame, so
//! all client state is only touched from the caller's task.
//!
//! ## Interpolation
//!
//! The two most recent snapshots are buffered. Rendering a player blends
//! its position from the previous to the current snapshot; every discrete
//! field (animation, facing, flags) is taken from the current one. A snapshot
//! that is not newer than the buffered current one is ignored.
//!
//! ## Latency
//!
//! Each snapshot that contains the local player yields a sample of half the
//! age of that player's last server update, folded into an exponential
//! moving average.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::input::{InputIntent, InputSampler};
//! use client::network::SyncClient;
//! use std::time::Instant;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = SyncClient::new(ClientConfig::default(), "Ada", 0);
//!     let id = client.connect_and_join("127.0.0.1").await?;
//!
//!     let mut sampler = InputSampler::new();
//!     loop {
//!         for event in client.poll() {
//!             println!("{:?}", event);
//!         }
//!         let intent = InputIntent { horizontal_axis: 1.0, ..Default::default() };
//!         if let Some(command) = sampler.sample(intent, Instant::now()) {
//!             client.send_input(command);
//!         }
//!         if let Some(me) = client.interpolate(id, 0.5) {
//!             println!("at ({}, {})", me.x, me.y);
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(16)).await;
//!     }
//! }
//! ```

pub mod config;
pub mod game;
pub mod input;
pub mod latency;
pub mod network;

pub use network::{ClientError, ClientEvent, ConnectionState, SyncClient};
