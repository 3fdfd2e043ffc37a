//! # Arena Server Library
//!
//! The authoritative side of the arena game. One process hosts one room of
//! up to four players; it owns the canonical world, simulates it at a fixed
//! rate, and keeps every client in step by broadcasting full snapshots.
//!
//! ## Simulation
//! Each frame applies the players' held inputs through the same motion
//! integrator the clients use for prediction, advances live projectiles,
//! and records a snapshot of every player into a short rolling history.
//! A full snapshot goes out to every player on every `broadcast_divisor`-th
//! frame, together with the shots and pickups queued since the last one.
//!
//! ## Lag compensation
//! A client fires at the world it rendered, which is slightly in the past.
//! Fire requests carry that time, and [`lag_compensation`] replays the shot
//! through the history from there, so hits are judged against where the
//! targets were when the shooter saw them.
//!
//! ## Modules
//! - [`room`]: message handlers and the per-frame tick
//! - [`client_manager`]: admitted clients keyed by address
//! - [`game`]: players, projectiles, bolts, flag, freeze timers
//! - [`lag_compensation`]: snapshot history and shot replay
//! - [`map`] and [`accounts`]: map generation and win/loss records
//! - [`network`]: the UDP I/O thread plus the fixed-rate loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::accounts::InMemoryAccounts;
//! use server::config::ServerConfig;
//! use server::map::RandomMapGenerator;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         ServerConfig::default(),
//!         Box::new(RandomMapGenerator::new()),
//!         Box::new(InMemoryAccounts::new()),
//!     )?;
//!     server.run().await
//! }
//! ```

pub mod accounts;
pub mod client_manager;
pub mod config;
pub mod game;
pub mod lag_compensation;
pub mod map;
pub mod network;
pub mod room;
