//! # Game Server Library
//!
//! Authoritative rules engine and synchronization server for a 2-4 player
//! Renaissance worker-placement board game. Clients connect over TCP, log
//! in, join a room and send game commands; the server validates them
//! against the room's canonical state and broadcasts every resulting state
//! change to all players of the room in the order it was applied.
//!
//! ## Module Organization
//!
//! ### Rules engine
//! - `ledger`: resource arithmetic on a player wallet (pay, grant, servants)
//! - `effects`: effect instances attached to players and their triggers
//! - `resolution`: eligibility checks and resolution of placements and
//!   leader card actions
//! - `scheduler`: phases, turn order, rounds, Vatican reports and final
//!   scoring for one room
//!
//! ### Server
//! - `config`: runtime knobs and the immutable static game data
//! - `room`: one actor task per room owning its scheduler
//! - `session_manager`: connections, logins and the room registry
//! - `network`: TCP framing, request routing, ping/pong liveness
//!
//! ## Architecture Design
//!
//! Every room is a tokio task with a mailbox, so a room's game state has a
//! single writer and rooms share nothing mutable. Turn timers are spawned
//! sleep tasks tagged with the scheduler's generation; a timer that fires
//! after the game moved on is ignored. Each connection has its own writer
//! task fed by an unbounded channel, which keeps pushes ordered per
//! connection.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::{ServerConfig, StaticData};
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let data = Arc::new(StaticData::standard());
//!     let server = Server::new("127.0.0.1:8080", ServerConfig::default(), data).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod effects;
pub mod ledger;
pub mod network;
pub mod resolution;
pub mod room;
pub mod scheduler;
pub mod session_manager;
