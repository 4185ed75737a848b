//! # Game Client Library
//!
//! Headless client for the board game server. It speaks the length-prefixed
//! bincode protocol over TCP and keeps a local copy of the room state.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - TCP connection and frame codec
//! - Request/response correlation by request id
//! - Automatic answers to the server's liveness pings
//!
//! ### Game Module (`game`)
//! Mirror of the server's room state, updated by applying every push event
//! in the order it arrived.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::ClientGameState;
//! use client::network::Connection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut connection = Connection::connect("127.0.0.1:8080").await?;
//!     connection.login("lorenzo").await?;
//!     connection.join_first_available_room().await?;
//!
//!     let mut state = ClientGameState::new("lorenzo");
//!     while let Some(event) = connection.next_push().await {
//!         state.apply(&event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
