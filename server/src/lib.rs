//! # Block Game Server Library
//!
//! This library provides the authoritative server for the legacy block-game
//! protocol (version 14). It accepts TCP connections, walks each one through
//! the handshake and login sequence, and then keeps every player's terrain,
//! position and view of other players consistent in real time.
//!
//! ## Core Responsibilities
//!
//! ### Session State Machine
//! Every connection moves through `AwaitingHandshake → AwaitingLogin →
//! Active → Disconnecting → Closed`. Packets are handled strictly in arrival
//! order; gameplay packets before login are ignored, and policy or movement
//! violations end the session with a reason the client can display.
//!
//! ### Chunk Streaming
//! The world tracks which chunks each player must have loaded (a square of
//! `view_distance` chunks around them) and which players are subscribed to
//! each chunk. Crossing a chunk border streams the new edge and unloads the
//! old one. Chunks nobody is subscribed to are evicted after an idle window.
//!
//! ### Entity Visibility
//! Players within 192 blocks of each other see each other. Each move is
//! turned into the smallest update for every peer: spawn, destroy, relative
//! move, or absolute teleport.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Registry of live sessions, admission against the player limit, id
//! assignment and broadcast.
//!
//! ### Session Module (`session`)
//! Read loop, writer, keep-alive and the exactly-once teardown sequence.
//!
//! ### Movement Module (`movement`)
//! Ordered validation of position updates.
//!
//! ### World Module (`world`)
//! Per-chunk cache, subscriber sets and eviction, backed by the flat
//! generator in `terrain`.
//!
//! ### Visibility Module (`visibility`)
//! Spawn, destroy and movement diffing between players.
//!
//! ### Network Module (`network`)
//! TCP accept loop, server-full rejection and graceful shutdown.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Arc::new(Server::bind(ServerConfig::default()).await?);
//!
//!     let runner = Arc::clone(&server);
//!     let handle = tokio::spawn(async move { runner.run().await });
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     handle.await??;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod movement;
pub mod network;
pub mod player;
pub mod session;
pub mod terrain;
pub mod visibility;
pub mod world;
