//! # Block Game Client Library
//!
//! A headless client for the legacy block-game protocol. It is used by the
//! wandering bot binary and by the workspace integration tests to drive a
//! real server over TCP.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! [`network::Connection`] wraps the socket:
//! - handshake and login helpers
//! - typed sends and receives using the shared packet catalog
//! - receives with timeouts and predicate waits, safe to cancel
//!
//! ### Game Module (`game`)
//! [`game::ClientWorld`] replays clientbound packets into the client's view
//! of the world: its own position, loaded chunks, other players and chat.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::ClientWorld;
//! use client::network::Connection;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut connection = Connection::connect("127.0.0.1:25565").await?;
//!     let (_entity_id, login_packets) = connection.login("Steve").await?;
//!
//!     let mut world = ClientWorld::new();
//!     for packet in &login_packets {
//!         world.apply(packet);
//!     }
//!
//!     connection.move_to(0.5, 64.0, 0.5).await?;
//!     while let Some(packet) = connection.recv_timeout(Duration::from_millis(100)).await? {
//!         world.apply(&packet);
//!     }
//!
//!     connection.disconnect("Quitting").await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
