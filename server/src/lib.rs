//! # Lobby Relay Server Library
//!
//! This library implements a matchmaking and relay-discovery server. Clients
//! connect over TCP, receive an identity together with STUN/TURN credentials,
//! and then create, list, join and leave lobbies. The server does not relay
//! game traffic itself; peers use the credentials to reach each other.
//!
//! ## Architecture Design
//!
//! ### Two Loops, One Lock
//! An accept loop admits sockets and a maintenance loop sweeps every
//! registered connection on a fixed period (100 ms by default). They share a
//! single [`registry::Registry`] behind a tokio mutex holding the connection
//! map, the disconnect queue and the ban-refresh flag. The sweep itself is
//! synchronous, so the lock is never held across an await point.
//!
//! ### Deferred Disconnects
//! Code that wants a connection gone queues its id. The sweep force-disconnects
//! queued connections and clears the queue only after a sweep in which nothing
//! new was queued, so a request made mid-sweep is never lost.
//!
//! ### Lobbies by Id
//! Lobbies and connections refer to each other by id only. The lobby directory
//! is owned by the maintenance loop and reports membership changes through the
//! [`lobby::LobbyEvents`] trait; [`broadcast::Broadcaster`] turns them into
//! packets.
//!
//! ## Module Organization
//!
//! - `admission`: who may connect or stay connected, and destination routing ids
//! - `broadcast`: join and leave notifications to lobby members
//! - `connection`: per-socket state with reader and writer tasks
//! - `error`: startup errors
//! - `identity`: random non-zero id allocation
//! - `lobby`: the lobby directory
//! - `network`: configuration, the accept loop and the maintenance sweep
//! - `registry`: connections and the disconnect queue
//! - `relay`: STUN/TURN credential loading and distribution
//! - `stats`: player and lobby counters
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::admission::{AllowAll, PeerAddressResolver};
//! use server::network::{Server, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(
//!         ServerConfig::default(),
//!         Arc::new(AllowAll),
//!         Arc::new(PeerAddressResolver),
//!     )
//!     .await?;
//!
//!     let handle = server.handle();
//!     tokio::spawn(server.run());
//!
//!     tokio::signal::ctrl_c().await?;
//!     println!("{} players in {} lobbies", handle.player_count(), handle.lobby_count());
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod broadcast;
pub mod connection;
pub mod error;
pub mod identity;
pub mod lobby;
pub mod network;
pub mod registry;
pub mod relay;
pub mod stats;
