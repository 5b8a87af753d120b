//! # Lobby Relay Client Library
//!
//! A small async client for the lobby relay server. It speaks the framed
//! bincode protocol from the `shared` crate over TCP.
//!
//! ## Connection Lifecycle
//!
//! 1. [`network::RelayClient::connect`] opens the socket.
//! 2. [`network::RelayClient::handshake`] waits for the assigned user id,
//!    answers with a hello carrying the protocol version and a priority, and
//!    collects the STUN/TURN credentials that follow.
//! 3. Lobby helpers send requests and wait for the matching reply. Packets
//!    that arrive in the meantime, such as membership announcements, are
//!    kept and returned by [`network::RelayClient::recv`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{LobbyRequest, RelayClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RelayClient::connect("127.0.0.1:34197").await?;
//!     let session = client.handshake(0).await?;
//!     println!("user {} got {} relays", session.user_id, session.credentials.len());
//!
//!     let lobby_id = client
//!         .create_lobby(LobbyRequest {
//!             game: "example".to_string(),
//!             max_connections: 4,
//!             ..LobbyRequest::default()
//!         })
//!         .await?;
//!
//!     for lobby in client.list_lobbies("example", "").await? {
//!         println!("{} owned by {}", lobby.lobby_id, lobby.owner_id);
//!     }
//!     client.leave_lobby(lobby_id).await?;
//!     Ok(())
//! }
//! ```

pub mod network;
