//! Wire protocol shared by the relay server and its clients.
//!
//! Every packet is a bincode-encoded enum carried in a length-delimited frame
//! (4-byte big-endian length prefix). [`ServerPacket`] flows from the server to
//! clients, [`ClientPacket`] the other way.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

/// Protocol version announced in [`ServerPacket::Joined`] and expected in
/// [`ClientPacket::Hello`].
pub const PROTOCOL_VERSION: u32 = 1;

pub const DEFAULT_PORT: u16 = 34197;

/// Upper bound for a lobby's member count.
pub const MAX_LOBBY_SIZE: u16 = 16;

/// Limit, in characters, for game, version, host name and mode fields.
pub const MAX_FIELD_LEN: usize = 32;

/// Limit, in characters, for the lobby description.
pub const MAX_DESCRIPTION_LEN: usize = 256;

/// Largest frame accepted in either direction.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    Joined {
        user_id: u64,
        version: u32,
    },
    RelayCredential {
        is_stun: bool,
        port: u16,
        host: String,
        username: String,
        password: String,
    },
    LobbyListed {
        lobby_id: u64,
        owner_id: u64,
        connections: u16,
        max_connections: u16,
        game: String,
        version: String,
        host_name: String,
        mode: String,
        description: String,
    },
    LobbyListFinished,
    LobbyCreated {
        lobby_id: u64,
        max_connections: u16,
        game: String,
        version: String,
        host_name: String,
        mode: String,
    },
    LobbyJoined {
        lobby_id: u64,
        user_id: u64,
        owner_id: u64,
        dest_id: u64,
        priority: u32,
    },
    LobbyLeft {
        lobby_id: u64,
        user_id: u64,
    },
    LobbyJoinFailed {
        lobby_id: u64,
        reason: JoinFailure,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Hello {
        version: u32,
        priority: u32,
    },
    LobbyCreate {
        game: String,
        version: String,
        host_name: String,
        mode: String,
        max_connections: u16,
        password: String,
        description: String,
    },
    LobbyJoin {
        lobby_id: u64,
        password: String,
    },
    LobbyLeave {
        lobby_id: u64,
    },
    LobbyListGet {
        game: String,
        password: String,
    },
    LobbyUpdate {
        lobby_id: u64,
        game: String,
        version: String,
        host_name: String,
        mode: String,
        description: String,
    },
}

/// Why a join request was refused.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum JoinFailure {
    NotFound,
    WrongPassword,
    Full,
    AlreadyJoined,
}

impl std::fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            JoinFailure::NotFound => "lobby not found",
            JoinFailure::WrongPassword => "wrong password",
            JoinFailure::Full => "lobby is full",
            JoinFailure::AlreadyJoined => "already a member",
        };
        f.write_str(text)
    }
}

pub fn encode<T: Serialize>(packet: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(packet)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}

/// Frame codec used on both ends of a connection.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}
