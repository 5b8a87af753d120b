//! Lobby directory: creation, membership, listing and metadata updates
//!
//! Lobbies own nothing but ids. The owner and the member list refer to
//! connections by id and are resolved through the [`ConnectionMap`] passed
//! into each operation, so destroying a connection can never leave a dangling
//! reference behind. Membership changes are reported through a
//! [`LobbyEvents`] implementation supplied at construction.

use crate::connection::ConnectionMap;
use crate::identity::IdAllocator;
use crate::stats::ServerStats;
use log::{info, warn};
use shared::{JoinFailure, ServerPacket, MAX_DESCRIPTION_LEN, MAX_FIELD_LEN, MAX_LOBBY_SIZE};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Hooks fired on membership changes.
pub trait LobbyEvents {
    /// `joiner` has just been appended to `lobby`'s member list.
    fn on_join(&mut self, lobby: &Lobby, joiner: u64, connections: &ConnectionMap);

    /// `leaver` has just been removed from `lobby`'s member list.
    fn on_leave(&mut self, lobby: &Lobby, leaver: u64, connections: &ConnectionMap);

    /// `lobby` lost its last member and is no longer in the directory.
    fn on_destroy(&mut self, lobby: &Lobby);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LobbyError {
    #[error("could not find lobby {0}")]
    NotFound(u64),
    #[error("connection {requester} is not the owner of lobby {lobby_id}")]
    NotOwner { lobby_id: u64, requester: u64 },
}

/// Everything a client supplies when creating a lobby.
#[derive(Debug, Clone, Default)]
pub struct LobbySettings {
    pub game: String,
    pub version: String,
    pub host_name: String,
    pub mode: String,
    pub max_connections: u16,
    pub password: String,
    pub description: String,
}

/// The fields an owner may change after creation.
#[derive(Debug, Clone, Default)]
pub struct LobbyInfo {
    pub game: String,
    pub version: String,
    pub host_name: String,
    pub mode: String,
    pub description: String,
}

#[derive(Debug)]
pub struct Lobby {
    id: u64,
    owner: u64,
    game: String,
    version: String,
    host_name: String,
    mode: String,
    description: String,
    password: String,
    max_connections: u16,
    members: Vec<u64>,
}

impl Lobby {
    fn new(id: u64, owner: u64, settings: LobbySettings) -> Self {
        let mut lobby = Self {
            id,
            owner,
            game: String::new(),
            version: String::new(),
            host_name: String::new(),
            mode: String::new(),
            description: String::new(),
            password: settings.password,
            max_connections: settings.max_connections.clamp(1, MAX_LOBBY_SIZE),
            members: Vec::new(),
        };
        lobby.apply(LobbyInfo {
            game: settings.game,
            version: settings.version,
            host_name: settings.host_name,
            mode: settings.mode,
            description: settings.description,
        });
        lobby
    }

    fn apply(&mut self, info: LobbyInfo) {
        self.game = truncate_chars(&info.game, MAX_FIELD_LEN);
        self.version = truncate_chars(&info.version, MAX_FIELD_LEN);
        self.host_name = truncate_chars(&info.host_name, MAX_FIELD_LEN);
        self.mode = truncate_chars(&info.mode, MAX_FIELD_LEN);
        self.description = truncate_chars(&info.description, MAX_DESCRIPTION_LEN);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn game(&self) -> &str {
        &self.game
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn max_connections(&self) -> u16 {
        self.max_connections
    }

    /// Member ids in join order.
    pub fn members(&self) -> &[u64] {
        &self.members
    }

    pub fn is_member(&self, id: u64) -> bool {
        self.members.contains(&id)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= usize::from(self.max_connections)
    }

    /// Removes a member; if it owned the lobby, the earliest remaining
    /// member takes over.
    fn remove_member(&mut self, id: u64) {
        self.members.retain(|&member| member != id);
        if self.owner == id {
            if let Some(&next) = self.members.first() {
                info!("[{}] Lobby owner changed to {}", self.id, next);
                self.owner = next;
            }
        }
    }

    fn listing(&self) -> ServerPacket {
        ServerPacket::LobbyListed {
            lobby_id: self.id,
            owner_id: self.owner,
            connections: self.members.len() as u16,
            max_connections: self.max_connections,
            game: self.game.clone(),
            version: self.version.clone(),
            host_name: self.host_name.clone(),
            mode: self.mode.clone(),
            description: self.description.clone(),
        }
    }
}

/// Keeps at most `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

pub struct LobbyDirectory<E: LobbyEvents> {
    lobbies: HashMap<u64, Lobby>,
    ids: IdAllocator,
    events: E,
    stats: Arc<ServerStats>,
}

impl<E: LobbyEvents> LobbyDirectory<E> {
    pub fn new(events: E, ids: IdAllocator, stats: Arc<ServerStats>) -> Self {
        Self {
            lobbies: HashMap::new(),
            ids,
            events,
            stats,
        }
    }

    pub fn get(&self, lobby_id: u64) -> Option<&Lobby> {
        self.lobbies.get(&lobby_id)
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    /// Sends every lobby whose game and password match exactly, then the
    /// finish marker. Returns the number of lobbies listed.
    pub fn list(
        &self,
        connections: &ConnectionMap,
        requester: u64,
        game: &str,
        password: &str,
    ) -> usize {
        let Some(connection) = connections.get(&requester) else {
            return 0;
        };

        let mut listed = 0;
        for lobby in self
            .lobbies
            .values()
            .filter(|lobby| lobby.game == game && lobby.password == password)
        {
            connection.send(lobby.listing());
            listed += 1;
        }
        connection.send(ServerPacket::LobbyListFinished);
        listed
    }

    /// Creates a lobby owned by `requester` and joins it. Any lobby the
    /// requester was in is left first. Returns the new lobby's id.
    pub fn create(
        &mut self,
        connections: &mut ConnectionMap,
        requester: u64,
        settings: LobbySettings,
    ) -> Option<u64> {
        if !connections.contains_key(&requester) {
            return None;
        }
        self.leave(connections, requester);

        let lobbies = &self.lobbies;
        let lobby_id = self.ids.allocate(|id| lobbies.contains_key(&id));
        let password = settings.password.clone();
        let lobby = Lobby::new(lobby_id, requester, settings);

        let created = ServerPacket::LobbyCreated {
            lobby_id,
            max_connections: lobby.max_connections,
            game: lobby.game.clone(),
            version: lobby.version.clone(),
            host_name: lobby.host_name.clone(),
            mode: lobby.mode.clone(),
        };
        self.lobbies.insert(lobby_id, lobby);
        info!(
            "[{}] Lobby added, count: {}",
            lobby_id,
            self.lobbies.len()
        );

        if let Some(connection) = connections.get(&requester) {
            connection.send(created);
        }
        if let Err(reason) = self.join(connections, requester, lobby_id, &password) {
            warn!(
                "[{}] Owner {} could not join its own lobby: {}",
                lobby_id, requester, reason
            );
        }
        self.stats.lobby_added();

        Some(lobby_id)
    }

    /// Adds `requester` to a lobby after checking password and capacity.
    pub fn join(
        &mut self,
        connections: &mut ConnectionMap,
        requester: u64,
        lobby_id: u64,
        password: &str,
    ) -> Result<(), JoinFailure> {
        let lobby = self.lobbies.get(&lobby_id).ok_or(JoinFailure::NotFound)?;
        let current = connections
            .get(&requester)
            .ok_or(JoinFailure::NotFound)?
            .lobby;

        if current == Some(lobby_id) {
            return Err(JoinFailure::AlreadyJoined);
        }
        if lobby.password != password {
            return Err(JoinFailure::WrongPassword);
        }
        if lobby.is_full() {
            return Err(JoinFailure::Full);
        }

        if current.is_some() {
            self.leave(connections, requester);
        }

        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(JoinFailure::NotFound)?;
        lobby.members.push(requester);
        if let Some(connection) = connections.get_mut(&requester) {
            connection.lobby = Some(lobby_id);
        }
        info!(
            "[{}] Connection {} joined, members: {}",
            lobby_id,
            requester,
            lobby.members.len()
        );

        self.events.on_join(lobby, requester, connections);
        Ok(())
    }

    /// Removes `requester` from whatever lobby it occupies, destroying the
    /// lobby if it becomes empty. Returns the lobby that was left.
    pub fn leave(&mut self, connections: &mut ConnectionMap, requester: u64) -> Option<u64> {
        let lobby_id = connections.get_mut(&requester)?.lobby.take()?;
        let Some(lobby) = self.lobbies.get_mut(&lobby_id) else {
            warn!(
                "[{}] Connection {} referenced a missing lobby",
                lobby_id, requester
            );
            return None;
        };

        lobby.remove_member(requester);
        info!(
            "[{}] Connection {} left, members: {}",
            lobby_id,
            requester,
            lobby.members.len()
        );
        self.events.on_leave(lobby, requester, connections);

        if lobby.members.is_empty() {
            self.destroy(lobby_id);
        }
        Some(lobby_id)
    }

    /// Overwrites the descriptive fields. Only the owner may do this.
    pub fn update(
        &mut self,
        requester: u64,
        lobby_id: u64,
        info: LobbyInfo,
    ) -> Result<(), LobbyError> {
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(LobbyError::NotFound(lobby_id))?;
        if lobby.owner != requester {
            return Err(LobbyError::NotOwner {
                lobby_id,
                requester,
            });
        }
        lobby.apply(info);
        Ok(())
    }

    fn destroy(&mut self, lobby_id: u64) {
        let Some(lobby) = self.lobbies.remove(&lobby_id) else {
            return;
        };
        self.stats.lobby_removed();
        info!(
            "[{}] Lobby removed, count: {}",
            lobby_id,
            self.lobbies.len()
        );
        self.events.on_destroy(&lobby);
    }
}
