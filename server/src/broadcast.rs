//! Lobby membership notifications sent over the wire.

use crate::connection::ConnectionMap;
use crate::lobby::{Lobby, LobbyEvents};
use log::debug;
use shared::ServerPacket;

/// Tells lobby members about joins and departures.
///
/// On a join every member, the joiner included, learns about the newcomer;
/// the joiner then receives one announcement per existing member so it can
/// rebuild the roster. A departure is announced to the members that remain.
#[derive(Debug, Default)]
pub struct Broadcaster;

fn joined(lobby: &Lobby, user_id: u64, connections: &ConnectionMap) -> Option<ServerPacket> {
    let member = connections.get(&user_id)?;
    Some(ServerPacket::LobbyJoined {
        lobby_id: lobby.id(),
        user_id,
        owner_id: lobby.owner(),
        dest_id: member.destination_id(),
        priority: member.priority(),
    })
}

impl LobbyEvents for Broadcaster {
    fn on_join(&mut self, lobby: &Lobby, joiner: u64, connections: &ConnectionMap) {
        let Some(announcement) = joined(lobby, joiner, connections) else {
            return;
        };
        for member in lobby.members() {
            if let Some(connection) = connections.get(member) {
                connection.send(announcement.clone());
            }
        }

        let Some(newcomer) = connections.get(&joiner) else {
            return;
        };
        for &member in lobby.members().iter().filter(|&&member| member != joiner) {
            if let Some(packet) = joined(lobby, member, connections) {
                newcomer.send(packet);
            }
        }
    }

    fn on_leave(&mut self, lobby: &Lobby, leaver: u64, connections: &ConnectionMap) {
        let packet = ServerPacket::LobbyLeft {
            lobby_id: lobby.id(),
            user_id: leaver,
        };
        for member in lobby.members() {
            if let Some(connection) = connections.get(member) {
                connection.send(packet.clone());
            }
        }
    }

    fn on_destroy(&mut self, lobby: &Lobby) {
        debug!("[{}] Lobby destroyed", lobby.id());
    }
}
