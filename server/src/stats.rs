//! Aggregate counters readable from outside the server tasks.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct ServerStats {
    players: AtomicUsize,
    lobbies: AtomicUsize,
}

impl ServerStats {
    /// Active connections currently sitting in a lobby.
    pub fn player_count(&self) -> usize {
        self.players.load(Ordering::Relaxed)
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.load(Ordering::Relaxed)
    }

    pub(crate) fn set_player_count(&self, players: usize) {
        self.players.store(players, Ordering::Relaxed);
    }

    pub(crate) fn lobby_added(&self) {
        self.lobbies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lobby_removed(&self) {
        let _ = self
            .lobbies
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}
