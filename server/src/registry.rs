//! Connection registry and pending-disconnect bookkeeping
//!
//! This module holds the state shared between the accept loop and the
//! maintenance loop:
//! - every registered connection, keyed by its id
//! - the disconnect queue, a deduplicated set of ids awaiting forced teardown
//! - the ban-refresh flag that asks the next sweep to re-check admission
//!
//! All three live behind one mutex; they are logically a single unit of state.

use crate::connection::{Connection, ConnectionMap};
use log::info;
use std::collections::HashSet;

/// Connections plus their pending-disconnect markers
///
/// The registry owns every connection from registration until the
/// maintenance loop observes it inactive and destroys it.
#[derive(Default)]
pub struct Registry {
    /// Registered connections indexed by their unique id
    pub(crate) connections: ConnectionMap,
    /// Ids scheduled for forced disconnect
    disconnect_queue: HashSet<u64>,
    /// Set by a ban refresh request, cleared at the end of the next sweep
    refresh_bans: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under its id
    ///
    /// Ids come from the identity allocator, which checks this map, so an
    /// existing entry is never overwritten in practice.
    pub fn insert(&mut self, connection: Connection) {
        let id = connection.id();
        self.connections.insert(id, connection);
        info!(
            "[{}] Connection added, count: {}",
            id,
            self.connections.len()
        );
    }

    /// Removes and returns a connection; dropping it destroys its I/O tasks
    pub fn remove(&mut self, id: u64) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        if removed.is_some() {
            info!(
                "[{}] Connection removed, count: {}",
                id,
                self.connections.len()
            );
        }
        removed
    }

    pub fn get(&self, id: u64) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.connections.keys().copied().collect()
    }

    /// Number of registered connections, active or not
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Schedules a connection for forced disconnect
    ///
    /// Idempotent: returns false if the id was already queued. The caller
    /// must already hold the registry lock; see
    /// [`ServerHandle::queue_disconnect`](crate::network::ServerHandle::queue_disconnect)
    /// for the self-locking variant.
    pub fn queue_disconnect(&mut self, id: u64) -> bool {
        self.disconnect_queue.insert(id)
    }

    pub fn is_queued(&self, id: u64) -> bool {
        self.disconnect_queue.contains(&id)
    }

    pub fn queued_len(&self) -> usize {
        self.disconnect_queue.len()
    }

    /// Clears the queue only if nothing was added since `snapshot` was taken
    ///
    /// An id queued during a sweep, after its connection was already visited,
    /// survives until the following sweep has handled it.
    pub fn settle_disconnects(&mut self, snapshot: usize) -> bool {
        if self.disconnect_queue.len() == snapshot {
            self.disconnect_queue.clear();
            true
        } else {
            false
        }
    }

    pub fn request_ban_refresh(&mut self) {
        self.refresh_bans = true;
    }

    pub fn ban_refresh_pending(&self) -> bool {
        self.refresh_bans
    }

    pub fn clear_ban_refresh(&mut self) {
        self.refresh_bans = false;
    }

    /// Active connections that currently occupy a lobby
    pub fn player_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.is_active() && c.lobby().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.queued_len(), 0);
        assert!(!registry.ban_refresh_pending());
    }

    #[test]
    fn test_insert_and_remove() {
        let mut registry = Registry::new();
        let (conn, _remote) = Connection::detached(12);
        registry.insert(conn);

        assert!(registry.contains(12));
        assert_eq!(registry.get(12).map(Connection::id), Some(12));

        assert!(registry.remove(12).is_some());
        assert!(registry.remove(12).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_queue_disconnect_is_idempotent() {
        let mut registry = Registry::new();
        assert!(registry.queue_disconnect(7));
        assert!(!registry.queue_disconnect(7));
        assert_eq!(registry.queued_len(), 1);
        assert!(registry.is_queued(7));
    }

    #[test]
    fn test_settle_keeps_queue_after_new_insert() {
        let mut registry = Registry::new();
        registry.queue_disconnect(7);

        let snapshot = registry.queued_len();
        registry.queue_disconnect(8);
        assert!(!registry.settle_disconnects(snapshot));
        assert_eq!(registry.queued_len(), 2);

        let snapshot = registry.queued_len();
        assert!(registry.settle_disconnects(snapshot));
        assert_eq!(registry.queued_len(), 0);
    }

    #[test]
    fn test_player_count_ignores_inactive_and_lobbyless() {
        let mut registry = Registry::new();
        let (mut a, _ra) = Connection::detached(1);
        let (mut b, _rb) = Connection::detached(2);
        let (c, _rc) = Connection::detached(3);
        a.lobby = Some(100);
        b.lobby = Some(100);
        b.disconnect(true);
        registry.insert(a);
        registry.insert(b);
        registry.insert(c);

        assert_eq!(registry.player_count(), 1);
    }

    #[test]
    fn test_ban_refresh_flag() {
        let mut registry = Registry::new();
        registry.request_ban_refresh();
        assert!(registry.ban_refresh_pending());
        registry.clear_ban_refresh();
        assert!(!registry.ban_refresh_pending());
    }
}
