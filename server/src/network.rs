//! Server network layer: the accept loop and the maintenance loop
//!
//! Two long-running tasks share one [`Registry`] behind a tokio mutex. The
//! accept loop admits sockets, greets them and registers them. The maintenance
//! loop wakes on a fixed period, locks the registry for a whole sweep, and in
//! that sweep removes dead connections, dispatches client packets and carries
//! out queued disconnects. The lobby directory belongs to the maintenance loop
//! alone and needs no lock.

use crate::admission::{Admission, DestinationResolver};
use crate::broadcast::Broadcaster;
use crate::connection::Connection;
use crate::error::ServerError;
use crate::identity::IdAllocator;
use crate::lobby::{LobbyDirectory, LobbyEvents, LobbyInfo, LobbySettings};
use crate::registry::Registry;
use crate::relay::{RelayDirectory, StunTurnServer};
use crate::stats::ServerStats;
use log::{debug, error, info, warn};
use shared::{ClientPacket, ServerPacket, DEFAULT_PORT, PROTOCOL_VERSION};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Packets dispatched per connection in one sweep; the rest wait for the next
pub const MAX_PACKETS_PER_TICK: usize = 64;

/// Startup configuration for [`Server::bind`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Period of the maintenance loop
    pub tick: Duration,
    /// Pending-connection backlog passed to `listen`
    pub backlog: u32,
    /// Path of the `host:username:password:port` TURN list
    pub turn_servers: PathBuf,
    /// STUN entry sent ahead of the TURN list
    pub stun: StunTurnServer,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            tick: Duration::from_millis(100),
            backlog: 64,
            turn_servers: PathBuf::from("turn-servers.cfg"),
            stun: StunTurnServer::default(),
        }
    }
}

/// Cloneable access to a running server's shared state
#[derive(Clone)]
pub struct ServerHandle {
    registry: Arc<Mutex<Registry>>,
    stats: Arc<ServerStats>,
}

impl ServerHandle {
    /// Active connections that occupy a lobby, as of the last sweep
    pub fn player_count(&self) -> usize {
        self.stats.player_count()
    }

    pub fn lobby_count(&self) -> usize {
        self.stats.lobby_count()
    }

    /// Registered connections, including ones not yet swept away
    pub async fn connection_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Schedules a forced disconnect, taking the registry lock
    ///
    /// Returns false if the id was already queued.
    pub async fn queue_disconnect(&self, id: u64) -> bool {
        self.registry.lock().await.queue_disconnect(id)
    }

    /// Asks the next sweep to re-check every connection against the
    /// admission policy
    pub async fn refresh_bans(&self) {
        self.registry.lock().await.request_ban_refresh();
    }
}

/// A bound, not yet running, relay server
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    admission: Arc<dyn Admission>,
    resolver: Arc<dyn DestinationResolver>,
    relays: RelayDirectory,
    handle: ServerHandle,
}

impl Server {
    /// Creates the listening socket and loads the TURN list
    ///
    /// Every socket setup failure is returned; nothing is retried.
    pub async fn bind(
        config: ServerConfig,
        admission: Arc<dyn Admission>,
        resolver: Arc<dyn DestinationResolver>,
    ) -> Result<Self, ServerError> {
        let addr = config.bind_addr;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(ServerError::Socket)?;
        socket
            .set_reuseaddr(true)
            .map_err(ServerError::SocketOption)?;
        socket
            .bind(addr)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let listener = socket
            .listen(config.backlog)
            .map_err(|source| ServerError::Listen { addr, source })?;

        match listener.local_addr() {
            Ok(local) => info!("Server listening on {}", local),
            Err(_) => info!("Server listening on {}", addr),
        }

        let relays = RelayDirectory::load(config.stun.clone(), config.turn_servers.clone()).await;
        let handle = ServerHandle {
            registry: Arc::new(Mutex::new(Registry::new())),
            stats: Arc::new(ServerStats::default()),
        };

        Ok(Self {
            listener,
            config,
            admission,
            resolver,
            relays,
            handle,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Runs the accept and maintenance loops until the process exits
    pub async fn run(self) {
        let Server {
            listener,
            config,
            admission,
            resolver,
            relays,
            handle,
        } = self;

        let acceptor = Acceptor {
            listener,
            registry: handle.registry.clone(),
            admission: admission.clone(),
            resolver,
            relays,
            ids: IdAllocator::from_entropy(),
        };
        let maintenance = Maintenance::new(Broadcaster, admission, handle.stats.clone());

        info!("Server started successfully");
        tokio::join!(
            acceptor.run(),
            maintenance.run(handle.registry.clone(), config.tick)
        );
    }

    /// Runs the server on a background task
    pub fn spawn(self) -> ServerHandle {
        let handle = self.handle();
        tokio::spawn(self.run());
        handle
    }
}

struct Acceptor {
    listener: TcpListener,
    registry: Arc<Mutex<Registry>>,
    admission: Arc<dyn Admission>,
    resolver: Arc<dyn DestinationResolver>,
    relays: RelayDirectory,
    ids: IdAllocator,
}

impl Acceptor {
    async fn run(mut self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => self.admit(stream, peer).await,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    async fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = {
            let registry = self.registry.lock().await;
            self.ids.allocate(|id| registry.contains(id))
        };

        let mut connection = Connection::spawn(id, stream, peer);
        connection.begin(self.resolver.as_ref());

        let allowed = self.admission.is_allowed(&connection, true);
        if allowed {
            connection.send(ServerPacket::Joined {
                user_id: id,
                version: PROTOCOL_VERSION,
            });
            for credential in self.relays.distribution(self.ids.rng()).await {
                connection.send(credential);
            }
        } else {
            info!("[{}] Connection from {} not allowed", id, peer);
        }

        let mut registry = self.registry.lock().await;
        if !allowed {
            registry.queue_disconnect(id);
        }
        registry.insert(connection);
    }
}

/// The periodic sweep over all connections
///
/// Owns the lobby directory. Everything here runs while the caller holds the
/// registry lock and never awaits.
pub(crate) struct Maintenance<E: LobbyEvents> {
    lobbies: LobbyDirectory<E>,
    admission: Arc<dyn Admission>,
    stats: Arc<ServerStats>,
}

impl<E: LobbyEvents> Maintenance<E> {
    pub(crate) fn new(events: E, admission: Arc<dyn Admission>, stats: Arc<ServerStats>) -> Self {
        Self {
            lobbies: LobbyDirectory::new(events, IdAllocator::from_entropy(), stats.clone()),
            admission,
            stats,
        }
    }

    async fn run(mut self, registry: Arc<Mutex<Registry>>, period: Duration) {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let mut registry = registry.lock().await;
            self.sweep(&mut registry);
        }
    }

    pub(crate) fn sweep(&mut self, registry: &mut Registry) {
        let queued = registry.queued_len();
        let refresh_bans = registry.ban_refresh_pending();

        for id in registry.ids() {
            self.tick_connection(registry, id, refresh_bans);
        }

        self.stats.set_player_count(registry.player_count());
        if !registry.settle_disconnects(queued) {
            debug!("Disconnect queue grew during sweep, keeping it");
        }
        registry.clear_ban_refresh();
    }

    fn tick_connection(&mut self, registry: &mut Registry, id: u64, refresh_bans: bool) {
        let Some(connection) = registry.get(id) else {
            return;
        };

        if refresh_bans && connection.is_active() && !self.admission.is_allowed(connection, false)
        {
            info!("[{}] Connection no longer allowed", id);
            self.disconnect(registry, id, false);
        }

        if !registry.get(id).map_or(false, Connection::is_active) {
            self.lobbies.leave(&mut registry.connections, id);
            registry.remove(id);
            return;
        }

        if let Some(connection) = registry.connections.get_mut(&id) {
            connection.receive();
        }
        if registry.get(id).map_or(false, Connection::is_active) {
            self.update(registry, id);
        } else {
            self.lobbies.leave(&mut registry.connections, id);
        }

        if registry.is_queued(id) {
            self.disconnect(registry, id, true);
        }
    }

    /// Dispatches up to [`MAX_PACKETS_PER_TICK`] pending packets.
    fn update(&mut self, registry: &mut Registry, id: u64) {
        for _ in 0..MAX_PACKETS_PER_TICK {
            let Some(packet) = registry
                .connections
                .get_mut(&id)
                .and_then(Connection::next_packet)
            else {
                break;
            };
            self.dispatch(registry, id, packet);
        }
    }

    fn dispatch(&mut self, registry: &mut Registry, id: u64, packet: ClientPacket) {
        match packet {
            ClientPacket::Hello { version, priority } => {
                if version != PROTOCOL_VERSION {
                    warn!(
                        "[{}] Protocol version mismatch: {} != {}",
                        id, version, PROTOCOL_VERSION
                    );
                    registry.queue_disconnect(id);
                    return;
                }
                if let Some(connection) = registry.connections.get_mut(&id) {
                    connection.priority = priority;
                }
            }
            ClientPacket::LobbyCreate {
                game,
                version,
                host_name,
                mode,
                max_connections,
                password,
                description,
            } => {
                let settings = LobbySettings {
                    game,
                    version,
                    host_name,
                    mode,
                    max_connections,
                    password,
                    description,
                };
                self.lobbies.create(&mut registry.connections, id, settings);
            }
            ClientPacket::LobbyJoin { lobby_id, password } => {
                if let Err(reason) =
                    self.lobbies
                        .join(&mut registry.connections, id, lobby_id, &password)
                {
                    info!("[{}] Join of lobby {} refused: {}", id, lobby_id, reason);
                    if let Some(connection) = registry.get(id) {
                        connection.send(ServerPacket::LobbyJoinFailed { lobby_id, reason });
                    }
                }
            }
            ClientPacket::LobbyLeave { lobby_id } => {
                let current = registry.get(id).and_then(Connection::lobby);
                if current != Some(lobby_id) {
                    warn!("[{}] Asked to leave lobby {} it is not in", id, lobby_id);
                    return;
                }
                self.lobbies.leave(&mut registry.connections, id);
            }
            ClientPacket::LobbyListGet { game, password } => {
                self.lobbies
                    .list(&registry.connections, id, &game, &password);
            }
            ClientPacket::LobbyUpdate {
                lobby_id,
                game,
                version,
                host_name,
                mode,
                description,
            } => {
                let info = LobbyInfo {
                    game,
                    version,
                    host_name,
                    mode,
                    description,
                };
                if let Err(e) = self.lobbies.update(id, lobby_id, info) {
                    warn!("[{}] Lobby update ignored: {}", id, e);
                }
            }
        }
    }

    /// Leaves the lobby, then tears the connection down.
    fn disconnect(&mut self, registry: &mut Registry, id: u64, force: bool) {
        self.lobbies.leave(&mut registry.connections, id);
        if let Some(connection) = registry.connections.get_mut(&id) {
            connection.disconnect(force);
        }
    }

    #[cfg(test)]
    fn lobbies(&self) -> &LobbyDirectory<E> {
        &self.lobbies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AllowAll;
    use crate::connection::Remote;
    use shared::JoinFailure;
    use std::collections::{HashMap, HashSet};

    /// Rejects a fixed set of connection ids.
    struct Deny(HashSet<u64>);

    impl Admission for Deny {
        fn is_allowed(&self, connection: &Connection, _is_new: bool) -> bool {
            !self.0.contains(&connection.id())
        }
    }

    fn setup(
        admission: Arc<dyn Admission>,
        ids: &[u64],
    ) -> (
        Maintenance<Broadcaster>,
        Registry,
        HashMap<u64, Remote>,
        Arc<ServerStats>,
    ) {
        let stats = Arc::new(ServerStats::default());
        let maintenance = Maintenance::new(Broadcaster, admission, stats.clone());
        let mut registry = Registry::new();
        let mut remotes = HashMap::new();
        for &id in ids {
            let (conn, remote) = Connection::detached(id);
            registry.insert(conn);
            remotes.insert(id, remote);
        }
        (maintenance, registry, remotes, stats)
    }

    fn create(game: &str, password: &str) -> ClientPacket {
        ClientPacket::LobbyCreate {
            game: game.to_string(),
            version: "1".to_string(),
            host_name: "host".to_string(),
            mode: "coop".to_string(),
            max_connections: 4,
            password: password.to_string(),
            description: String::new(),
        }
    }

    fn created_id(packets: &[ServerPacket]) -> u64 {
        packets
            .iter()
            .find_map(|p| match p {
                ServerPacket::LobbyCreated { lobby_id, .. } => Some(*lobby_id),
                _ => None,
            })
            .expect("no LobbyCreated packet")
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.tick, Duration::from_millis(100));
        assert!(config.stun.is_stun);
        assert_eq!(config.turn_servers, PathBuf::from("turn-servers.cfg"));
    }

    #[test]
    fn test_create_then_list_over_packets() {
        let (mut maintenance, mut registry, mut remotes, stats) = setup(Arc::new(AllowAll), &[1, 2]);

        remotes[&1].push(create("A", ""));
        maintenance.sweep(&mut registry);
        let lobby_id = created_id(&remotes.get_mut(&1).unwrap().drain());
        assert_eq!(stats.lobby_count(), 1);
        assert_eq!(stats.player_count(), 1);

        remotes[&2].push(ClientPacket::LobbyListGet {
            game: "A".to_string(),
            password: String::new(),
        });
        maintenance.sweep(&mut registry);

        let packets = remotes.get_mut(&2).unwrap().drain();
        assert_eq!(packets.len(), 2);
        assert!(matches!(
            packets[0],
            ServerPacket::LobbyListed { lobby_id: listed, owner_id: 1, .. } if listed == lobby_id
        ));
        assert_eq!(packets[1], ServerPacket::LobbyListFinished);
    }

    #[test]
    fn test_join_failure_is_reported() {
        let (mut maintenance, mut registry, mut remotes, _stats) = setup(Arc::new(AllowAll), &[1, 2]);
        remotes[&1].push(create("A", "secret"));
        maintenance.sweep(&mut registry);
        let lobby_id = created_id(&remotes.get_mut(&1).unwrap().drain());

        remotes[&2].push(ClientPacket::LobbyJoin {
            lobby_id,
            password: "guess".to_string(),
        });
        maintenance.sweep(&mut registry);

        assert_eq!(
            remotes.get_mut(&2).unwrap().drain(),
            vec![ServerPacket::LobbyJoinFailed {
                lobby_id,
                reason: JoinFailure::WrongPassword
            }]
        );
        assert_eq!(registry.get(2).and_then(Connection::lobby), None);
    }

    #[test]
    fn test_hello_records_priority() {
        let (mut maintenance, mut registry, mut remotes, _stats) = setup(Arc::new(AllowAll), &[1]);
        remotes[&1].push(ClientPacket::Hello {
            version: PROTOCOL_VERSION,
            priority: 7,
        });
        remotes[&1].push(create("A", ""));
        maintenance.sweep(&mut registry);

        assert_eq!(registry.get(1).map(Connection::priority), Some(7));
        let packets = remotes.get_mut(&1).unwrap().drain();
        assert!(packets
            .iter()
            .any(|p| matches!(p, ServerPacket::LobbyJoined { user_id: 1, priority: 7, .. })));
    }

    #[test]
    fn test_version_mismatch_is_settled_next_tick() {
        let (mut maintenance, mut registry, remotes, _stats) = setup(Arc::new(AllowAll), &[1]);
        remotes[&1].push(ClientPacket::Hello {
            version: PROTOCOL_VERSION + 1,
            priority: 0,
        });

        maintenance.sweep(&mut registry);
        assert!(!registry.get(1).unwrap().is_active());
        assert!(registry.is_queued(1));

        maintenance.sweep(&mut registry);
        assert!(!registry.contains(1));
        assert_eq!(registry.queued_len(), 0);
    }

    #[test]
    fn test_queued_before_tick_is_cleared_same_tick() {
        let (mut maintenance, mut registry, _remotes, _stats) = setup(Arc::new(AllowAll), &[1, 2]);
        registry.queue_disconnect(2);

        maintenance.sweep(&mut registry);

        assert!(registry.get(1).unwrap().is_active());
        assert!(!registry.get(2).unwrap().is_active());
        assert_eq!(registry.queued_len(), 0);

        maintenance.sweep(&mut registry);
        assert!(!registry.contains(2));
        assert!(registry.contains(1));
    }

    #[test]
    fn test_closed_connection_leaves_lobby_before_removal() {
        let (mut maintenance, mut registry, mut remotes, stats) = setup(Arc::new(AllowAll), &[1, 2]);
        remotes[&1].push(create("A", ""));
        maintenance.sweep(&mut registry);
        let lobby_id = created_id(&remotes.get_mut(&1).unwrap().drain());
        remotes[&2].push(ClientPacket::LobbyJoin {
            lobby_id,
            password: String::new(),
        });
        maintenance.sweep(&mut registry);
        remotes.get_mut(&2).unwrap().drain();
        assert_eq!(stats.player_count(), 2);

        remotes[&1].close();
        maintenance.sweep(&mut registry);
        maintenance.sweep(&mut registry);

        assert!(!registry.contains(1));
        let lobby = maintenance.lobbies().get(lobby_id).unwrap();
        assert_eq!(lobby.owner(), 2);
        assert_eq!(lobby.members(), &[2]);
        assert_eq!(
            remotes.get_mut(&2).unwrap().drain(),
            vec![ServerPacket::LobbyLeft {
                lobby_id,
                user_id: 1
            }]
        );
        assert_eq!(stats.player_count(), 1);
        assert_eq!(stats.lobby_count(), 1);

        remotes[&2].close();
        maintenance.sweep(&mut registry);
        maintenance.sweep(&mut registry);
        assert!(registry.is_empty());
        assert_eq!(stats.lobby_count(), 0);
        assert_eq!(stats.player_count(), 0);
    }

    #[test]
    fn test_peer_close_frees_lobby_seat_in_same_sweep() {
        let (mut maintenance, mut registry, mut remotes, stats) =
            setup(Arc::new(AllowAll), &[1, 2, 3]);
        let mut packet = create("A", "");
        if let ClientPacket::LobbyCreate { max_connections, .. } = &mut packet {
            *max_connections = 2;
        }
        remotes[&1].push(packet);
        maintenance.sweep(&mut registry);
        let lobby_id = created_id(&remotes.get_mut(&1).unwrap().drain());
        remotes[&2].push(ClientPacket::LobbyJoin {
            lobby_id,
            password: String::new(),
        });
        maintenance.sweep(&mut registry);
        remotes.get_mut(&1).unwrap().drain();

        remotes[&2].close();
        maintenance.sweep(&mut registry);

        assert!(registry.contains(2));
        assert_eq!(maintenance.lobbies().get(lobby_id).unwrap().members(), &[1]);
        assert_eq!(stats.player_count(), 1);
        assert_eq!(
            remotes.get_mut(&1).unwrap().drain(),
            vec![ServerPacket::LobbyLeft {
                lobby_id,
                user_id: 2
            }]
        );

        remotes[&3].push(ClientPacket::LobbyJoin {
            lobby_id,
            password: String::new(),
        });
        maintenance.sweep(&mut registry);
        assert_eq!(registry.get(3).and_then(Connection::lobby), Some(lobby_id));
        assert!(!registry.contains(2));
    }

    #[test]
    fn test_dispatch_is_capped_per_sweep() {
        let (mut maintenance, mut registry, mut remotes, _stats) = setup(Arc::new(AllowAll), &[1]);
        let extra = 10;
        for _ in 0..MAX_PACKETS_PER_TICK + extra {
            remotes[&1].push(ClientPacket::LobbyListGet {
                game: "none".to_string(),
                password: String::new(),
            });
        }

        maintenance.sweep(&mut registry);
        assert_eq!(remotes.get_mut(&1).unwrap().drain().len(), MAX_PACKETS_PER_TICK);

        maintenance.sweep(&mut registry);
        let rest = remotes.get_mut(&1).unwrap().drain();
        assert_eq!(rest.len(), extra);
        assert!(rest.iter().all(|p| *p == ServerPacket::LobbyListFinished));
    }

    #[test]
    fn test_leave_of_foreign_lobby_is_ignored() {
        let (mut maintenance, mut registry, mut remotes, _stats) = setup(Arc::new(AllowAll), &[1]);
        remotes[&1].push(create("A", ""));
        maintenance.sweep(&mut registry);
        let lobby_id = created_id(&remotes.get_mut(&1).unwrap().drain());

        remotes[&1].push(ClientPacket::LobbyLeave {
            lobby_id: lobby_id.wrapping_add(1),
        });
        maintenance.sweep(&mut registry);
        assert_eq!(registry.get(1).and_then(Connection::lobby), Some(lobby_id));

        remotes[&1].push(ClientPacket::LobbyLeave { lobby_id });
        maintenance.sweep(&mut registry);
        assert_eq!(registry.get(1).and_then(Connection::lobby), None);
        assert!(maintenance.lobbies().is_empty());
    }

    #[test]
    fn test_update_by_non_owner_is_ignored() {
        let (mut maintenance, mut registry, mut remotes, _stats) = setup(Arc::new(AllowAll), &[1, 2]);
        remotes[&1].push(create("A", ""));
        maintenance.sweep(&mut registry);
        let lobby_id = created_id(&remotes.get_mut(&1).unwrap().drain());

        let update = |game: &str| ClientPacket::LobbyUpdate {
            lobby_id,
            game: game.to_string(),
            version: "2".to_string(),
            host_name: "h".to_string(),
            mode: "m".to_string(),
            description: "d".to_string(),
        };
        remotes[&2].push(update("B"));
        maintenance.sweep(&mut registry);
        assert_eq!(maintenance.lobbies().get(lobby_id).unwrap().game(), "A");

        remotes[&1].push(update("C"));
        maintenance.sweep(&mut registry);
        assert_eq!(maintenance.lobbies().get(lobby_id).unwrap().game(), "C");
    }

    #[test]
    fn test_ban_refresh_removes_rejected_connections() {
        let deny = Arc::new(Deny([2].into_iter().collect()));
        let (mut maintenance, mut registry, _remotes, _stats) = setup(deny, &[1, 2]);

        maintenance.sweep(&mut registry);
        assert!(registry.contains(2));

        registry.request_ban_refresh();
        maintenance.sweep(&mut registry);

        assert!(!registry.contains(2));
        assert!(registry.contains(1));
        assert!(!registry.ban_refresh_pending());
    }

    #[test]
    fn test_ban_refresh_flushes_queued_packets() {
        let deny = Arc::new(Deny([1].into_iter().collect()));
        let (mut maintenance, mut registry, mut remotes, _stats) = setup(deny, &[1]);
        registry
            .get(1)
            .unwrap()
            .send(ServerPacket::LobbyListFinished);

        registry.request_ban_refresh();
        maintenance.sweep(&mut registry);

        assert!(registry.is_empty());
        assert_eq!(
            remotes.get_mut(&1).unwrap().drain(),
            vec![ServerPacket::LobbyListFinished]
        );
    }

    #[test]
    fn test_handle_queue_disconnect_takes_lock() {
        let handle = ServerHandle {
            registry: Arc::new(Mutex::new(Registry::new())),
            stats: Arc::new(ServerStats::default()),
        };

        assert!(tokio_test::block_on(handle.queue_disconnect(5)));
        assert!(!tokio_test::block_on(handle.queue_disconnect(5)));
        tokio_test::block_on(handle.refresh_bans());

        let registry = handle.registry.try_lock().unwrap();
        assert!(registry.is_queued(5));
        assert!(registry.ban_refresh_pending());
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let first = Server::bind(
            ServerConfig {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                turn_servers: PathBuf::from("/nonexistent/turn-servers.cfg"),
                ..ServerConfig::default()
            },
            Arc::new(AllowAll),
            Arc::new(crate::admission::PeerAddressResolver),
        )
        .await
        .unwrap();
        let taken = first.local_addr().unwrap();

        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let busy = std_listener.local_addr().unwrap();
        let second = Server::bind(
            ServerConfig {
                bind_addr: busy,
                turn_servers: PathBuf::from("/nonexistent/turn-servers.cfg"),
                ..ServerConfig::default()
            },
            Arc::new(AllowAll),
            Arc::new(crate::admission::PeerAddressResolver),
        )
        .await;

        assert_ne!(taken.port(), 0);
        assert!(matches!(second, Err(ServerError::Bind { .. }) | Err(ServerError::Listen { .. })));
    }
}
