use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{ClientPacket, ServerPacket, PROTOCOL_VERSION};
use std::collections::VecDeque;
use std::error::Error;
use std::io;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// How long to keep collecting relay credentials once the first one arrived
const CREDENTIAL_WAIT: Duration = Duration::from_millis(250);

/// Default wait for replies the server sends promptly
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One STUN or TURN entry received during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCredential {
    pub is_stun: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// What the server told us right after connecting
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: u64,
    pub version: u32,
    pub credentials: Vec<RelayCredential>,
}

/// A lobby as reported by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbySummary {
    pub lobby_id: u64,
    pub owner_id: u64,
    pub connections: u16,
    pub max_connections: u16,
    pub game: String,
    pub version: String,
    pub host_name: String,
    pub mode: String,
    pub description: String,
}

/// Parameters of a lobby to create
#[derive(Debug, Clone, Default)]
pub struct LobbyRequest {
    pub game: String,
    pub version: String,
    pub host_name: String,
    pub mode: String,
    pub max_connections: u16,
    pub password: String,
    pub description: String,
}

/// TCP client for the relay server
///
/// Helpers that wait for a specific reply keep every unrelated packet they
/// read, and [`RelayClient::recv`] hands those back first.
pub struct RelayClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    backlog: VecDeque<ServerPacket>,
    user_id: Option<u64>,
}

impl RelayClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, Box<dyn Error>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            info!("Connected to {}", peer);
        }

        Ok(RelayClient {
            framed: Framed::new(stream, shared::frame_codec()),
            backlog: VecDeque::new(),
            user_id: None,
        })
    }

    /// The id assigned by the server, once the handshake completed
    pub fn user_id(&self) -> Option<u64> {
        self.user_id
    }

    pub async fn send(&mut self, packet: &ClientPacket) -> Result<(), Box<dyn Error>> {
        let bytes = shared::encode(packet)?;
        self.framed.send(Bytes::from(bytes)).await?;
        Ok(())
    }

    /// Next packet from the server, or `None` once it closed the connection
    pub async fn recv(&mut self) -> Result<Option<ServerPacket>, Box<dyn Error>> {
        if let Some(packet) = self.backlog.pop_front() {
            return Ok(Some(packet));
        }
        self.read_frame().await
    }

    /// Like [`RelayClient::recv`] but gives up after `wait`
    pub async fn recv_timeout(
        &mut self,
        wait: Duration,
    ) -> Result<Option<ServerPacket>, Box<dyn Error>> {
        match timeout(wait, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(timed_out("no packet from server")),
        }
    }

    async fn read_frame(&mut self) -> Result<Option<ServerPacket>, Box<dyn Error>> {
        loop {
            match self.framed.next().await {
                Some(Ok(frame)) => match shared::decode::<ServerPacket>(&frame) {
                    Ok(packet) => return Ok(Some(packet)),
                    Err(e) => warn!("Skipping malformed packet: {}", e),
                },
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    /// Reads packets until `pick` accepts one, stashing the rest
    async fn wait_for<T>(
        &mut self,
        wait: Duration,
        mut pick: impl FnMut(&ServerPacket) -> Option<T>,
    ) -> Result<T, Box<dyn Error>> {
        match timeout(wait, self.next_match(&mut pick)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out("expected reply did not arrive")),
        }
    }

    async fn next_match<T>(
        &mut self,
        pick: &mut impl FnMut(&ServerPacket) -> Option<T>,
    ) -> Result<T, Box<dyn Error>> {
        for index in 0..self.backlog.len() {
            if let Some(value) = pick(&self.backlog[index]) {
                self.backlog.remove(index);
                return Ok(value);
            }
        }

        loop {
            let Some(packet) = self.read_frame().await? else {
                return Err(closed());
            };
            match pick(&packet) {
                Some(value) => return Ok(value),
                None => self.backlog.push_back(packet),
            }
        }
    }

    /// Waits for the server greeting, announces our protocol version and
    /// priority, and gathers the relay credentials
    pub async fn handshake(&mut self, priority: u32) -> Result<Session, Box<dyn Error>> {
        let (user_id, version) = self
            .wait_for(DEFAULT_TIMEOUT, |packet| match packet {
                ServerPacket::Joined { user_id, version } => Some((*user_id, *version)),
                _ => None,
            })
            .await?;
        self.user_id = Some(user_id);
        info!("Joined as user {} (protocol {})", user_id, version);

        self.send(&ClientPacket::Hello {
            version: PROTOCOL_VERSION,
            priority,
        })
        .await?;

        let mut credentials = Vec::new();
        loop {
            let wait = if credentials.is_empty() {
                DEFAULT_TIMEOUT
            } else {
                CREDENTIAL_WAIT
            };
            match timeout(wait, self.read_frame()).await {
                Ok(Ok(Some(ServerPacket::RelayCredential {
                    is_stun,
                    port,
                    host,
                    username,
                    password,
                }))) => credentials.push(RelayCredential {
                    is_stun,
                    host,
                    port,
                    username,
                    password,
                }),
                Ok(Ok(Some(other))) => {
                    self.backlog.push_back(other);
                    break;
                }
                Ok(Ok(None)) => return Err(closed()),
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
        }
        debug!("Received {} relay credentials", credentials.len());

        Ok(Session {
            user_id,
            version,
            credentials,
        })
    }

    /// Lists lobbies whose game and password match exactly
    pub async fn list_lobbies(
        &mut self,
        game: &str,
        password: &str,
    ) -> Result<Vec<LobbySummary>, Box<dyn Error>> {
        self.send(&ClientPacket::LobbyListGet {
            game: game.to_string(),
            password: password.to_string(),
        })
        .await?;

        let mut lobbies = Vec::new();
        loop {
            let next = self
                .wait_for(DEFAULT_TIMEOUT, |packet| match packet {
                    ServerPacket::LobbyListed {
                        lobby_id,
                        owner_id,
                        connections,
                        max_connections,
                        game,
                        version,
                        host_name,
                        mode,
                        description,
                    } => Some(Some(LobbySummary {
                        lobby_id: *lobby_id,
                        owner_id: *owner_id,
                        connections: *connections,
                        max_connections: *max_connections,
                        game: game.clone(),
                        version: version.clone(),
                        host_name: host_name.clone(),
                        mode: mode.clone(),
                        description: description.clone(),
                    })),
                    ServerPacket::LobbyListFinished => Some(None),
                    _ => None,
                })
                .await?;
            match next {
                Some(lobby) => lobbies.push(lobby),
                None => return Ok(lobbies),
            }
        }
    }

    /// Creates a lobby and returns its id once the server confirmed it
    pub async fn create_lobby(&mut self, request: LobbyRequest) -> Result<u64, Box<dyn Error>> {
        self.send(&ClientPacket::LobbyCreate {
            game: request.game,
            version: request.version,
            host_name: request.host_name,
            mode: request.mode,
            max_connections: request.max_connections,
            password: request.password,
            description: request.description,
        })
        .await?;

        self.wait_for(DEFAULT_TIMEOUT, |packet| match packet {
            ServerPacket::LobbyCreated { lobby_id, .. } => Some(*lobby_id),
            _ => None,
        })
        .await
    }

    /// Asks to join a lobby. The outcome arrives as `LobbyJoined` or
    /// `LobbyJoinFailed`.
    pub async fn join_lobby(&mut self, lobby_id: u64, password: &str) -> Result<(), Box<dyn Error>> {
        self.send(&ClientPacket::LobbyJoin {
            lobby_id,
            password: password.to_string(),
        })
        .await
    }

    pub async fn leave_lobby(&mut self, lobby_id: u64) -> Result<(), Box<dyn Error>> {
        self.send(&ClientPacket::LobbyLeave { lobby_id }).await
    }
}

fn timed_out(what: &str) -> Box<dyn Error> {
    Box::new(io::Error::new(io::ErrorKind::TimedOut, what.to_string()))
}

fn closed() -> Box<dyn Error> {
    Box::new(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "server closed the connection",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (RelayClient, Framed<TcpStream, LengthDelimitedCodec>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = RelayClient::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        (client, Framed::new(stream, shared::frame_codec()))
    }

    async fn push(server: &mut Framed<TcpStream, LengthDelimitedCodec>, packet: ServerPacket) {
        server
            .send(Bytes::from(shared::encode(&packet).unwrap()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_handshake_collects_credentials_and_keeps_extra_packets() {
        let (mut client, mut server) = pair().await;

        push(&mut server, ServerPacket::Joined { user_id: 42, version: PROTOCOL_VERSION }).await;
        for (is_stun, port) in [(true, 19302), (false, 3478)] {
            push(
                &mut server,
                ServerPacket::RelayCredential {
                    is_stun,
                    port,
                    host: "relay.test".to_string(),
                    username: String::new(),
                    password: String::new(),
                },
            )
            .await;
        }
        push(&mut server, ServerPacket::LobbyListFinished).await;

        let session = tokio_test::assert_ok!(client.handshake(3).await);
        assert_eq!(session.user_id, 42);
        assert_eq!(client.user_id(), Some(42));
        assert_eq!(session.credentials.len(), 2);
        assert!(session.credentials[0].is_stun);

        let hello = server.next().await.unwrap().unwrap();
        assert_eq!(
            shared::decode::<ClientPacket>(&hello).unwrap(),
            ClientPacket::Hello {
                version: PROTOCOL_VERSION,
                priority: 3
            }
        );

        assert_eq!(
            client.recv().await.unwrap(),
            Some(ServerPacket::LobbyListFinished)
        );
    }

    #[tokio::test]
    async fn test_recv_reports_close() {
        let (mut client, server) = pair().await;
        drop(server);
        assert_eq!(client.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recv_timeout_expires() {
        let (mut client, _server) = pair().await;
        tokio_test::assert_err!(client.recv_timeout(Duration::from_millis(20)).await);
    }
}
