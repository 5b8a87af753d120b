//! STUN/TURN credentials handed to every admitted connection.
//!
//! The TURN list lives in a plain text file, one `host:username:password:port`
//! entry per line. The file is read at startup and again before a
//! distribution whenever its modification time moved. Reads go through
//! `tokio::fs` since they happen on the accept task.

use log::{error, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::ServerPacket;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunTurnServer {
    pub host: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub is_stun: bool,
}

impl StunTurnServer {
    pub fn stun(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            username: String::new(),
            password: String::new(),
            port,
            is_stun: true,
        }
    }

    pub fn to_packet(&self) -> ServerPacket {
        ServerPacket::RelayCredential {
            is_stun: self.is_stun,
            port: self.port,
            host: self.host.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

impl Default for StunTurnServer {
    fn default() -> Self {
        Self::stun("stun.l.google.com", 19302)
    }
}

/// Parses one TURN line. Lines with fewer than three separators, or whose
/// port field does not start with a 16-bit unsigned integer, yield `None`.
/// Anything after the port digits is ignored.
pub fn parse_turn_line(line: &str) -> Option<StunTurnServer> {
    let mut fields = line.trim_end_matches(['\r', '\n']).splitn(4, ':');
    let host = fields.next()?;
    let username = fields.next()?;
    let password = fields.next()?;
    let port = fields.next()?.trim_start();

    let digits = port
        .find(|c: char| !c.is_ascii_digit())
        .map_or(port, |end| &port[..end]);
    let port = match digits.parse::<u16>() {
        Ok(port) => port,
        Err(e) => {
            warn!("Skipping turn server {}: bad port {:?} ({})", host, port, e);
            return None;
        }
    };

    Some(StunTurnServer {
        host: host.to_string(),
        username: username.to_string(),
        password: password.to_string(),
        port,
        is_stun: false,
    })
}

pub fn parse_turn_servers(text: &str) -> Vec<StunTurnServer> {
    text.lines().filter_map(parse_turn_line).collect()
}

pub struct RelayDirectory {
    stun: StunTurnServer,
    turn: Vec<StunTurnServer>,
    source: PathBuf,
    loaded_at: Option<SystemTime>,
    source_missing: bool,
}

impl RelayDirectory {
    /// Builds the directory and performs the initial read of `source`.
    pub async fn load(stun: StunTurnServer, source: impl Into<PathBuf>) -> Self {
        let mut directory = Self {
            stun,
            turn: Vec::new(),
            source: source.into(),
            loaded_at: None,
            source_missing: false,
        };
        directory.reload().await;
        directory
    }

    pub fn stun(&self) -> &StunTurnServer {
        &self.stun
    }

    pub fn turn_servers(&self) -> &[StunTurnServer] {
        &self.turn
    }

    /// Re-reads the TURN list unconditionally.
    pub async fn reload(&mut self) {
        self.turn.clear();
        self.loaded_at = modified_time(&self.source).await;

        match fs::read_to_string(&self.source).await {
            Ok(text) => {
                self.source_missing = false;
                self.turn = parse_turn_servers(&text);
                for turn in &self.turn {
                    info!("Loaded turn server: {}:{}", turn.host, turn.port);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !self.source_missing {
                    error!("{} not found", self.source.display());
                }
                self.source_missing = true;
            }
            Err(e) => error!("Failed to read {}: {}", self.source.display(), e),
        }
    }

    /// Reloads when the source appeared, vanished or was modified since the
    /// last read.
    pub async fn refresh_if_changed(&mut self) {
        let modified = modified_time(&self.source).await;
        let appeared_or_vanished = modified.is_some() == self.source_missing;
        if modified != self.loaded_at || appeared_or_vanished {
            self.reload().await;
        }
    }

    /// Credential packets for one connection: the STUN entry first, then every
    /// TURN entry in a freshly shuffled order.
    pub async fn distribution<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<ServerPacket> {
        self.refresh_if_changed().await;
        self.turn.shuffle(rng);

        std::iter::once(&self.stun)
            .chain(self.turn.iter())
            .map(StunTurnServer::to_packet)
            .collect()
    }
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).await.and_then(|meta| meta.modified()).ok()
}
