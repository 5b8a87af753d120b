//! Pluggable policies consulted while accepting and sweeping connections.

use crate::connection::Connection;
use log::{info, warn};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Decides whether a connection may join, or stay connected.
///
/// `is_new` is true at accept time and false during ban-refresh sweeps.
pub trait Admission: Send + Sync {
    fn is_allowed(&self, connection: &Connection, is_new: bool) -> bool;
}

/// Admits everyone.
pub struct AllowAll;

impl Admission for AllowAll {
    fn is_allowed(&self, _connection: &Connection, _is_new: bool) -> bool {
        true
    }
}

/// Rejects connections whose peer address appears in a ban file.
///
/// The file holds one IP address per line; blank lines and `#` comments are
/// ignored, as are lines that do not parse.
pub struct BanList {
    path: PathBuf,
    banned: RwLock<HashSet<IpAddr>>,
}

impl BanList {
    /// Loads the list once. A missing file yields an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let list = Self {
            path: path.into(),
            banned: RwLock::new(HashSet::new()),
        };
        list.reload();
        list
    }

    /// Re-reads the file and reports whether the banned set changed.
    pub fn reload(&self) -> bool {
        let fresh = match read_ban_file(&self.path) {
            Ok(set) => set,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                warn!("Failed to read ban list {}: {}", self.path.display(), e);
                return false;
            }
        };

        let mut banned = self.banned.write().unwrap_or_else(|e| e.into_inner());
        if *banned == fresh {
            return false;
        }
        info!(
            "Ban list {} reloaded, {} addresses banned",
            self.path.display(),
            fresh.len()
        );
        *banned = fresh;
        true
    }

    pub fn is_banned(&self, addr: IpAddr) -> bool {
        self.banned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&addr)
    }
}

impl Admission for BanList {
    fn is_allowed(&self, connection: &Connection, _is_new: bool) -> bool {
        !self.is_banned(connection.peer().ip())
    }
}

fn read_ban_file(path: &Path) -> io::Result<HashSet<IpAddr>> {
    let text = fs::read_to_string(path)?;
    Ok(parse_ban_list(&text))
}

fn parse_ban_list(text: &str) -> HashSet<IpAddr> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.parse::<IpAddr>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                warn!("Ignoring malformed ban entry: {}", line);
                None
            }
        })
        .collect()
}

/// Produces the destination routing id handed to lobby peers.
pub trait DestinationResolver: Send + Sync {
    fn resolve(&self, connection_id: u64, peer: SocketAddr) -> u64;
}

/// Routes by peer IP address, so connections from one host share an id.
pub struct PeerAddressResolver;

impl DestinationResolver for PeerAddressResolver {
    fn resolve(&self, _connection_id: u64, peer: SocketAddr) -> u64 {
        match peer.ip() {
            IpAddr::V4(v4) => u64::from(u32::from(v4)),
            IpAddr::V6(v6) => {
                let bits = u128::from(v6);
                (bits >> 64) as u64 ^ bits as u64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_ban_list_skips_noise() {
        let set = parse_ban_list("# header\n10.0.0.1\n\n  10.0.0.2  # spammer\nnot-an-ip\n::1\n");
        assert_eq!(set.len(), 3);
        assert!(set.contains(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert!(set.contains(&"::1".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn test_ban_list_reload_reports_changes() {
        let path = std::env::temp_dir().join(format!("bans-{}.txt", std::process::id()));
        fs::write(&path, "127.0.0.1\n").unwrap();

        let bans = BanList::load(&path);
        let (conn, _remote) = Connection::detached(1);
        assert!(!bans.is_allowed(&conn, false));
        assert!(!bans.reload());

        fs::write(&path, "10.1.1.1\n").unwrap();
        assert!(bans.reload());
        assert!(bans.is_allowed(&conn, false));

        fs::remove_file(&path).unwrap();
        assert!(bans.reload());
    }

    #[test]
    fn test_missing_ban_file_allows_everyone() {
        let bans = BanList::load("/nonexistent/relay-bans.txt");
        let (conn, _remote) = Connection::detached(1);
        assert!(bans.is_allowed(&conn, true));
    }

    #[test]
    fn test_peer_address_resolver() {
        let resolver = PeerAddressResolver;
        let a = resolver.resolve(1, "192.168.0.1:5000".parse().unwrap());
        let b = resolver.resolve(2, "192.168.0.1:6000".parse().unwrap());
        let c = resolver.resolve(3, "192.168.0.2:5000".parse().unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, 0xC0A8_0001);
    }
}
