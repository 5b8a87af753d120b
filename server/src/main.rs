use clap::Parser;
use log::{error, info};
use server::admission::{Admission, AllowAll, BanList, PeerAddressResolver};
use server::network::{Server, ServerConfig, ServerHandle};
use server::relay::StunTurnServer;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Maintenance period in milliseconds
    #[arg(long, default_value = "100")]
    tick_ms: u64,
    /// TURN server list, one host:username:password:port per line
    #[arg(long, default_value = "turn-servers.cfg")]
    turn_servers: PathBuf,
    #[arg(long, default_value = "stun.l.google.com")]
    stun_host: String,
    #[arg(long, default_value = "19302")]
    stun_port: u16,
    /// Banned IP addresses, one per line
    #[arg(long)]
    bans: Option<PathBuf>,
    /// How often the ban list is re-read, in seconds
    #[arg(long, default_value = "30")]
    refresh_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let bind_addr = SocketAddr::new(args.host.parse::<IpAddr>()?, args.port);
    let config = ServerConfig {
        bind_addr,
        tick: Duration::from_millis(args.tick_ms.max(1)),
        turn_servers: args.turn_servers,
        stun: StunTurnServer::stun(args.stun_host, args.stun_port),
        ..ServerConfig::default()
    };

    let bans = args.bans.map(|path| Arc::new(BanList::load(path)));
    let admission: Arc<dyn Admission> = match &bans {
        Some(bans) => Arc::clone(bans) as Arc<dyn Admission>,
        None => Arc::new(AllowAll),
    };

    let server = Server::bind(config, admission, Arc::new(PeerAddressResolver)).await?;
    let handle = server.handle();

    if let Some(bans) = bans {
        tokio::spawn(refresh_bans(
            bans,
            handle.clone(),
            Duration::from_secs(args.refresh_secs.max(1)),
        ));
    }

    tokio::select! {
        _ = server.run() => {
            error!("Server loops exited unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!(
                "Received Ctrl+C, shutting down with {} players in {} lobbies",
                handle.player_count(),
                handle.lobby_count()
            );
        }
    }

    Ok(())
}

/// Re-reads the ban list periodically and asks for a sweep-time re-check
/// whenever it changed.
async fn refresh_bans(bans: Arc<BanList>, handle: ServerHandle, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if bans.reload() {
            handle.refresh_bans().await;
        }
    }
}
