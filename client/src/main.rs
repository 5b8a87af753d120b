use clap::{Parser, Subcommand};
use client::network::{LobbyRequest, RelayClient};
use log::info;
use shared::ServerPacket;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:34197")]
    server: String,

    /// Priority announced in the hello packet
    #[arg(long, default_value = "0")]
    priority: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the assigned identity and the relay credentials
    Probe,
    /// List lobbies for a game
    List {
        #[arg(short, long)]
        game: String,
        #[arg(short, long, default_value = "")]
        password: String,
    },
    /// Create a lobby and print membership events until Ctrl+C
    Host {
        #[arg(short, long)]
        game: String,
        #[arg(long = "game-version", default_value = "")]
        game_version: String,
        #[arg(long, default_value = "host")]
        name: String,
        #[arg(long, default_value = "")]
        mode: String,
        #[arg(short, long, default_value = "16")]
        max: u16,
        #[arg(short, long, default_value = "")]
        password: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut client = RelayClient::connect(args.server.as_str()).await?;
    let session = client.handshake(args.priority).await?;

    match args.command {
        Command::Probe => {
            println!("user id: {}", session.user_id);
            println!("protocol: {}", session.version);
            for credential in &session.credentials {
                let kind = if credential.is_stun { "stun" } else { "turn" };
                println!(
                    "{} {}:{} {}",
                    kind, credential.host, credential.port, credential.username
                );
            }
        }
        Command::List { game, password } => {
            let lobbies = client.list_lobbies(&game, &password).await?;
            for lobby in &lobbies {
                println!(
                    "{} {}/{} {} [{}] {} - {}",
                    lobby.lobby_id,
                    lobby.connections,
                    lobby.max_connections,
                    lobby.host_name,
                    lobby.mode,
                    lobby.version,
                    lobby.description
                );
            }
            println!("{} lobbies", lobbies.len());
        }
        Command::Host {
            game,
            game_version,
            name,
            mode,
            max,
            password,
            description,
        } => {
            let lobby_id = client
                .create_lobby(LobbyRequest {
                    game,
                    version: game_version,
                    host_name: name,
                    mode,
                    max_connections: max,
                    password,
                    description,
                })
                .await?;
            println!("hosting lobby {}", lobby_id);

            loop {
                tokio::select! {
                    packet = client.recv() => match packet? {
                        Some(ServerPacket::LobbyJoined { user_id, owner_id, priority, .. }) => {
                            println!("joined: {} (owner {}, priority {})", user_id, owner_id, priority);
                        }
                        Some(ServerPacket::LobbyLeft { user_id, .. }) => {
                            println!("left: {}", user_id);
                        }
                        Some(other) => info!("Ignoring {:?}", other),
                        None => {
                            println!("server closed the connection");
                            break;
                        }
                    },
                    _ = tokio::signal::ctrl_c() => {
                        client.leave_lobby(lobby_id).await?;
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
