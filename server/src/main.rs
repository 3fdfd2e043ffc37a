use clap::Parser;
use log::{error, info};
use server::accounts::InMemoryAccounts;
use server::config::ServerConfig;
use server::map::{RandomMapGenerator, MAX_MAP_SIZE};
use server::network::Server;
use shared::{DEFAULT_PORT, MAX_PLAYERS};
use std::net::SocketAddr;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Simulation steps per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,
    /// Broadcast a snapshot every N simulation steps
    #[arg(short, long, default_value = "3")]
    broadcast_divisor: u32,
    /// Players per room
    #[arg(short, long, default_value_t = MAX_PLAYERS)]
    max_players: usize,
    /// Map tiles per side
    #[arg(
        long,
        default_value = "10",
        value_parser = clap::value_parser!(u32).range(2..=MAX_MAP_SIZE as i64)
    )]
    map_size: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let config = ServerConfig {
        addr,
        tick_rate: args.tick_rate,
        broadcast_divisor: args.broadcast_divisor,
        max_players: args.max_players,
        map_size: args.map_size,
        ..ServerConfig::default()
    };

    let mut server = Server::new(
        config,
        Box::new(RandomMapGenerator::new()),
        Box::new(InMemoryAccounts::new()),
    )?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server loop failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    let stats = server.shutdown();
    info!("Sent {} transfers, received {}", stats.sent, stats.received);
    Ok(())
}
