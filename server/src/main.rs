use clap::Parser;
use log::info;
use server::config::{ServerConfig, StaticData};
use server::ledger::NegativeBalancePolicy;
use server::network::{Server, ServerMessage};
use std::sync::Arc;
use std::time::Duration;

/// Main-method of the application.
/// Loads the static game data, then runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// JSON file with cards, tiles and rules; built-in set when omitted
        #[clap(short, long)]
        config: Option<String>,
        /// Seconds a player has to act before the turn is skipped
        #[clap(long, default_value = "60")]
        turn_timeout: u64,
        /// Seconds a room with two or more players waits before starting
        #[clap(long, default_value = "10")]
        start_delay: u64,
        /// Room size used by joinFirstAvailableRoom when no room is open
        #[clap(short, long, default_value = "4")]
        max_players: usize,
        /// Behavior when a malus would push a resource below zero
        #[clap(long, value_enum, default_value = "clamp")]
        negative_balance: NegativeBalancePolicy,
        /// Fixed RNG seed for reproducible games
        #[clap(long)]
        seed: Option<u64>,
    }

    // Parse command line arguments
    let args = Args::parse();

    let data = match &args.config {
        Some(path) => StaticData::from_json_file(path)?,
        None => StaticData::standard(),
    };

    let config = ServerConfig {
        turn_timeout: Duration::from_secs(args.turn_timeout),
        start_delay: Duration::from_secs(args.start_delay),
        default_max_players: args.max_players,
        negative_balance: args.negative_balance,
        seed: args.seed,
        ..ServerConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::new(&address, config, Arc::new(data)).await?;
    let control = server.control();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(ServerMessage::Shutdown);
        }
    });

    server.run().await
}
