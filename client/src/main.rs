use clap::Parser;
use client::game::ClientGameState;
use client::network::Connection;
use log::{info, warn};
use shared::PushEvent;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Name to log in with
    #[arg(short = 'u', long)]
    username: String,

    /// Open a new room of this size instead of joining the first open one
    #[arg(short = 'c', long)]
    create: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut connection = Connection::connect(&args.server).await?;
    connection.login(&args.username).await?;

    let joined = match args.create {
        Some(max_players) => connection.create_and_join_room(max_players).await,
        None => connection.join_first_available_room().await,
    }?;
    info!("{:?}", joined);

    let mut state = ClientGameState::new(args.username.clone());
    while let Some(event) = connection.next_push().await {
        info!("{}: {:?}", event.name(), event);
        state.apply(&event);
        match &event {
            PushEvent::GameEnd { ranking } => {
                info!("Final ranking: {:?}", ranking);
                break;
            }
            PushEvent::AbortGame { reason } => {
                warn!("Game aborted: {}", reason);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
