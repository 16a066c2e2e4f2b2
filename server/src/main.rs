use clap::Parser;
use log::{info, warn};
use server::network::Server;
use shared::{Environment, SyncConfig, SyncContext};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Sync configuration as JSON
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(SyncConfig::server());
    };

    let mut config = SyncConfig::from_json_str(&std::fs::read_to_string(path)?)?;
    if config.environment != Environment::Server {
        warn!("{} sets a client environment, overriding", path.display());
        config.environment = Environment::Server;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    let tick_duration = Duration::from_secs_f64(1.0 / f64::from(args.tick_rate.max(1)));

    info!(
        "Starting server at {} Hz for up to {} clients",
        args.tick_rate, args.max_clients
    );

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(
        &address,
        tick_duration,
        args.max_clients,
        SyncContext::new(config),
    )
    .await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
