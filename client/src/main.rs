use clap::Parser;
use client::network::Client;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Player name announced to the server
    #[arg(short = 'n', long, default_value = "Player")]
    name: String,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Stop after this many ticks
    #[arg(long)]
    ticks: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let tick_duration = Duration::from_secs_f64(1.0 / f64::from(args.tick_rate.max(1)));
    let mut client = Client::new(&args.server, &args.name, tick_duration).await?;

    client.run(args.ticks).await?;

    Ok(())
}
