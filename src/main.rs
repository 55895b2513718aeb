//! Raffle keeper binary
//!
//! Runs a raffle against the local VRF coordinator with a set of generated
//! players, re-entering every player each round until the requested number
//! of draws has completed.

use clap::Parser;
use raffle_keeper::{
    config::{ConfigLoader, RaffleConfig},
    errors::{ConfigurationError, RaffleResult},
    Address, Amount, RaffleEvent, RaffleService, SystemClock,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Raffle keeper CLI
#[derive(Parser)]
#[command(name = "raffle-keeper")]
#[command(about = "Autonomous prize draw driven by a keeper and a VRF oracle")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Network preset used when no configuration file is given
    #[arg(short, long, default_value = "local")]
    network: String,

    /// Number of generated players
    #[arg(short, long, default_value = "4")]
    players: usize,

    /// Number of completed draws before exiting
    #[arg(short, long, default_value = "1")]
    rounds: usize,

    /// Print winners as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> RaffleResult<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new().with_base(RaffleConfig::for_network(&cli.network)?);
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| config.logging.level.as_filter().into()),
        )
        .init();

    if cli.players == 0 {
        return Err(ConfigurationError::InvalidValue {
            field: "players".to_string(),
            value: "0".to_string(),
            reason: "at least one player is required".to_string(),
        }
        .into());
    }

    info!(
        network = %cli.network,
        chain_id = config.raffle.chain_id,
        players = cli.players,
        rounds = cli.rounds,
        "Starting raffle keeper"
    );

    let fee = config.raffle.entrance_fee;
    let service = RaffleService::new(config, Arc::new(SystemClock))?;
    let players: Vec<Address> = (0..cli.players).map(|_| Address::random()).collect();
    let stake = fee.saturating_mul(cli.rounds as Amount);
    for player in &players {
        service.fund(*player, stake).await?;
    }

    let mut events = service.subscribe().await;
    enter_all(&service, &players, fee).await?;

    let keeper = service.spawn_keeper();
    let fulfiller = service.spawn_fulfiller();

    let mut completed = 0;
    while completed < cli.rounds {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };

        match event {
            Ok(event @ RaffleEvent::WinnerPicked { .. }) => {
                report(&event, cli.json);
                completed += 1;
                if completed < cli.rounds {
                    enter_all(&service, &players, fee).await?;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
            Err(RecvError::Closed) => break,
        }

        if fulfiller.is_finished() {
            error!("Fulfiller stopped, raffle needs manual intervention");
            break;
        }
    }

    service.shutdown();
    let _ = keeper.await;
    let _ = fulfiller.await;

    let snapshot = service.snapshot().await;
    info!(completed, state = %snapshot.state, "Raffle keeper finished");
    Ok(())
}

async fn enter_all(service: &RaffleService, players: &[Address], fee: Amount) -> RaffleResult<()> {
    for player in players {
        service.enter(*player, fee).await?;
    }
    Ok(())
}

fn report(event: &RaffleEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to encode event"),
        }
    } else if let RaffleEvent::WinnerPicked {
        winner,
        amount,
        request_id,
    } = event
    {
        println!("request {}: {} won {}", request_id, winner, amount);
    }
}
