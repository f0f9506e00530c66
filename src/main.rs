//! Guess Round Server
//!
//! Runs timed betting rounds behind a WebSocket listener, or with
//! `simulate [ROUNDS]` measures the return to player in diagnostic mode.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use guess_round::{
    game::simulation::{simulate, SimulationConfig},
    GameServer, RoundConfig, RoundEngine, ServerConfig, PAYOUT_MULTIPLIER, PICK_MAX, PICK_MIN,
    VERSION,
};

#[derive(Parser, Debug)]
#[command(name = "guess-round-server")]
#[command(about = "Real-time guess-the-number betting round server")]
#[command(version)]
struct Cli {
    /// Serve rounds when no subcommand is given
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play diagnostic rounds in-process and report the return to player
    Simulate {
        /// Rounds to play (default one million)
        rounds: Option<u64>,

        /// Worker threads (default: available cores)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Seed for a reproducible run
        #[arg(short, long)]
        seed: Option<u64>,

        /// Stake per round
        #[arg(long, default_value_t = 1.0)]
        stake: f64,
    },
}

impl Command {
    fn simulation_config(&self) -> SimulationConfig {
        let Command::Simulate { rounds, threads, seed, stake } = self;
        let defaults = SimulationConfig::default();
        SimulationConfig {
            rounds: rounds.unwrap_or(defaults.rounds),
            threads: threads.unwrap_or(defaults.threads),
            seed: *seed,
            stake: *stake,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Guess Round Server v{}", VERSION);
    info!("Picks {}..={}, payout x{}", PICK_MIN, PICK_MAX, PAYOUT_MULTIPLIER);

    match cli.command {
        Some(command) => run_simulation(command.simulation_config()).await,
        None => run_server().await,
    }
}

async fn run_server() -> Result<()> {
    let round_config = RoundConfig::from_env();
    let server_config = ServerConfig::from_env();

    info!(
        "Round: {}s betting, {}s pause{}",
        round_config.duration(),
        round_config.pause_secs,
        if round_config.is_diagnostic() { " (diagnostic)" } else { "" }
    );

    let engine = Arc::new(RoundEngine::new(round_config));
    let rounds = engine.start();
    let server = Arc::new(GameServer::new(server_config, engine.clone()));

    let serving = server.clone();
    let mut listener = tokio::spawn(async move { serving.run().await });

    let finished = tokio::select! {
        result = &mut listener => Some(result),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("Ctrl-C received, shutting down");
            None
        }
    };

    match finished {
        Some(result) => {
            rounds.shutdown().await;
            result.context("server task failed")?.context("server stopped")?;
        }
        None => {
            server.shutdown();
            rounds.shutdown().await;
            listener.await.context("server task failed")??;
        }
    }

    info!("Played {} rounds", engine.rounds_played());
    Ok(())
}

async fn run_simulation(config: SimulationConfig) -> Result<()> {
    info!(
        "Simulating {} rounds on {} threads, stake {}",
        config.rounds, config.threads, config.stake
    );

    let report = tokio::task::spawn_blocking(move || simulate(&config))
        .await
        .context("simulation task failed")??;

    info!("Rounds: {}", report.rounds);
    info!("Wins: {} ({:.4})", report.wins, report.win_rate());
    info!("Staked: {:.2}", report.total_staked);
    info!("Paid: {:.2}", report.total_paid);
    info!("RTP: {:.4}", report.rtp());
    info!("Elapsed: {:?}", report.elapsed);
    Ok(())
}
