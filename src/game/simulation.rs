//! Return-to-player simulation.
//!
//! Drives diagnostic-mode engines by hand, one per worker thread, through
//! the same bet/resolve path live rounds use. Each round one player bets a
//! fixed stake on a random number.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::info;

use crate::core::rng::DeterministicRng;
use crate::game::bet::BetRequest;
use crate::game::draw::{SeededDraw, UniformDraw};
use crate::game::phase::{PhaseError, RoundPhase};
use crate::game::registry::Connection;
use crate::game::round::{RoundConfig, RoundEngine};
use crate::network::session::{drain, ClientHandle};
use crate::{PICK_MAX, PICK_MIN};

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Total rounds across all workers.
    pub rounds: u64,
    /// Stake per round.
    pub stake: f64,
    /// Worker threads.
    pub threads: usize,
    /// Fixed seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rounds: 1_000_000,
            stake: 1.0,
            threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            seed: None,
        }
    }
}

/// Aggregate of a simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    /// Rounds played.
    pub rounds: u64,
    /// Rounds where the bet won.
    pub wins: u64,
    /// Sum of stakes.
    pub total_staked: f64,
    /// Sum of payouts.
    pub total_paid: f64,
    /// Wall time.
    pub elapsed: Duration,
}

impl SimulationReport {
    /// Paid over staked.
    pub fn rtp(&self) -> f64 {
        if self.total_staked > 0.0 {
            self.total_paid / self.total_staked
        } else {
            0.0
        }
    }

    /// Fraction of winning rounds.
    pub fn win_rate(&self) -> f64 {
        if self.rounds > 0 {
            self.wins as f64 / self.rounds as f64
        } else {
            0.0
        }
    }

    fn merge(&mut self, other: SimulationReport) {
        self.rounds += other.rounds;
        self.wins += other.wins;
        self.total_staked += other.total_staked;
        self.total_paid += other.total_paid;
    }
}

/// Run the simulation across `config.threads` workers.
pub fn simulate(config: &SimulationConfig) -> Result<SimulationReport, PhaseError> {
    let started = Instant::now();
    let threads = config.threads.max(1) as u64;
    let per_thread = config.rounds / threads;
    let remainder = config.rounds % threads;

    let results: Vec<Result<SimulationReport, PhaseError>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|worker| {
                let rounds = per_thread + u64::from(worker < remainder);
                let seed = config.seed.map(|seed| seed.wrapping_add(worker));
                let stake = config.stake;
                scope.spawn(move || run_worker(rounds, stake, seed))
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| worker.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    let mut report = SimulationReport::default();
    for result in results {
        report.merge(result?);
    }
    report.elapsed = started.elapsed();

    info!(
        "Simulated {} rounds in {:?}: RTP {:.4}, win rate {:.4}",
        report.rounds,
        report.elapsed,
        report.rtp(),
        report.win_rate()
    );
    Ok(report)
}

fn run_worker(rounds: u64, stake: f64, seed: Option<u64>) -> Result<SimulationReport, PhaseError> {
    let engine = match seed {
        Some(seed) => RoundEngine::with_draw(RoundConfig::diagnostic(), SeededDraw::new(seed)),
        None => RoundEngine::with_draw(RoundConfig::diagnostic(), UniformDraw::new()),
    };
    let mut picks = match seed {
        Some(seed) => DeterministicRng::new(!seed),
        None => DeterministicRng::new(rand::thread_rng().gen()),
    };

    let (client, mut outbox) = ClientHandle::channel(16);
    let player = client.id();
    // Registration cannot fail: fresh id, receiver alive
    let _ = engine.register(Arc::new(client));
    drain(&mut outbox);

    let mut report = SimulationReport::default();
    for _ in 0..rounds {
        if engine.phase() == RoundPhase::Waiting {
            engine.open_round()?;
        }

        let pick = picks.next_int_range(PICK_MIN as i32, PICK_MAX as i32) as i64;
        engine.submit_bet(&player, Some(BetRequest::new("Player", stake, pick)));

        let outcome = engine.resolve_round()?;
        drain(&mut outbox);

        report.rounds += 1;
        report.total_staked += outcome.total_staked;
        report.total_paid += outcome.total_paid;
        if outcome.total_paid > 0.0 {
            report.wins += 1;
        }
    }
    Ok(report)
}
