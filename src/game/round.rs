//! Round Engine
//!
//! Owns the round phase and drives it from a single one-second ticker:
//!
//! ```text
//! second 0          open round, broadcast ROUND_START
//! even seconds      broadcast COUNTDOWN (duration - second) while BETTING
//! second = duration resolve: draw, settle, personal results, ROUND_END
//! remaining pause   idle until the cycle wraps to second 0
//! ```
//!
//! Bets and connection changes arrive concurrently from socket tasks and go
//! straight to the concurrent registries; only the ticker moves the phase.
//! With a non-positive duration the ticker never runs and the engine sits in
//! BETTING until a caller drives it with [`RoundEngine::open_round`] and
//! [`RoundEngine::resolve_round`].

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::game::bet::{Bet, BetError, BetRegistry, BetRequest};
use crate::game::broadcast::{broadcast_all, broadcast_filtered, send_to, send_to_id};
use crate::game::draw::{DrawSource, UniformDraw};
use crate::game::payout::{self, Winner};
use crate::game::phase::{PhaseCell, PhaseError, RoundPhase};
use crate::game::registry::{ConnectionId, ConnectionRef, ConnectionRegistry, RegistryError};
use crate::network::protocol::OutboundEvent;
use crate::DEFAULT_ROUND_SECS;

/// Round timing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundConfig {
    /// Length of the betting window in seconds. Zero or less selects
    /// diagnostic mode (no timer, manual drive).
    pub duration_secs: i64,
    /// Idle seconds between resolution and the next round start (at least 1).
    pub pause_secs: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_ROUND_SECS,
            pause_secs: 1,
        }
    }
}

impl RoundConfig {
    /// Timed rounds of `duration_secs`.
    pub fn timed(duration_secs: i64) -> Self {
        Self { duration_secs, ..Default::default() }
    }

    /// Manual-drive configuration.
    pub fn diagnostic() -> Self {
        Self { duration_secs: 0, ..Default::default() }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            duration_secs: std::env::var("GUESS_ROUND_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.duration_secs),
            pause_secs: std::env::var("GUESS_ROUND_PAUSE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pause_secs),
        }
    }

    /// Whether the timer loop is disabled.
    pub fn is_diagnostic(&self) -> bool {
        self.duration_secs <= 0
    }

    /// Betting window in whole seconds (0 in diagnostic mode).
    pub fn duration(&self) -> u32 {
        self.duration_secs.clamp(0, u32::MAX as i64) as u32
    }

    /// Seconds from one round start to the next.
    pub fn cycle_secs(&self) -> u64 {
        (self.duration() as u64).saturating_add(self.pause_secs.max(1))
    }
}

/// Result of a bet submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Bet stored for this round.
    Accepted,
    /// Betting window closed; the submitter got an ERROR event.
    WindowClosed,
    /// Request could not become a bet. Logged only.
    Invalid(BetError),
    /// Unknown connection or absent payload. Logged only.
    Ignored,
}

/// Everything a resolved round produced.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// 1-based round number.
    pub round: u64,
    /// Drawn number.
    pub drawn: u8,
    /// Settled bets in acceptance order.
    pub bets: Vec<Bet>,
    /// Ranked winners.
    pub winners: Vec<Winner>,
    /// Sum of stakes.
    pub total_staked: f64,
    /// Sum of payouts.
    pub total_paid: f64,
    /// Wall-clock resolution time.
    pub resolved_at: DateTime<Utc>,
}

/// The round lifecycle engine.
pub struct RoundEngine {
    config: RoundConfig,
    phase: PhaseCell,
    connections: ConnectionRegistry,
    bets: BetRegistry,
    draw: Box<dyn DrawSource>,
    round_started: Mutex<Option<Instant>>,
    rounds_played: AtomicU64,
    last_draw: Mutex<Option<u8>>,
    started: AtomicBool,
}

impl RoundEngine {
    /// Build an engine with an entropy-seeded draw.
    pub fn new(config: RoundConfig) -> Self {
        Self::with_draw(config, UniformDraw::new())
    }

    /// Build an engine with a specific draw source.
    pub fn with_draw(config: RoundConfig, draw: impl DrawSource + 'static) -> Self {
        let diagnostic = config.is_diagnostic();
        let engine = Self {
            config,
            phase: PhaseCell::new(RoundPhase::Waiting),
            connections: ConnectionRegistry::new(),
            bets: BetRegistry::new(),
            draw: Box::new(draw),
            round_started: Mutex::new(None),
            rounds_played: AtomicU64::new(0),
            last_draw: Mutex::new(None),
            started: AtomicBool::new(false),
        };

        if diagnostic {
            *lock(&engine.round_started) = Some(Instant::now());
            engine.phase.force(RoundPhase::Betting);
        }
        engine
    }

    /// Start the round loop on the current tokio runtime.
    ///
    /// In diagnostic mode nothing is spawned. Dropping the returned handle
    /// also stops the loop.
    pub fn start(self: &Arc<Self>) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        if self.config.is_diagnostic() {
            info!("Round engine in diagnostic mode, timer disabled");
            return EngineHandle { shutdown_tx, task: None };
        }
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("Round engine already started");
            return EngineHandle { shutdown_tx, task: None };
        }

        info!(
            "Round loop started: {}s betting, {}s cycle",
            self.config.duration(),
            self.config.cycle_secs()
        );
        let engine = self.clone();
        let task = tokio::spawn(async move {
            engine.run_round_loop(shutdown_rx).await;
        });

        EngineHandle { shutdown_tx, task: Some(task) }
    }

    async fn run_round_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let period = Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cycle = self.config.cycle_secs();
        let mut step: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.recv() => {
                    info!("Round loop stopping");
                    break;
                }
            }

            let second = step % cycle;
            step = step.wrapping_add(1);

            // A panicking tick must never take the loop down with it
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.on_tick(second))) {
                error!("Round tick {} panicked: {}", second, panic_message(panic.as_ref()));
                self.recover();
            }
        }
    }

    fn on_tick(&self, second: u64) {
        let duration = self.config.duration() as u64;

        if second == 0 {
            if let Err(e) = self.open_round() {
                warn!("Round not opened: {}", e);
            }
            return;
        }

        if second <= duration && second % 2 == 0 && self.phase() == RoundPhase::Betting {
            let left = (duration - second) as u32;
            broadcast_all(&self.connections, &OutboundEvent::countdown(left));
        }

        if second == duration {
            if let Err(e) = self.resolve_round() {
                warn!("Round not resolved: {}", e);
            }
        }
    }

    /// Put the engine back in WAITING after a tick failed mid-resolution.
    fn recover(&self) {
        if self.phase() == RoundPhase::Resolving {
            self.bets.clear();
            self.phase.force(RoundPhase::Waiting);
            warn!("Abandoned round after failure; next round starts on schedule");
        }
    }

    // =========================================================================
    // PHASE TRANSITIONS
    // =========================================================================

    /// Open the betting window and announce it.
    pub fn open_round(&self) -> Result<(), PhaseError> {
        // Start time goes first so a late joiner never pairs BETTING with a stale start
        let previous = lock(&self.round_started).replace(Instant::now());
        if let Err(e) = self.phase.transition(RoundPhase::Waiting, RoundPhase::Betting) {
            *lock(&self.round_started) = previous;
            return Err(e);
        }

        let round = self.rounds_played() + 1;
        if self.config.is_diagnostic() {
            debug!("Round {} open", round);
        } else {
            info!(
                "Round {} open: {}s betting, {} connections",
                round,
                self.config.duration(),
                self.connections.len()
            );
        }

        broadcast_all(&self.connections, &OutboundEvent::round_start(self.config.duration()));
        Ok(())
    }

    /// Close betting, draw a number, and settle the round.
    pub fn resolve_round(&self) -> Result<RoundOutcome, PhaseError> {
        self.resolve(None)
    }

    /// Close betting and settle the round against a chosen number.
    ///
    /// A number outside the pick range simply produces no winners; it is
    /// still reported by [`RoundEngine::last_draw`].
    pub fn resolve_with(&self, drawn: u8) -> Result<RoundOutcome, PhaseError> {
        self.resolve(Some(drawn))
    }

    fn resolve(&self, forced: Option<u8>) -> Result<RoundOutcome, PhaseError> {
        self.phase.transition(RoundPhase::Betting, RoundPhase::Resolving)?;

        let drawn = forced.unwrap_or_else(|| self.draw.draw());
        let bets = self.bets.drain_settled(drawn);
        let winners = payout::rank_winners(&bets);

        for bet in &bets {
            let event = OutboundEvent::personal_result(
                bet.nickname(),
                bet.payout(),
                drawn,
                winners.clone(),
            );
            send_to_id(&self.connections, &bet.owner(), &event);
        }

        let spectator_result = OutboundEvent::round_result(drawn, winners.clone());
        broadcast_filtered(&self.connections, &spectator_result, |id| {
            !bets.iter().any(|bet| bet.owner() == *id)
        });
        broadcast_all(&self.connections, &OutboundEvent::round_end());

        *lock(&self.last_draw) = Some(drawn);
        let round = self.rounds_played.fetch_add(1, Ordering::AcqRel) + 1;

        if let Err(e) = self.phase.transition(RoundPhase::Resolving, RoundPhase::Waiting) {
            warn!("Phase moved during resolution: {}", e);
            self.phase.force(RoundPhase::Waiting);
        }

        let total_staked: f64 = bets.iter().map(Bet::stake).sum();
        let total_paid: f64 = bets.iter().map(Bet::payout).sum();

        if self.config.is_diagnostic() {
            debug!("Round {} drew {}: {} bets, {} winners", round, drawn, bets.len(), winners.len());
        } else {
            info!(
                "Round {} drew {}: {} bets, {} winners, staked {:.2}, paid {:.2}",
                round,
                drawn,
                bets.len(),
                winners.len(),
                total_staked,
                total_paid
            );
        }

        Ok(RoundOutcome {
            round,
            drawn,
            bets,
            winners,
            total_staked,
            total_paid,
            resolved_at: Utc::now(),
        })
    }

    // =========================================================================
    // CONNECTIONS AND BETS
    // =========================================================================

    /// Register a new connection and greet it.
    ///
    /// During BETTING the greeting is a COUNTDOWN with the time actually
    /// left; otherwise it is a WELCOME.
    pub fn register(&self, connection: ConnectionRef) -> Result<(), RegistryError> {
        if let Err(e) = self.connections.insert(connection.clone()) {
            debug!("Registration rejected: {}", e);
            return Err(e);
        }

        let greeting = match self.phase() {
            RoundPhase::Betting => OutboundEvent::late_join(self.time_remaining()),
            RoundPhase::Waiting | RoundPhase::Resolving => OutboundEvent::welcome(),
        };
        send_to(connection.as_ref(), &greeting);

        debug!("Connection {} registered ({} total)", connection.id().short(), self.connections.len());
        Ok(())
    }

    /// Forget a connection and forfeit its pending bet.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id).is_some();
        if self.bets.remove(id).is_some() {
            debug!("Connection {} left with a pending bet; bet forfeited", id.short());
        }
        removed
    }

    /// Submit a bet for the current round.
    pub fn submit_bet(&self, id: &ConnectionId, request: Option<BetRequest>) -> Submission {
        let Some(request) = request else {
            debug!("Absent bet payload from {}", id.short());
            return Submission::Ignored;
        };
        if !self.connections.contains(id) {
            debug!("Bet from unknown connection {}", id.short());
            return Submission::Ignored;
        }

        if self.phase() != RoundPhase::Betting {
            return self.reject_closed(id);
        }

        if let Err(e) = self.bets.place(*id, request) {
            warn!("Error processing bet from {}: {}", id.short(), e);
            return Submission::Invalid(e);
        }

        if self.withdraw_late_bet(id) {
            return self.reject_closed(id);
        }

        debug!("Bet accepted from {}", id.short());
        Submission::Accepted
    }

    /// Pull back a bet stored after resolution drained the registry.
    ///
    /// A bet that resolution already took is part of that round's result and
    /// is no longer in the registry, so it stays accepted.
    fn withdraw_late_bet(&self, id: &ConnectionId) -> bool {
        self.phase() != RoundPhase::Betting && self.bets.remove(id).is_some()
    }

    fn reject_closed(&self, id: &ConnectionId) -> Submission {
        warn!("Betting phase is over. Bet rejected for {}", id.short());
        send_to_id(&self.connections, id, &OutboundEvent::betting_closed());
        Submission::WindowClosed
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase.get()
    }

    /// Engine configuration.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Seconds left in the betting window, `duration - elapsed`.
    pub fn time_remaining(&self) -> u32 {
        let elapsed = self
            .round_started()
            .map(|start| start.elapsed().as_secs())
            .unwrap_or(0);
        (self.config.duration() as u64).saturating_sub(elapsed) as u32
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether a connection is registered.
    pub fn is_registered(&self, id: &ConnectionId) -> bool {
        self.connections.contains(id)
    }

    /// Number of pending bets.
    pub fn bet_count(&self) -> usize {
        self.bets.len()
    }

    /// Pending bet of a connection.
    pub fn bet_for(&self, id: &ConnectionId) -> Option<Bet> {
        self.bets.get(id)
    }

    /// Rounds resolved so far.
    pub fn rounds_played(&self) -> u64 {
        self.rounds_played.load(Ordering::Acquire)
    }

    /// Number drawn in the last resolved round.
    pub fn last_draw(&self) -> Option<u8> {
        *lock(&self.last_draw)
    }

    /// Deliver an event to every open connection.
    pub fn broadcast(&self, event: &OutboundEvent) -> usize {
        broadcast_all(&self.connections, event).delivered
    }

    fn round_started(&self) -> Option<Instant> {
        *lock(&self.round_started)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Control handle for a running round loop.
pub struct EngineHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Whether a timer loop was spawned.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop at the next tick boundary and wait for it.
    ///
    /// A resolution already in progress finishes first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Round loop ended abnormally: {}", e);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::draw::FixedDraw;
    use crate::game::registry::Connection;
    use crate::network::session::{drain, ClientHandle};
    use crate::PAYOUT_MULTIPLIER;
    use tokio::sync::mpsc;

    fn connect(engine: &RoundEngine) -> (ConnectionId, mpsc::Receiver<OutboundEvent>) {
        let (client, rx) = ClientHandle::channel(64);
        let id = client.id();
        engine.register(Arc::new(client)).unwrap();
        (id, rx)
    }

    fn kinds(events: &[OutboundEvent]) -> Vec<&'static str> {
        events.iter().map(OutboundEvent::kind).collect()
    }

    #[test]
    fn test_diagnostic_mode_starts_in_betting() {
        let engine = RoundEngine::new(RoundConfig::diagnostic());
        assert_eq!(engine.phase(), RoundPhase::Betting);

        let negative = RoundEngine::new(RoundConfig::timed(-1));
        assert_eq!(negative.phase(), RoundPhase::Betting);
    }

    #[test]
    fn test_timed_mode_starts_waiting() {
        let engine = RoundEngine::new(RoundConfig::timed(10));
        assert_eq!(engine.phase(), RoundPhase::Waiting);
    }

    #[test]
    fn test_register_while_waiting_gets_welcome() {
        let engine = RoundEngine::new(RoundConfig::timed(10));
        let (id, mut rx) = connect(&engine);

        assert!(engine.is_registered(&id));
        assert_eq!(drain(&mut rx), vec![OutboundEvent::welcome()]);
    }

    #[test]
    fn test_register_rejects_duplicates_and_closed() {
        let engine = RoundEngine::new(RoundConfig::timed(10));
        let (client, mut rx) = ClientHandle::channel(8);
        let client = Arc::new(client);

        engine.register(client.clone()).unwrap();
        assert!(matches!(
            engine.register(client.clone()),
            Err(RegistryError::AlreadyRegistered(_))
        ));
        // Only the first registration greeted
        assert_eq!(drain(&mut rx).len(), 1);

        let (closed, closed_rx) = ClientHandle::channel(8);
        drop(closed_rx);
        assert!(matches!(engine.register(Arc::new(closed)), Err(RegistryError::Closed(_))));
        assert_eq!(engine.connection_count(), 1);
    }

    #[test]
    fn test_unregister_forfeits_bet() {
        let engine = RoundEngine::new(RoundConfig::diagnostic());
        let (id, _rx) = connect(&engine);

        assert_eq!(engine.submit_bet(&id, Some(BetRequest::new("ann", 10.0, 3))), Submission::Accepted);
        assert!(engine.bet_for(&id).is_some());

        assert!(engine.unregister(&id));
        assert!(engine.bet_for(&id).is_none());
        assert!(!engine.is_registered(&id));
        assert!(!engine.unregister(&id));
    }

    #[test]
    fn test_bet_outside_window_sends_one_error() {
        let engine = RoundEngine::new(RoundConfig::timed(10));
        let (id, mut rx) = connect(&engine);
        drain(&mut rx);

        let result = engine.submit_bet(&id, Some(BetRequest::new("ann", 10.0, 3)));

        assert_eq!(result, Submission::WindowClosed);
        assert_eq!(engine.bet_count(), 0);
        assert_eq!(drain(&mut rx), vec![OutboundEvent::betting_closed()]);
    }

    #[test]
    fn test_absent_or_unknown_submissions_are_ignored() {
        let engine = RoundEngine::new(RoundConfig::diagnostic());
        let (id, mut rx) = connect(&engine);
        drain(&mut rx);

        assert_eq!(engine.submit_bet(&id, None), Submission::Ignored);
        assert_eq!(
            engine.submit_bet(&ConnectionId::new(), Some(BetRequest::new("x", 1.0, 1))),
            Submission::Ignored
        );
        assert_eq!(engine.bet_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_invalid_bet_is_silent() {
        let engine = RoundEngine::new(RoundConfig::diagnostic());
        let (id, mut rx) = connect(&engine);
        drain(&mut rx);

        let result = engine.submit_bet(&id, Some(BetRequest::new("ann", 10.0, 42)));

        assert_eq!(result, Submission::Invalid(BetError::PickOutOfRange(42)));
        assert_eq!(engine.bet_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_manual_round_settles_and_resets() {
        let engine = RoundEngine::with_draw(RoundConfig::diagnostic(), FixedDraw(5));
        let (ann, mut ann_rx) = connect(&engine);
        let (bob, mut bob_rx) = connect(&engine);
        let (_spectator, mut spectator_rx) = connect(&engine);
        drain(&mut ann_rx);
        drain(&mut bob_rx);
        drain(&mut spectator_rx);

        engine.submit_bet(&ann, Some(BetRequest::new("ann", 100.0, 5)));
        engine.submit_bet(&bob, Some(BetRequest::new("bob", 50.0, 3)));

        let outcome = engine.resolve_round().unwrap();

        assert_eq!(outcome.drawn, 5);
        assert_eq!(outcome.round, 1);
        assert_eq!(outcome.total_staked, 150.0);
        assert_eq!(outcome.total_paid, 100.0 * PAYOUT_MULTIPLIER);
        assert_eq!(outcome.winners.len(), 1);
        assert_eq!(engine.phase(), RoundPhase::Waiting);
        assert_eq!(engine.bet_count(), 0);
        assert_eq!(engine.last_draw(), Some(5));

        let ann_events = drain(&mut ann_rx);
        assert_eq!(kinds(&ann_events), vec!["ROUND_RESULT", "ROUND_END"]);
        assert_eq!(ann_events[0].winning(), Some(100.0 * PAYOUT_MULTIPLIER));

        let bob_events = drain(&mut bob_rx);
        assert_eq!(bob_events[0].winning(), Some(0.0));

        let spectator_events = drain(&mut spectator_rx);
        assert_eq!(kinds(&spectator_events), vec!["ROUND_RESULT", "ROUND_END"]);
        assert_eq!(spectator_events[0].winning(), None);
    }

    #[test]
    fn test_resolve_requires_betting() {
        let engine = RoundEngine::new(RoundConfig::timed(10));
        assert!(engine.resolve_round().is_err());
        assert_eq!(engine.rounds_played(), 0);
    }

    #[test]
    fn test_manual_drive_reopens() {
        let engine = RoundEngine::with_draw(RoundConfig::diagnostic(), FixedDraw(2));
        let (id, mut rx) = connect(&engine);

        engine.resolve_round().unwrap();
        assert_eq!(engine.submit_bet(&id, Some(BetRequest::new("ann", 1.0, 2))), Submission::WindowClosed);

        engine.open_round().unwrap();
        assert_eq!(engine.submit_bet(&id, Some(BetRequest::new("ann", 1.0, 2))), Submission::Accepted);
        let outcome = engine.resolve_with(2).unwrap();

        assert_eq!(outcome.round, 2);
        assert_eq!(outcome.total_paid, PAYOUT_MULTIPLIER);
        assert!(drain(&mut rx).iter().any(|e| e.kind() == "ROUND_START"));
    }

    #[test]
    fn test_draw_of_zero_is_reported() {
        let engine = RoundEngine::new(RoundConfig::diagnostic());
        assert_eq!(engine.last_draw(), None);

        engine.resolve_with(0).unwrap();
        assert_eq!(engine.last_draw(), Some(0));
    }

    #[test]
    fn test_cycle_saturates() {
        let config = RoundConfig { duration_secs: 10, pause_secs: u64::MAX };
        assert_eq!(config.cycle_secs(), u64::MAX);
    }

    #[test]
    fn test_bet_stored_after_drain_is_withdrawn() {
        let engine = RoundEngine::new(RoundConfig::diagnostic());
        let (late, _late_rx) = connect(&engine);
        let (early, _early_rx) = connect(&engine);

        // Taken by resolution before the phase check ran: stays accepted
        engine.bets.place(early, BetRequest::new("ann", 1.0, 3)).unwrap();
        engine.phase.force(RoundPhase::Resolving);
        assert_eq!(engine.bets.drain_settled(3).len(), 1);
        assert!(!engine.withdraw_late_bet(&early));

        // Landed after the drain: pulled back instead of lingering
        engine.bets.place(late, BetRequest::new("bob", 1.0, 3)).unwrap();
        assert!(engine.withdraw_late_bet(&late));
        assert_eq!(engine.bet_count(), 0);
        assert_eq!(engine.reject_closed(&late), Submission::WindowClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_keeps_round_start() {
        let engine = RoundEngine::new(RoundConfig::timed(10));
        engine.open_round().unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(engine.open_round().is_err());
        assert_eq!(engine.time_remaining(), 7);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_recover_resets_stuck_resolution() {
        let engine = RoundEngine::new(RoundConfig::diagnostic());
        let (id, _rx) = connect(&engine);
        engine.submit_bet(&id, Some(BetRequest::new("ann", 1.0, 1)));

        engine.phase.force(RoundPhase::Resolving);
        engine.recover();

        assert_eq!(engine.phase(), RoundPhase::Waiting);
        assert_eq!(engine.bet_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_round_pays_winner() {
        let engine = Arc::new(RoundEngine::with_draw(RoundConfig::timed(1), FixedDraw(7)));
        let handle = engine.start();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(engine.phase(), RoundPhase::Betting);

        let (id, mut rx) = connect(&engine);
        let result = engine.submit_bet(&id, Some(BetRequest::new("ann", 100.0, 7)));
        assert_eq!(result, Submission::Accepted);

        tokio::time::sleep(Duration::from_millis(1000)).await;

        let events = drain(&mut rx);
        assert_eq!(kinds(&events), vec!["COUNTDOWN", "ROUND_RESULT", "ROUND_END"]);
        assert_eq!(events[1].winning(), Some(100.0 * PAYOUT_MULTIPLIER));
        assert_eq!(engine.phase(), RoundPhase::Waiting);
        assert_eq!(engine.bet_count(), 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_on_even_seconds() {
        let engine = Arc::new(RoundEngine::with_draw(RoundConfig::timed(4), FixedDraw(1)));
        let handle = engine.start();
        let (_id, mut rx) = connect(&engine);

        // Round opens at 1s, resolves at 5s
        tokio::time::sleep(Duration::from_millis(5500)).await;

        let events = drain(&mut rx);
        assert_eq!(
            kinds(&events),
            vec!["WELCOME", "ROUND_START", "COUNTDOWN", "COUNTDOWN", "ROUND_RESULT", "ROUND_END"]
        );
        assert_eq!(events[1].time_remaining(), Some(4));
        assert_eq!(events[2].time_remaining(), Some(2));
        assert_eq!(events[3].time_remaining(), Some(0));

        // Next round opens after the one second pause
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.phase(), RoundPhase::Betting);
        assert_eq!(kinds(&drain(&mut rx)), vec!["ROUND_START"]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_joiner_sees_time_left() {
        let engine = Arc::new(RoundEngine::new(RoundConfig::timed(10)));
        let handle = engine.start();

        // Round opened at 1s; 3.5s elapsed since
        tokio::time::sleep(Duration::from_millis(4500)).await;
        let (_id, mut rx) = connect(&engine);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "COUNTDOWN");
        assert_eq!(events[0].time_remaining(), Some(7));

        handle.shutdown().await;
    }

    struct PanicsOnce {
        tripped: AtomicBool,
    }

    impl DrawSource for PanicsOnce {
        fn draw(&self) -> u8 {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("draw failed");
            }
            4
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_panicking_draw() {
        let draw = PanicsOnce { tripped: AtomicBool::new(false) };
        let engine = Arc::new(RoundEngine::with_draw(RoundConfig::timed(2), draw));
        let handle = engine.start();

        // First resolution at 3s panics and is abandoned
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(handle.is_running());
        assert_eq!(engine.phase(), RoundPhase::Waiting);
        assert_eq!(engine.rounds_played(), 0);

        // Next round opens at 4s and resolves at 6s
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(engine.rounds_played(), 1);
        assert_eq!(engine.last_draw(), Some(4));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_rounds() {
        let engine = Arc::new(RoundEngine::new(RoundConfig::timed(2)));
        let handle = engine.start();
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(engine.rounds_played(), 1);

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(engine.rounds_played(), 1);
    }
}
