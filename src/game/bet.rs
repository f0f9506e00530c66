//! Bets and the per-round bet registry.
//!
//! At most one live bet exists per connection. A resubmission during the
//! same betting window replaces the previous bet outright.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use thiserror::Error;

use crate::game::payout;
use crate::game::registry::ConnectionId;
use crate::{PICK_MAX, PICK_MIN};

/// A bet as decoded from the wire, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct BetRequest {
    /// Display name shown in the winners list.
    pub nickname: String,
    /// Amount wagered.
    pub stake: f64,
    /// Guessed number.
    pub picked: i64,
}

impl BetRequest {
    /// Convenience constructor.
    pub fn new(nickname: impl Into<String>, stake: f64, picked: i64) -> Self {
        Self { nickname: nickname.into(), stake, picked }
    }
}

/// Reasons a request cannot become a bet.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BetError {
    /// Nickname missing.
    #[error("nickname must not be empty")]
    EmptyNickname,

    /// Stake is zero, negative, or not a finite number.
    #[error("stake must be a positive finite amount, got {0}")]
    InvalidStake(f64),

    /// Picked number outside the drawable range.
    #[error("picked number {0} outside 1..=10")]
    PickOutOfRange(i64),
}

/// An accepted bet for the current round.
#[derive(Debug, Clone, PartialEq)]
pub struct Bet {
    owner: ConnectionId,
    nickname: String,
    stake: f64,
    picked: u8,
    seq: u64,
    payout: Option<f64>,
}

impl Bet {
    /// Validate a request and build a bet owned by `owner`.
    ///
    /// `seq` orders bets by acceptance time and breaks payout ties.
    pub fn new(owner: ConnectionId, request: BetRequest, seq: u64) -> Result<Self, BetError> {
        if request.nickname.trim().is_empty() {
            return Err(BetError::EmptyNickname);
        }
        if !request.stake.is_finite() || request.stake <= 0.0 {
            return Err(BetError::InvalidStake(request.stake));
        }
        if request.picked < PICK_MIN as i64 || request.picked > PICK_MAX as i64 {
            return Err(BetError::PickOutOfRange(request.picked));
        }

        Ok(Self {
            owner,
            nickname: request.nickname,
            stake: request.stake,
            picked: request.picked as u8,
            seq,
            payout: None,
        })
    }

    /// Connection that placed the bet.
    pub fn owner(&self) -> ConnectionId {
        self.owner
    }

    /// Display name.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Amount wagered.
    pub fn stake(&self) -> f64 {
        self.stake
    }

    /// Guessed number.
    pub fn picked(&self) -> u8 {
        self.picked
    }

    /// Acceptance sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Payout, or 0 before resolution.
    pub fn payout(&self) -> f64 {
        self.payout.unwrap_or(0.0)
    }

    /// Whether resolution has set the payout.
    pub fn is_settled(&self) -> bool {
        self.payout.is_some()
    }

    /// Set the payout against a drawn number. Once set, it never changes.
    pub fn settle(&mut self, drawn: u8) -> f64 {
        let (stake, picked) = (self.stake, self.picked);
        *self
            .payout
            .get_or_insert_with(|| payout::payout_for(stake, picked, drawn))
    }
}

/// Concurrent map of pending bets, keyed by connection.
#[derive(Debug, Default)]
pub struct BetRegistry {
    bets: DashMap<ConnectionId, Bet>,
    next_seq: AtomicU64,
}

impl BetRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a bet, replacing any earlier bet from the same connection.
    pub fn place(&self, owner: ConnectionId, request: BetRequest) -> Result<(), BetError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let bet = Bet::new(owner, request, seq)?;
        self.bets.insert(owner, bet);
        Ok(())
    }

    /// Drop the bet of a connection, if any.
    pub fn remove(&self, owner: &ConnectionId) -> Option<Bet> {
        self.bets.remove(owner).map(|(_, bet)| bet)
    }

    /// Copy of one connection's bet.
    pub fn get(&self, owner: &ConnectionId) -> Option<Bet> {
        self.bets.get(owner).map(|entry| entry.value().clone())
    }

    /// Whether a connection has a live bet.
    pub fn contains(&self, owner: &ConnectionId) -> bool {
        self.bets.contains_key(owner)
    }

    /// Take every live bet out of the registry, settled against the draw,
    /// in acceptance order.
    ///
    /// Each bet is removed and settled in one step, so a bet placed while
    /// this runs is either part of the result or still in the registry
    /// afterwards, never both and never lost.
    pub fn drain_settled(&self, drawn: u8) -> Vec<Bet> {
        let owners: Vec<ConnectionId> = self.bets.iter().map(|entry| *entry.key()).collect();
        let mut bets: Vec<Bet> = owners
            .iter()
            .filter_map(|owner| self.remove(owner))
            .map(|mut bet| {
                bet.settle(drawn);
                bet
            })
            .collect();
        bets.sort_by_key(Bet::seq);
        bets
    }

    /// Copy of all live bets in acceptance order.
    pub fn snapshot(&self) -> Vec<Bet> {
        let mut bets: Vec<Bet> = self.bets.iter().map(|entry| entry.value().clone()).collect();
        bets.sort_by_key(Bet::seq);
        bets
    }

    /// Number of live bets.
    pub fn len(&self) -> usize {
        self.bets.len()
    }

    /// Whether no bets are live.
    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }

    /// Forget every bet. Called once per round at the end.
    pub fn clear(&self) {
        self.bets.clear();
    }
}
