//! Round phase and its guarded transitions.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Phase of the live round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoundPhase {
    /// Between rounds. Connections are accepted, bets are not.
    Waiting = 0,
    /// Betting window open.
    Betting = 1,
    /// Draw, payouts and result broadcast in progress.
    Resolving = 2,
}

impl RoundPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Betting,
            2 => Self::Resolving,
            _ => Self::Waiting,
        }
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "WAITING",
            Self::Betting => "BETTING",
            Self::Resolving => "RESOLVING",
        };
        f.write_str(name)
    }
}

/// A transition was attempted from the wrong phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move to {to} from {actual} (expected {expected})")]
pub struct PhaseError {
    /// Phase the caller expected.
    pub expected: RoundPhase,
    /// Phase actually found.
    pub actual: RoundPhase,
    /// Requested target.
    pub to: RoundPhase,
}

/// Atomic holder for the round phase.
///
/// Reads are lock-free; moves go through a compare-and-swap so two
/// callers can never both win the same transition.
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    /// Start in `phase`.
    pub fn new(phase: RoundPhase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    /// Current phase.
    pub fn get(&self) -> RoundPhase {
        RoundPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to`, failing if the phase is not `from`.
    pub fn transition(&self, from: RoundPhase, to: RoundPhase) -> Result<(), PhaseError> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| PhaseError {
                expected: from,
                actual: RoundPhase::from_u8(actual),
                to,
            })
    }

    /// Set the phase unconditionally. Only for recovery and manual drive.
    pub fn force(&self, phase: RoundPhase) -> RoundPhase {
        RoundPhase::from_u8(self.0.swap(phase as u8, Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_cycle() {
        let cell = PhaseCell::new(RoundPhase::Waiting);

        cell.transition(RoundPhase::Waiting, RoundPhase::Betting).unwrap();
        cell.transition(RoundPhase::Betting, RoundPhase::Resolving).unwrap();
        cell.transition(RoundPhase::Resolving, RoundPhase::Waiting).unwrap();
        assert_eq!(cell.get(), RoundPhase::Waiting);
    }

    #[test]
    fn test_wrong_source_phase_fails() {
        let cell = PhaseCell::new(RoundPhase::Waiting);
        let err = cell.transition(RoundPhase::Betting, RoundPhase::Resolving).unwrap_err();

        assert_eq!(err.actual, RoundPhase::Waiting);
        assert_eq!(cell.get(), RoundPhase::Waiting);
    }

    #[test]
    fn test_only_one_racer_wins() {
        let cell = std::sync::Arc::new(PhaseCell::new(RoundPhase::Betting));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = cell.clone();
                std::thread::spawn(move || {
                    cell.transition(RoundPhase::Betting, RoundPhase::Resolving).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_force_returns_previous() {
        let cell = PhaseCell::new(RoundPhase::Resolving);
        assert_eq!(cell.force(RoundPhase::Waiting), RoundPhase::Resolving);
        assert_eq!(cell.get(), RoundPhase::Waiting);
    }
}
