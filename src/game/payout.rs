//! Payout Engine
//!
//! A bet pays `stake * PAYOUT_MULTIPLIER` when its pick equals the draw and
//! nothing otherwise. With ten equally likely faces and a 9.9 multiplier the
//! long-run return to players is 0.99.

use serde::{Serialize, Deserialize};

use crate::game::bet::Bet;
use crate::PAYOUT_MULTIPLIER;

/// One line of the ranked winners list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Winner {
    /// Winner's display name.
    pub nickname: String,
    /// Amount won.
    pub winning: f64,
}

/// Payout for a single stake and pick against a drawn number.
#[inline]
pub fn payout_for(stake: f64, picked: u8, drawn: u8) -> f64 {
    if picked == drawn {
        stake * PAYOUT_MULTIPLIER
    } else {
        0.0
    }
}

/// Settle every bet against `drawn` and return the ranked winners.
pub fn resolve(drawn: u8, bets: &mut [Bet]) -> Vec<Winner> {
    for bet in bets.iter_mut() {
        bet.settle(drawn);
    }
    rank_winners(bets)
}

/// Winners sorted by payout, largest first.
///
/// Equal payouts keep acceptance order (earlier bet first).
pub fn rank_winners(bets: &[Bet]) -> Vec<Winner> {
    let mut paid: Vec<&Bet> = bets.iter().filter(|bet| bet.payout() > 0.0).collect();
    paid.sort_by(|a, b| {
        b.payout()
            .total_cmp(&a.payout())
            .then_with(|| a.seq().cmp(&b.seq()))
    });

    paid.into_iter()
        .map(|bet| Winner {
            nickname: bet.nickname().to_string(),
            winning: bet.payout(),
        })
        .collect()
}
