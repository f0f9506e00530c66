//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Outbound events are JSON objects tagged by `type`; optional fields are
//! omitted rather than sent as `null`.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::bet::BetRequest;
use crate::game::payout::Winner;

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Events pushed from server to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEvent {
    /// Betting window opened.
    #[serde(rename_all = "camelCase")]
    RoundStart {
        message: String,
        time_remaining: u32,
    },

    /// Seconds left in the betting window.
    #[serde(rename_all = "camelCase")]
    Countdown {
        message: String,
        time_remaining: u32,
    },

    /// Round outcome. `winning` is only present on a bettor's personal copy.
    #[serde(rename_all = "camelCase")]
    RoundResult {
        message: String,
        winning_number: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        winning: Option<f64>,
        winners: Vec<Winner>,
    },

    /// Round finished; next one starts after the pause.
    RoundEnd {
        message: String,
    },

    /// Greeting for a connection that joins between rounds.
    Welcome {
        message: String,
    },

    /// Request rejected.
    Error {
        message: String,
    },
}

impl OutboundEvent {
    /// Round start announcement.
    pub fn round_start(duration_secs: u32) -> Self {
        Self::RoundStart {
            message: format!("Round has started! {duration_secs} seconds until the result."),
            time_remaining: duration_secs,
        }
    }

    /// Periodic countdown broadcast.
    pub fn countdown(seconds_left: u32) -> Self {
        Self::Countdown {
            message: format!("Time remaining: {seconds_left} seconds"),
            time_remaining: seconds_left,
        }
    }

    /// Countdown sent to a connection that joins mid-round.
    pub fn late_join(seconds_left: u32) -> Self {
        Self::Countdown {
            message: format!("Welcome! Round is running! Time remaining: {seconds_left} seconds"),
            time_remaining: seconds_left,
        }
    }

    /// Greeting between rounds.
    pub fn welcome() -> Self {
        Self::Welcome {
            message: "Welcome! Please wait for the next round.".to_string(),
        }
    }

    /// Shared result for spectators.
    pub fn round_result(winning_number: u8, winners: Vec<Winner>) -> Self {
        Self::RoundResult {
            message: String::new(),
            winning_number,
            winning: None,
            winners,
        }
    }

    /// Result addressed to a single bettor.
    pub fn personal_result(
        nickname: &str,
        winning: f64,
        winning_number: u8,
        winners: Vec<Winner>,
    ) -> Self {
        let message = if winning > 0.0 {
            format!("Congratulations {nickname}! You won: {winning:?}")
        } else {
            format!("Sorry {nickname}, better luck next time!")
        };
        Self::RoundResult {
            message,
            winning_number,
            winning: Some(winning),
            winners,
        }
    }

    /// End of round notice.
    pub fn round_end() -> Self {
        Self::RoundEnd {
            message: "End of round! Please wait for the next round to start.".to_string(),
        }
    }

    /// Bet arrived outside the betting window.
    pub fn betting_closed() -> Self {
        Self::Error {
            message: "Betting phase is over. Please wait for the next round.".to_string(),
        }
    }

    /// Wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoundStart { .. } => "ROUND_START",
            Self::Countdown { .. } => "COUNTDOWN",
            Self::RoundResult { .. } => "ROUND_RESULT",
            Self::RoundEnd { .. } => "ROUND_END",
            Self::Welcome { .. } => "WELCOME",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Personal payout carried by a result event, if any.
    pub fn winning(&self) -> Option<f64> {
        match self {
            Self::RoundResult { winning, .. } => *winning,
            _ => None,
        }
    }

    /// Seconds left carried by the event, if any.
    pub fn time_remaining(&self) -> Option<u32> {
        match self {
            Self::RoundStart { time_remaining, .. } | Self::Countdown { time_remaining, .. } => {
                Some(*time_remaining)
            }
            _ => None,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Inbound frame decoding errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame was empty or whitespace.
    #[error("request message cannot be empty")]
    Empty,

    /// Frame is not JSON at all.
    #[error("invalid JSON format: {0}")]
    NotJson(#[source] serde_json::Error),

    /// Frame is JSON but not a bet.
    #[error("malformed bet payload: {0}")]
    Shape(#[source] serde_json::Error),
}

/// Wire shape of a bet, before it reaches the round engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BetPayload {
    nickname: String,
    bet_amount: f64,
    picked_number: i64,
}

impl From<BetPayload> for BetRequest {
    fn from(payload: BetPayload) -> Self {
        BetRequest {
            nickname: payload.nickname,
            stake: payload.bet_amount,
            picked: payload.picked_number,
        }
    }
}

/// Decode a raw text frame into a bet request.
///
/// The frame must be well-formed JSON first; a JSON `null` decodes to
/// `Ok(None)` and is handed to the engine as an absent payload.
pub fn decode_bet(raw: &str) -> Result<Option<BetRequest>, ProtocolError> {
    if raw.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    let value: serde_json::Value = serde_json::from_str(raw).map_err(ProtocolError::NotJson)?;
    let payload: Option<BetPayload> = serde_json::from_value(value).map_err(ProtocolError::Shape)?;
    Ok(payload.map(BetRequest::from))
}
