//! Game Logic Module
//!
//! The betting round and everything it touches.
//!
//! ## Module Structure
//!
//! - `phase`: Round phase and guarded transitions
//! - `bet`: Bet validation and the pending bet registry
//! - `payout`: Payout law and winner ranking
//! - `draw`: Winning number sources
//! - `registry`: Connection capability and registry
//! - `broadcast`: Fault-tolerant event fan-out
//! - `round`: Round engine (timer, submission, resolution)
//! - `simulation`: Return-to-player simulation in diagnostic mode

pub mod phase;
pub mod bet;
pub mod payout;
pub mod draw;
pub mod registry;
pub mod broadcast;
pub mod round;
pub mod simulation;

// Re-export key types
pub use bet::{Bet, BetError, BetRegistry, BetRequest};
pub use draw::{DrawSource, FixedDraw, SeededDraw, UniformDraw};
pub use payout::Winner;
pub use phase::{PhaseError, RoundPhase};
pub use registry::{Connection, ConnectionId, ConnectionRef, ConnectionRegistry};
pub use round::{EngineHandle, RoundConfig, RoundEngine, RoundOutcome, Submission};
pub use simulation::{simulate, SimulationConfig, SimulationReport};
