//! # Guess Round Server
//!
//! Real-time guess-the-number betting rounds over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    GUESS ROUND SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Primitives                               │
//! │  └── rng.rs       - Deterministic Xorshift128+ PRNG          │
//! │                                                              │
//! │  game/            - Round logic                              │
//! │  ├── phase.rs     - WAITING / BETTING / RESOLVING            │
//! │  ├── bet.rs       - Bets and the bet registry                │
//! │  ├── payout.rs    - Payout law, winner ranking               │
//! │  ├── draw.rs      - Winning number sources                   │
//! │  ├── registry.rs  - Connection registry                      │
//! │  ├── broadcast.rs - Event fan-out                            │
//! │  ├── round.rs     - Round engine and timer                   │
//! │  └── simulation.rs- RTP simulation                           │
//! │                                                              │
//! │  network/         - Transport                                │
//! │  ├── server.rs    - WebSocket server                         │
//! │  ├── protocol.rs  - Wire events and bet decoding             │
//! │  └── session.rs   - Per-client outbound queues               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Round Cycle
//!
//! A round opens one second after start, takes bets for `duration`
//! seconds with a countdown on every even second, then draws a number in
//! `1..=10` and pays `stake * 9.9` to every matching pick. After a one
//! second pause the next round opens.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::round::{RoundConfig, RoundEngine};
pub use game::phase::RoundPhase;
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Smallest pickable number.
pub const PICK_MIN: u8 = 1;

/// Largest pickable number.
pub const PICK_MAX: u8 = 10;

/// Winning bets pay `stake * PAYOUT_MULTIPLIER`.
pub const PAYOUT_MULTIPLIER: f64 = 9.9;

/// Default betting window (seconds)
pub const DEFAULT_ROUND_SECS: i64 = 10;

/// Body of the `GET /hello` health check.
pub const HELLO_GREETING: &str = "Hello from the guess round server!";
