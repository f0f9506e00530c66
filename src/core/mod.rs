//! Core primitives.
//!
//! Reproducible randomness for simulations and pinned test outcomes.

pub mod rng;

pub use rng::DeterministicRng;
