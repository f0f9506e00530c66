//! Draw Source
//!
//! Picks the winning number for a round, uniform over `PICK_MIN..=PICK_MAX`.
//! Every source owns its own generator behind a mutex, so independent
//! engines never share random state.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::rng::DeterministicRng;
use crate::{PICK_MAX, PICK_MIN};

/// Something that can draw a winning number.
pub trait DrawSource: Send + Sync {
    /// Draw one value in `PICK_MIN..=PICK_MAX`.
    fn draw(&self) -> u8;
}

/// Entropy-seeded uniform draw for live rounds.
#[derive(Debug)]
pub struct UniformDraw {
    rng: Mutex<StdRng>,
}

impl UniformDraw {
    /// Seed a fresh generator from the OS.
    pub fn new() -> Self {
        Self { rng: Mutex::new(StdRng::from_entropy()) }
    }
}

impl Default for UniformDraw {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawSource for UniformDraw {
    fn draw(&self) -> u8 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_range(PICK_MIN..=PICK_MAX)
    }
}

/// Reproducible draw stream from a seed.
#[derive(Debug)]
pub struct SeededDraw {
    rng: Mutex<DeterministicRng>,
}

impl SeededDraw {
    /// Start a stream at `seed`.
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(DeterministicRng::new(seed)) }
    }
}

impl DrawSource for SeededDraw {
    fn draw(&self) -> u8 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.next_int_range(PICK_MIN as i32, PICK_MAX as i32) as u8
    }
}

/// Always draws the same number. Useful for pinning an outcome.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub u8);

impl DrawSource for FixedDraw {
    fn draw(&self) -> u8 {
        self.0
    }
}
