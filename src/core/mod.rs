//! Core deterministic primitives.
//!
//! Everything here is reproducible from its inputs alone: the same seed
//! always deals the same game.

pub mod rng;

// Re-export core types
pub use rng::{derive_game_seed, DeterministicRng};
