//! # Conquer Game Server
//!
//! Authoritative server for Conquer, a two-player draw-and-discard card
//! game played for stakes. The rules engine is fully deterministic; the
//! network layer drives it and broadcasts per-viewer snapshots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CONQUER SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  └── rng.rs      - Deterministic Xorshift128+ PRNG + seeds   │
//! │                                                              │
//! │  game/           - Rules engine (deterministic)              │
//! │  ├── card.rs     - Cards, ranks, suits, deck construction    │
//! │  ├── meld.rs     - Meld classification and scoring           │
//! │  ├── deadwood.rs - Unmelded-hand scoring, canonical sort     │
//! │  ├── rules.rs    - Legality checks (melds, layoffs, gates)   │
//! │  ├── state.rs    - Game, player, and layoff state            │
//! │  └── turn.rs     - The turn state machine                    │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - WebSocket server and action dispatch      │
//! │  ├── protocol.rs - Message types and redacted snapshots      │
//! │  ├── session.rs  - Game tables, settlements, cleanup         │
//! │  └── auth.rs     - JWT validation                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic** apart
//! from layoff timestamps, which are informational only:
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - All randomness from seeded Xorshift128+
//!
//! Given the same seed, the deal and every subsequent validated action
//! produce identical state on any platform, so a completed game can be
//! audited from its seed and action log.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::{derive_game_seed, DeterministicRng};
pub use game::state::{GameMode, GameState, GameStatus, Player};
pub use game::{Card, GameError, Meld, MeldKind, Rank, Suit};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Deck size: 52 standard cards plus two printed jokers.
pub const DECK_SIZE: usize = 54;

/// Cards dealt to each player.
pub const HAND_SIZE: usize = 13;

/// Smallest meld at formation time.
pub const MELD_MIN: usize = 3;

/// Largest meld at formation time (layoff may grow melds past this).
pub const MELD_MAX: usize = 4;

/// Meld points required to discard after a discard-pile draw.
pub const DISCARD_POINT_THRESHOLD: u32 = 41;

/// Visible melds that satisfy the discard gate instead of points.
pub const DISCARD_MELD_THRESHOLD: usize = 3;

/// Own visible melds required before laying off to the opponent.
pub const OPPONENT_LAYOFF_MIN_MELDS: usize = 2;

/// Smallest allowed stake.
pub const MIN_BET: u32 = 20;

/// Largest allowed stake.
pub const MAX_BET: u32 = 1000;

/// Winner payout numerator: both stakes times 9/10.
pub const PAYOUT_NUMERATOR: u32 = 9;

/// Winner payout denominator.
pub const PAYOUT_DENOMINATOR: u32 = 10;

/// Run value assigned to a joker whose position admits no reading.
pub const JOKER_FALLBACK_VALUE: u8 = 9;
