//! Rules Engine
//!
//! All game rules and state transitions. Fully deterministic and free of
//! I/O; the network layer drives it through validated actions.
//!
//! ## Module Structure
//!
//! - `card`: card, rank, suit, deck construction
//! - `meld`: meld classification and scoring (joker resolution)
//! - `deadwood`: unmelded-hand scoring and canonical sort
//! - `rules`: legality checks for melds, layoffs, discards, substitutions
//! - `state`: per-game state, players, melds, layoff history
//! - `turn`: the turn state machine (validated transitions)

pub mod card;
pub mod deadwood;
pub mod meld;
pub mod rules;
pub mod state;
pub mod turn;

// Re-export key types
pub use card::{standard_deck, Card, JokerKind, Rank, Suit};
pub use meld::{classify, meld_points, Meld, MeldKind};
pub use state::{ChatId, GameAction, GameId, GameMode, GameState, GameStatus, LayoffRecord, Player};
pub use turn::DrawSource;

/// Rule violations surfaced to callers. Every rejected action leaves the
/// game state unchanged; only the acting player sees the error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// The acting player is not the current player.
    #[error("not your turn")]
    NotYourTurn,

    /// The game is not in the playing state.
    #[error("game is not in progress")]
    GameNotPlaying,

    /// The game cannot be joined (wrong state or already a member).
    #[error("game is not joinable")]
    GameNotJoinable,

    /// Both player slots are taken.
    #[error("game already has two players")]
    GameFull,

    /// The selected cards do not form a 3-4 card run or set.
    #[error("selected cards do not form a valid meld")]
    InvalidMeldShape,

    /// A meld with no non-joker members cannot be classified.
    #[error("meld has no non-joker cards to classify")]
    AmbiguousMeld,

    /// The card does not legally extend the target meld, or the opponent
    /// layoff gate (two own visible melds) is not met.
    #[error("illegal layoff: {0}")]
    IllegalLayoff(&'static str),

    /// Discard refused after a discard-pile draw.
    #[error("discard blocked: {0}")]
    DiscardBlocked(&'static str),

    /// The replacement card is not the literal card the joker stands in
    /// for, or an index was out of range.
    #[error("replacement does not match the joker's position")]
    JokerSubstitutionMismatch,

    /// Acting on another player's record, hand, or hidden meld.
    #[error("action targets another player's cards or records")]
    Forbidden,

    /// The layoff record is sealed by the winning action.
    #[error("layoff is locked by the winning action")]
    Locked,

    /// The reorder is not a permutation of the current hand indices.
    #[error("reorder must be a permutation of the current hand")]
    InvalidReorder,

    /// The requested draw source has no cards.
    #[error("draw source is empty")]
    EmptySource,

    /// A draw is required before this action.
    #[error("draw a card first")]
    MustDrawFirst,

    /// The turn's single draw has already been taken.
    #[error("already drew this turn")]
    AlreadyDrawn,

    /// A card, meld, or record index is out of range.
    #[error("index out of range")]
    InvalidIndex,

    /// A poke is already outstanding from this player.
    #[error("a poke is already outstanding")]
    PokePending,

    /// An external collaborator (identity, ledger) failed; callers retry.
    #[error("upstream service unavailable")]
    TransientUpstreamError,
}
