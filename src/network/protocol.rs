//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON for debugging ease,
//! with optional binary (bincode) for production.

use serde::{Deserialize, Serialize};

use crate::game::card::Card;
use crate::game::meld::Meld;
use crate::game::state::{
    ChatId, GameAction, GameId, GameMode, GameState, GameStatus, LayoffRecord, TrueJoker,
};
use crate::game::turn::DrawSource;
use crate::game::GameError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with the server.
    Auth {
        /// JWT bearing the player identity.
        token: String,
    },

    /// Create a new game and post the stake.
    CreateGame { bet_amount: u32 },

    /// Join a waiting game; the joiner selects the mode and moves first.
    JoinGame {
        game_id: GameId,
        game_type: GameMode,
    },

    /// Draw one card from the chosen source.
    DrawCard {
        game_id: GameId,
        source: DrawSource,
    },

    /// Form a new meld from hand indices (order matters for jokers).
    MeldCards {
        game_id: GameId,
        card_indices: Vec<usize>,
    },

    /// Reveal one of the player's own hidden melds.
    MakeMeldVisible {
        game_id: GameId,
        meld_index: usize,
    },

    /// Lay one card off onto an existing visible meld.
    LayoffCard {
        game_id: GameId,
        card_index: usize,
        target_player_chat_id: ChatId,
        target_meld_index: usize,
    },

    /// Reverse one of the player's own layoff records.
    RemoveLayoff {
        game_id: GameId,
        layoff_index: usize,
    },

    /// Swap a hand card for the joker standing in for it.
    SubstituteJoker {
        game_id: GameId,
        target_player_chat_id: ChatId,
        meld_index: usize,
        joker_index: usize,
        replacement_index: usize,
    },

    /// Discard one card, ending the turn.
    DiscardCard {
        game_id: GameId,
        card_index: usize,
    },

    /// Sort the hand into canonical order (cosmetic).
    SortHand { game_id: GameId },

    /// Apply an arbitrary permutation to the hand (cosmetic).
    ReorderHand {
        game_id: GameId,
        new_order: Vec<usize>,
    },

    /// Nudge the opponent to act.
    PokeOpponent { game_id: GameId },

    /// Leave the game (cancel while waiting, forfeit while playing).
    LeaveGame { game_id: GameId },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// A game was created for this player.
    GameCreated { game_id: GameId, bet_amount: u32 },

    /// Full per-viewer snapshot, sent after every accepted action.
    State(GameSnapshot),

    /// The opponent poked this player.
    PokeReceived {
        from_username: String,
        poke_count: u32,
    },

    /// This player's poke was delivered.
    PokeSent,

    /// Error message (sent only to the acting player).
    Error(ServerError),

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Authenticated identity if successful.
    pub chat_id: Option<ChatId>,
    /// Display name if successful.
    pub username: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// What the viewer sees of their own seat: everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub chat_id: ChatId,
    pub username: String,
    pub is_host: bool,
    pub hand: Vec<Card>,
    pub melds: Vec<Meld>,
    pub deadwood: u32,
    pub meld_points: u32,
    pub has_drawn: bool,
    pub has_drawn_from_discard: bool,
}

/// What the viewer sees of the opponent: counts and revealed melds only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpponentView {
    pub chat_id: ChatId,
    pub username: String,
    pub is_host: bool,
    pub hand_count: usize,
    pub visible_melds: Vec<Meld>,
    pub hidden_meld_count: usize,
}

/// Per-viewer redacted projection of a game. Hidden information (the
/// opponent's hand and hidden melds, the stock order) never crosses
/// the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub game_id: GameId,
    pub status: GameStatus,
    pub mode: Option<GameMode>,
    pub bet_amount: u32,
    pub you: Option<PlayerView>,
    pub opponent: Option<OpponentView>,
    pub top_discard: Option<Card>,
    pub stock_count: usize,
    pub base_card: Option<Card>,
    pub true_jokers: Vec<TrueJoker>,
    pub current_player: Option<ChatId>,
    pub last_action: GameAction,
    pub layoff_history: Vec<LayoffRecord>,
    pub poked_by: Option<ChatId>,
    pub winner: Option<ChatId>,
}

impl GameSnapshot {
    /// Project the authoritative state for one viewer.
    pub fn for_viewer(state: &GameState, viewer: ChatId) -> Self {
        let you = state.player(viewer).map(|p| PlayerView {
            chat_id: p.chat_id,
            username: p.username.clone(),
            is_host: p.is_host,
            hand: p.hand.clone(),
            melds: p.melds.clone(),
            deadwood: p.deadwood(),
            meld_points: p.meld_points_total(),
            has_drawn: p.has_drawn,
            has_drawn_from_discard: p.has_drawn_from_discard,
        });
        let opponent = state.opponent_of(viewer).map(|p| OpponentView {
            chat_id: p.chat_id,
            username: p.username.clone(),
            is_host: p.is_host,
            hand_count: p.hand.len(),
            visible_melds: p.melds.iter().filter(|m| m.visible).cloned().collect(),
            hidden_meld_count: p.hidden_meld_count(),
        });

        Self {
            game_id: state.game_id.clone(),
            status: state.status,
            mode: state.mode,
            bet_amount: state.bet_amount,
            you,
            opponent,
            top_discard: state.discard_pile.last().cloned(),
            stock_count: state.deck.len(),
            base_card: state.base_card.clone(),
            true_jokers: state.true_jokers.clone(),
            current_player: state.current_player,
            last_action: state.last_action,
            layoff_history: state.layoff_history.clone(),
            poked_by: state.poked_by,
            winner: state.winner,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Malformed or unparseable input.
    InvalidInput,
    /// Game not found.
    GameNotFound,
    /// Already in a game.
    AlreadyInGame,
    /// Not in a game.
    NotInGame,
    /// Stake outside the allowed range.
    InvalidBet,
    /// Acting out of turn.
    NotYourTurn,
    /// The game is not in progress.
    GameNotPlaying,
    /// The game cannot be joined.
    GameNotJoinable,
    /// Both seats are taken.
    GameFull,
    /// The selected cards do not form a meld.
    InvalidMeldShape,
    /// A meld with only jokers cannot be classified.
    AmbiguousMeld,
    /// The layoff is not legal.
    IllegalLayoff,
    /// The discard gate is not met.
    DiscardBlocked,
    /// The substitution does not match the joker's position.
    JokerSubstitutionMismatch,
    /// The action targets another player's cards or records.
    Forbidden,
    /// The record is sealed by the winning action.
    Locked,
    /// The reorder is not a permutation.
    InvalidReorder,
    /// The draw source is empty.
    EmptySource,
    /// A draw is required first.
    MustDrawFirst,
    /// The turn's draw was already taken.
    AlreadyDrawn,
    /// An index was out of range.
    InvalidIndex,
    /// A poke is already outstanding.
    PokePending,
    /// An upstream collaborator failed; retry.
    TransientUpstreamError,
    /// Internal error.
    InternalError,
}

impl From<&GameError> for ErrorCode {
    fn from(err: &GameError) -> Self {
        match err {
            GameError::NotYourTurn => ErrorCode::NotYourTurn,
            GameError::GameNotPlaying => ErrorCode::GameNotPlaying,
            GameError::GameNotJoinable => ErrorCode::GameNotJoinable,
            GameError::GameFull => ErrorCode::GameFull,
            GameError::InvalidMeldShape => ErrorCode::InvalidMeldShape,
            GameError::AmbiguousMeld => ErrorCode::AmbiguousMeld,
            GameError::IllegalLayoff(_) => ErrorCode::IllegalLayoff,
            GameError::DiscardBlocked(_) => ErrorCode::DiscardBlocked,
            GameError::JokerSubstitutionMismatch => ErrorCode::JokerSubstitutionMismatch,
            GameError::Forbidden => ErrorCode::Forbidden,
            GameError::Locked => ErrorCode::Locked,
            GameError::InvalidReorder => ErrorCode::InvalidReorder,
            GameError::EmptySource => ErrorCode::EmptySource,
            GameError::MustDrawFirst => ErrorCode::MustDrawFirst,
            GameError::AlreadyDrawn => ErrorCode::AlreadyDrawn,
            GameError::InvalidIndex => ErrorCode::InvalidIndex,
            GameError::PokePending => ErrorCode::PokePending,
            GameError::TransientUpstreamError => ErrorCode::TransientUpstreamError,
        }
    }
}

impl ServerError {
    /// Build the wire error for a rules violation.
    pub fn from_game_error(err: &GameError) -> Self {
        Self {
            code: ErrorCode::from(err),
            message: err.to_string(),
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
