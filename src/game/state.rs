//! Game State Definitions
//!
//! Per-game state: players, piles, melds, layoff history, and lifecycle.
//! Mutation happens exclusively through the validated transitions in
//! `turn.rs`, inside the per-game single-writer boundary owned by the
//! session layer. Snapshots handed to the broadcast gateway are built
//! from read-only views of this state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::rng::DeterministicRng;
use crate::game::card::{standard_deck, Card, JokerKind, Rank, Suit};
use crate::game::deadwood::deadwood;
use crate::game::meld::Meld;
use crate::game::GameError;
use crate::HAND_SIZE;

/// Stable player identity, issued by the external identity service.
pub type ChatId = i64;

/// Unique game identifier.
pub type GameId = String;

// =============================================================================
// LIFECYCLE ENUMS
// =============================================================================

/// Game lifecycle. Terminal states have no outgoing transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Created, waiting for the second player.
    Waiting,
    /// Both players joined, turns in progress.
    Playing,
    /// A win condition fired.
    Completed,
    /// Abandoned, timed out, or cancelled before play.
    Cancelled,
}

/// Game mode, selected by the joining player. Configuration data for the
/// validator thresholds, not separate code paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    /// Standard mode.
    UpAndDown,
    /// Up only.
    Up,
    /// Down only.
    Down,
    /// Side variant.
    Side,
}

/// Tag of the most recent accepted transition. Gates premature actions
/// (the host may not draw while `GameStarted` is still current) and tags
/// layoff records with the winning action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameAction {
    /// The deal settled; the joining player is yet to draw.
    GameStarted,
    /// A card was drawn from the stock.
    CardDrawn,
    /// A card was drawn from the discard pile.
    CardDrawnFromDiscard,
    /// The base card was taken.
    BaseCardTaken,
    /// A meld was formed.
    MeldFormed,
    /// A hidden meld was revealed.
    MeldRevealed,
    /// A card was laid off onto a meld.
    CardLaidOff,
    /// A layoff was reversed by its creator.
    LayoffRemoved,
    /// A joker was swapped out of a meld.
    JokerSubstituted,
    /// A card was discarded, ending the turn.
    CardDiscarded,
    /// The game completed by discard or meld.
    PlayerWon,
    /// The game completed by a hand-emptying layoff.
    PlayerWonByLayoff,
    /// A player left mid-game.
    PlayerLeft,
}

// =============================================================================
// PLAYER
// =============================================================================

/// One of the two seats in a game.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    /// Stable identity.
    pub chat_id: ChatId,
    /// Display name.
    pub username: String,
    /// Whether this player created the game.
    pub is_host: bool,
    /// Cards held, in player-controlled order.
    pub hand: Vec<Card>,
    /// Melds owned by this player.
    pub melds: Vec<Meld>,
    /// Whether this turn's single draw has been taken.
    pub has_drawn: bool,
    /// Whether this turn's draw came from the discard pile. Reset each
    /// turn; restricts discarding until the 41-point/3-meld gate is met.
    pub has_drawn_from_discard: bool,
}

impl Player {
    fn new(chat_id: ChatId, username: String, is_host: bool) -> Self {
        Self {
            chat_id,
            username,
            is_host,
            hand: Vec::new(),
            melds: Vec::new(),
            has_drawn: false,
            has_drawn_from_discard: false,
        }
    }

    /// Number of revealed melds.
    pub fn visible_meld_count(&self) -> usize {
        self.melds.iter().filter(|m| m.visible).count()
    }

    /// Number of hidden melds.
    pub fn hidden_meld_count(&self) -> usize {
        self.melds.iter().filter(|m| !m.visible).count()
    }

    /// Total meld points across all of this player's melds.
    pub fn meld_points_total(&self) -> u32 {
        self.melds.iter().map(Meld::points).sum()
    }

    /// Deadwood value of the current hand.
    pub fn deadwood(&self) -> u32 {
        deadwood(&self.hand)
    }

    /// Reset the per-turn draw flags.
    pub(crate) fn reset_turn_flags(&mut self) {
        self.has_drawn = false;
        self.has_drawn_from_discard = false;
    }
}

// =============================================================================
// LAYOFF RECORD
// =============================================================================

/// Append-only record of a layoff, kept for reversal and history display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoffRecord {
    /// Player who laid the card off.
    pub player_chat_id: ChatId,
    /// Owner of the target meld.
    pub target_player_chat_id: ChatId,
    /// Index of the target meld in the owner's melds.
    pub target_meld_index: usize,
    /// Classification of the target meld at layoff time.
    pub target_meld_kind: crate::game::meld::MeldKind,
    /// The card that was laid off.
    pub card: Card,
    /// Insertion index inside the meld's card order, for exact reversal.
    pub position: usize,
    /// When the layoff happened.
    pub timestamp: DateTime<Utc>,
    /// Action tag; `PlayerWonByLayoff` seals the record against removal.
    pub game_action: GameAction,
}

/// A rank/suit pair designated as wildcard for this game instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrueJoker {
    /// Designated rank (the base card's rank).
    pub rank: Rank,
    /// Designated suit (opposite color to the base card).
    pub suit: Suit,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// The full authoritative state of one game.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameState {
    /// Unique identifier.
    pub game_id: GameId,
    /// Lifecycle status.
    pub status: GameStatus,
    /// Mode; `None` until the joining player selects one.
    pub mode: Option<GameMode>,
    /// Stake per player.
    pub bet_amount: u32,
    /// The two seats, host first. Order fixed at creation.
    pub players: Vec<Player>,
    /// Draw pile; top of pile is the end of the vector.
    pub deck: Vec<Card>,
    /// Discard pile; top of pile is the end of the vector.
    pub discard_pile: Vec<Card>,
    /// Optional special draw source, flipped at deal time.
    pub base_card: Option<Card>,
    /// Wildcard designation for this game, constant after the deal.
    pub true_jokers: Vec<TrueJoker>,
    /// Identity of the player to act; `None` outside `Playing`.
    pub current_player: Option<ChatId>,
    /// Most recent accepted transition.
    pub last_action: GameAction,
    /// Append-only layoff log.
    pub layoff_history: Vec<LayoffRecord>,
    /// Sender of the outstanding poke, if any.
    pub poked_by: Option<ChatId>,
    /// Total pokes sent in this game.
    pub poke_count: u32,
    /// Winner once completed.
    pub winner: Option<ChatId>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl GameState {
    /// Create a waiting game with its host seated.
    pub fn new(game_id: GameId, host_chat_id: ChatId, host_username: String, bet_amount: u32) -> Self {
        Self {
            game_id,
            status: GameStatus::Waiting,
            mode: None,
            bet_amount,
            players: vec![Player::new(host_chat_id, host_username, true)],
            deck: Vec::new(),
            discard_pile: Vec::new(),
            base_card: None,
            true_jokers: Vec::new(),
            current_player: None,
            last_action: GameAction::GameStarted,
            layoff_history: Vec::new(),
            poked_by: None,
            poke_count: 0,
            winner: None,
            created_at: Utc::now(),
        }
    }

    /// Seat the second player. Valid only while waiting.
    pub fn add_player(&mut self, chat_id: ChatId, username: String) -> Result<(), GameError> {
        if self.status != GameStatus::Waiting {
            return Err(GameError::GameNotJoinable);
        }
        if self.players.iter().any(|p| p.chat_id == chat_id) {
            return Err(GameError::GameNotJoinable);
        }
        if self.players.len() >= 2 {
            return Err(GameError::GameFull);
        }
        self.players.push(Player::new(chat_id, username, false));
        Ok(())
    }

    /// Deal and start play. The joining player selected `mode` and moves
    /// first; `last_action` stays `GameStarted` until their first draw,
    /// which is what gates premature host draws.
    pub fn begin(&mut self, mode: GameMode, seed: u64) -> Result<(), GameError> {
        if self.status != GameStatus::Waiting || self.players.len() != 2 {
            return Err(GameError::GameNotJoinable);
        }
        self.mode = Some(mode);
        self.deal(seed);
        self.status = GameStatus::Playing;
        self.current_player = Some(self.players[1].chat_id);
        self.last_action = GameAction::GameStarted;
        Ok(())
    }

    /// Shuffle and deal: 13 cards per player, one base card, one discard
    /// flip, and the true-joker designation derived from the base card.
    fn deal(&mut self, seed: u64) {
        let mut deck = standard_deck();
        let mut rng = DeterministicRng::new(seed);
        rng.shuffle(&mut deck);

        for player in &mut self.players {
            player.hand = deck.split_off(deck.len() - HAND_SIZE);
        }

        // Flip the base card; a printed joker is buried and reflipped.
        let mut base = None;
        while let Some(card) = deck.pop() {
            if card.rank == Rank::Joker {
                deck.insert(0, card);
            } else {
                base = Some(card);
                break;
            }
        }

        self.true_jokers.clear();
        if let Some(base) = base {
            if let Some(suit) = base.suit {
                for s in suit.opposite_color() {
                    self.true_jokers.push(TrueJoker { rank: base.rank, suit: s });
                }
            }
        }
        self.base_card = base;

        if let Some(card) = deck.pop() {
            self.discard_pile.push(card);
        }

        // Flag the designated wildcards wherever they were dealt.
        let marks: Vec<TrueJoker> = self.true_jokers.clone();
        let mark = |card: &mut Card| {
            if marks
                .iter()
                .any(|t| card.rank == t.rank && card.suit == Some(t.suit))
            {
                card.joker = Some(JokerKind::True);
            }
        };
        deck.iter_mut().for_each(mark);
        self.discard_pile.iter_mut().for_each(mark);
        for player in &mut self.players {
            player.hand.iter_mut().for_each(mark);
        }
        self.deck = deck;
    }

    /// Whether `chat_id` is seated in this game.
    pub fn is_member(&self, chat_id: ChatId) -> bool {
        self.players.iter().any(|p| p.chat_id == chat_id)
    }

    /// Seat index for a player.
    pub(crate) fn player_index(&self, chat_id: ChatId) -> Option<usize> {
        self.players.iter().position(|p| p.chat_id == chat_id)
    }

    /// Look up a player.
    pub fn player(&self, chat_id: ChatId) -> Option<&Player> {
        self.players.iter().find(|p| p.chat_id == chat_id)
    }

    /// Look up a player mutably.
    pub(crate) fn player_mut(&mut self, chat_id: ChatId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.chat_id == chat_id)
    }

    /// The other seat.
    pub fn opponent_of(&self, chat_id: ChatId) -> Option<&Player> {
        self.players.iter().find(|p| p.chat_id != chat_id)
    }

    /// Serialize the full state for the external persistence store.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Restore a state from its persisted form.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn two_player_game() -> GameState {
        let mut state = GameState::new("g1".into(), 1, "alice".into(), 100);
        state.add_player(2, "bob".into()).unwrap();
        state
    }

    #[test]
    fn test_new_game_is_waiting() {
        let state = GameState::new("g1".into(), 1, "alice".into(), 100);
        assert_eq!(state.status, GameStatus::Waiting);
        assert_eq!(state.players.len(), 1);
        assert!(state.players[0].is_host);
        assert!(state.current_player.is_none());
    }

    #[test]
    fn test_third_seat_rejected() {
        let mut state = two_player_game();
        assert_eq!(state.add_player(3, "carol".into()), Err(GameError::GameFull));
    }

    #[test]
    fn test_rejoin_rejected() {
        let mut state = GameState::new("g1".into(), 1, "alice".into(), 100);
        assert_eq!(
            state.add_player(1, "alice".into()),
            Err(GameError::GameNotJoinable)
        );
    }

    #[test]
    fn test_begin_deals_and_starts() {
        let mut state = two_player_game();
        state.begin(GameMode::UpAndDown, 42).unwrap();

        assert_eq!(state.status, GameStatus::Playing);
        assert_eq!(state.mode, Some(GameMode::UpAndDown));
        assert_eq!(state.current_player, Some(2)); // joiner moves first
        assert_eq!(state.last_action, GameAction::GameStarted);

        assert_eq!(state.players[0].hand.len(), HAND_SIZE);
        assert_eq!(state.players[1].hand.len(), HAND_SIZE);
        assert!(state.base_card.is_some());
        assert_eq!(state.discard_pile.len(), 1);

        // Full deck accounting: 54 = 13 + 13 + base + flip + stock.
        let stock = state.deck.len();
        assert_eq!(stock + 2 * HAND_SIZE + 2, crate::DECK_SIZE);
    }

    #[test]
    fn test_begin_requires_two_players() {
        let mut state = GameState::new("g1".into(), 1, "alice".into(), 100);
        assert_eq!(
            state.begin(GameMode::Up, 1),
            Err(GameError::GameNotJoinable)
        );
    }

    #[test]
    fn test_deal_is_deterministic() {
        let mut a = two_player_game();
        let mut b = two_player_game();
        a.begin(GameMode::UpAndDown, 777).unwrap();
        b.begin(GameMode::UpAndDown, 777).unwrap();

        assert_eq!(a.players[0].hand, b.players[0].hand);
        assert_eq!(a.players[1].hand, b.players[1].hand);
        assert_eq!(a.base_card, b.base_card);
        assert_eq!(a.deck, b.deck);
    }

    #[test]
    fn test_true_joker_designation() {
        let mut state = two_player_game();
        state.begin(GameMode::UpAndDown, 42).unwrap();

        let base = state.base_card.unwrap();
        assert_eq!(state.true_jokers.len(), 2);
        for tj in &state.true_jokers {
            assert_eq!(tj.rank, base.rank);
            assert_ne!(tj.suit.is_red(), base.suit.unwrap().is_red());
        }

        // Exactly the two designated cards are flagged, wherever dealt.
        let flagged = state
            .deck
            .iter()
            .chain(state.discard_pile.iter())
            .chain(state.players.iter().flat_map(|p| p.hand.iter()))
            .filter(|c| c.joker == Some(JokerKind::True))
            .count();
        assert_eq!(flagged, 2);
    }

    #[test]
    fn test_persistence_round_trip() {
        let mut state = two_player_game();
        state.begin(GameMode::Side, 9).unwrap();

        let bytes = state.to_bytes().unwrap();
        let restored = GameState::from_bytes(&bytes).unwrap();

        assert_eq!(restored.game_id, state.game_id);
        assert_eq!(restored.status, state.status);
        assert_eq!(restored.players[0].hand, state.players[0].hand);
        assert_eq!(restored.deck, state.deck);
        assert_eq!(restored.true_jokers, state.true_jokers);
    }
}
