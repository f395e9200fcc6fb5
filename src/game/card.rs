//! Card Model
//!
//! Immutable value types for cards, suits, ranks, and joker designation.
//! A deck is 54 cards: the standard 52 plus two printed jokers. At deal
//! time two standard cards are additionally designated as "true jokers"
//! (wildcards) for the lifetime of the game.

use serde::{Deserialize, Serialize};

// =============================================================================
// SUIT
// =============================================================================

/// Card suit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    /// Hearts (red).
    Hearts,
    /// Diamonds (red).
    Diamonds,
    /// Clubs (black).
    Clubs,
    /// Spades (black).
    Spades,
}

impl Suit {
    /// All four suits in canonical order.
    pub const ALL: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];

    /// Whether the suit is red.
    #[inline]
    pub fn is_red(self) -> bool {
        matches!(self, Suit::Hearts | Suit::Diamonds)
    }

    /// The two suits of the opposite color.
    pub fn opposite_color(self) -> [Suit; 2] {
        if self.is_red() {
            [Suit::Clubs, Suit::Spades]
        } else {
            [Suit::Hearts, Suit::Diamonds]
        }
    }
}

// =============================================================================
// RANK
// =============================================================================

/// Card rank. `Joker` is the rank of the two printed joker cards only;
/// a true joker keeps its original rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    /// Ace. Sequence value 1 (or 14 in an ace-high run).
    #[serde(rename = "A")]
    Ace,
    /// Two.
    #[serde(rename = "2")]
    Two,
    /// Three.
    #[serde(rename = "3")]
    Three,
    /// Four.
    #[serde(rename = "4")]
    Four,
    /// Five.
    #[serde(rename = "5")]
    Five,
    /// Six.
    #[serde(rename = "6")]
    Six,
    /// Seven.
    #[serde(rename = "7")]
    Seven,
    /// Eight.
    #[serde(rename = "8")]
    Eight,
    /// Nine.
    #[serde(rename = "9")]
    Nine,
    /// Ten.
    #[serde(rename = "10")]
    Ten,
    /// Jack.
    #[serde(rename = "J")]
    Jack,
    /// Queen.
    #[serde(rename = "Q")]
    Queen,
    /// King.
    #[serde(rename = "K")]
    King,
    /// The printed joker.
    #[serde(rename = "JOKER")]
    Joker,
}

impl Rank {
    /// The thirteen standard ranks in ascending sequence order.
    pub const STANDARD: [Rank; 13] = [
        Rank::Ace,
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
    ];

    /// Position in a run sequence: A=1 .. 10=10, J=11, Q=12, K=13.
    /// The printed joker has no sequence value and returns 0.
    #[inline]
    pub fn sequence_value(self) -> u8 {
        match self {
            Rank::Ace => 1,
            Rank::Two => 2,
            Rank::Three => 3,
            Rank::Four => 4,
            Rank::Five => 5,
            Rank::Six => 6,
            Rank::Seven => 7,
            Rank::Eight => 8,
            Rank::Nine => 9,
            Rank::Ten => 10,
            Rank::Jack => 11,
            Rank::Queen => 12,
            Rank::King => 13,
            Rank::Joker => 0,
        }
    }

    /// Inverse of [`sequence_value`](Self::sequence_value) for 1..=13.
    /// 14 is accepted as the ace-high reading of an exceptional run.
    pub fn from_sequence_value(value: u8) -> Option<Rank> {
        match value {
            1 | 14 => Some(Rank::Ace),
            2..=13 => Some(Rank::STANDARD[(value - 1) as usize]),
            _ => None,
        }
    }
}

// =============================================================================
// CARD
// =============================================================================

/// Wildcard designation of a card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JokerKind {
    /// A standard card designated as wildcard for this game instance.
    #[serde(rename = "true")]
    True,
    /// The literal printed JOKER card.
    #[serde(rename = "false")]
    False,
}

/// A playing card. Immutable value; equality is over all fields.
///
/// Printed jokers have `rank == Rank::Joker` and no suit. True jokers
/// keep their rank and suit and carry `joker == Some(JokerKind::True)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Card {
    /// Card rank.
    pub rank: Rank,
    /// Card suit; absent for printed jokers.
    pub suit: Option<Suit>,
    /// Wildcard designation, if any.
    pub joker: Option<JokerKind>,
}

impl Card {
    /// A standard (non-joker) card.
    pub const fn standard(rank: Rank, suit: Suit) -> Self {
        Self {
            rank,
            suit: Some(suit),
            joker: None,
        }
    }

    /// One of the two printed joker cards.
    pub const fn printed_joker() -> Self {
        Self {
            rank: Rank::Joker,
            suit: None,
            joker: Some(JokerKind::False),
        }
    }

    /// Whether the card acts as a wildcard (printed or true joker).
    #[inline]
    pub fn is_joker(&self) -> bool {
        self.joker.is_some()
    }

    /// Sequence value of the rank (ace low). 0 for printed jokers.
    #[inline]
    pub fn sequence_value(&self) -> u8 {
        self.rank.sequence_value()
    }
}

/// Build the 54-card deck in canonical order: each suit ascending by
/// rank, then the two printed jokers. Callers shuffle.
pub fn standard_deck() -> Vec<Card> {
    let mut deck = Vec::with_capacity(crate::DECK_SIZE);
    for suit in Suit::ALL {
        for rank in Rank::STANDARD {
            deck.push(Card::standard(rank, suit));
        }
    }
    deck.push(Card::printed_joker());
    deck.push(Card::printed_joker());
    deck
}

// =============================================================================
// TESTS
// =============================================================================
