//! Meld Evaluator
//!
//! Classifies card groups into runs and sets, scores melds, and resolves
//! the value a joker represents inside a run. Classification happens once
//! at meld creation and is stored on the [`Meld`]; it is never re-inferred
//! from the cards at use sites.
//!
//! The order of cards inside a meld is semantically meaningful: a joker's
//! run value depends on its position relative to the non-joker members, so
//! every mutation that touches a meld must preserve card order.

use serde::{Deserialize, Serialize};

use crate::game::card::{Card, Rank};
use crate::game::GameError;
use crate::{JOKER_FALLBACK_VALUE, MELD_MAX, MELD_MIN};

// =============================================================================
// MELD
// =============================================================================

/// Meld classification, fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeldKind {
    /// Consecutive sequence values; jokers fill gaps or extend the ends.
    Run,
    /// One shared rank across distinct suits; jokers substitute.
    Set,
}

/// A classified group of cards owned by one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meld {
    /// Member cards in their meaningful order.
    pub cards: Vec<Card>,
    /// Stored classification.
    pub kind: MeldKind,
    /// Hidden melds (formed after a discard-pile draw) restrict the
    /// owner's discard until revealed.
    pub visible: bool,
}

impl Meld {
    /// Create a meld from already-classified cards.
    pub fn new(cards: Vec<Card>, kind: MeldKind, visible: bool) -> Self {
        Self { cards, kind, visible }
    }

    /// Total scoring value of this meld.
    pub fn points(&self) -> u32 {
        meld_points(self)
    }
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Classify a proposed meld of 3-4 cards.
pub fn classify(cards: &[Card]) -> Result<MeldKind, GameError> {
    if !(MELD_MIN..=MELD_MAX).contains(&cards.len()) {
        return Err(GameError::InvalidMeldShape);
    }
    shape(cards)
}

/// Classification without the formation length bound. Layoffs grow melds
/// past four cards; the grown sequence must still satisfy this check.
pub(crate) fn shape(cards: &[Card]) -> Result<MeldKind, GameError> {
    let naturals: Vec<&Card> = cards.iter().filter(|c| !c.is_joker()).collect();
    if naturals.is_empty() {
        return Err(GameError::AmbiguousMeld);
    }
    let joker_count = cards.len() - naturals.len();

    // Set: one shared rank, suits pairwise distinct.
    if naturals.iter().all(|c| c.rank == naturals[0].rank) {
        let mut suits: Vec<_> = naturals.iter().map(|c| c.suit).collect();
        suits.sort_unstable();
        suits.dedup();
        if suits.len() == naturals.len() {
            return Ok(MeldKind::Set);
        }
        return Err(GameError::InvalidMeldShape);
    }

    // Run: distinct consecutive sequence values with jokers covering the
    // internal gaps. Suit is an assumed context and not enforced.
    let low: Vec<u8> = naturals.iter().map(|c| c.sequence_value()).collect();
    match run_reading(&low, joker_count) {
        Some(_) => Ok(MeldKind::Run),
        None => Err(GameError::InvalidMeldShape),
    }
}

/// Resolve the sequence values of a run's non-joker members, in their
/// order of appearance. The ace-low reading is preferred; ace-high (14)
/// is used when only that reading is contiguous, which covers the
/// exceptional J-Q-K-A run. `None` if neither reading forms a run the
/// available jokers can complete.
fn run_reading(values_low: &[u8], joker_count: usize) -> Option<Vec<u8>> {
    if values_low.is_empty() {
        return None;
    }
    let mut dedup = values_low.to_vec();
    dedup.sort_unstable();
    dedup.dedup();
    if dedup.len() != values_low.len() {
        return None;
    }

    let has_ace = values_low.contains(&1);
    for ace_high in [false, true] {
        if ace_high && !has_ace {
            break;
        }
        let vals: Vec<u8> = values_low
            .iter()
            .map(|&v| if ace_high && v == 1 { 14 } else { v })
            .collect();
        let mut sorted = vals.clone();
        sorted.sort_unstable();
        let span = (sorted[sorted.len() - 1] - sorted[0]) as usize + 1;
        if span - sorted.len() <= joker_count {
            return Some(vals);
        }
    }
    None
}

/// Resolve every member of a run to its sequence value, in card order:
/// naturals under the run's chosen ace reading, jokers via their
/// positional value. `None` when the cards do not form a readable run.
pub(crate) fn effective_run_values(cards: &[Card]) -> Option<Vec<u8>> {
    let naturals_low: Vec<u8> = cards
        .iter()
        .filter(|c| !c.is_joker())
        .map(|c| c.sequence_value())
        .collect();
    let joker_count = cards.len() - naturals_low.len();
    let vals = run_reading(&naturals_low, joker_count)?;

    let mut nat_iter = vals.iter();
    let mut out = Vec::with_capacity(cards.len());
    for (i, card) in cards.iter().enumerate() {
        if card.is_joker() {
            out.push(joker_run_value(cards, i));
        } else {
            out.push(*nat_iter.next()?);
        }
    }
    Some(out)
}

/// Whether a run is "exceptional": its non-joker members include J, Q, K,
/// and A simultaneously. Evaluated per meld; every ace in an exceptional
/// run scores 11 instead of 1.
pub fn is_exceptional_run(cards: &[Card]) -> bool {
    let has = |r: Rank| cards.iter().any(|c| !c.is_joker() && c.rank == r);
    has(Rank::Jack) && has(Rank::Queen) && has(Rank::King) && has(Rank::Ace)
}

// =============================================================================
// JOKER RUN VALUE
// =============================================================================

/// The sequence value a joker represents at `joker_index` inside a run,
/// given the meld's card order. Rules, in priority order:
///
/// 1. An internal gap between the non-joker values: the joker fills the
///    smallest missing value.
/// 2. Exactly two non-jokers two apart: the midpoint (a gap, covered by
///    rule 1).
/// 3. Exactly two adjacent non-jokers: one below the first or one above
///    the last, by the joker's position in the card order.
/// 4. Exactly one non-joker: one below or one above, by position.
/// 5. Fallback value 9 (should not occur for valid melds).
pub fn joker_run_value(cards: &[Card], joker_index: usize) -> u8 {
    if !cards.get(joker_index).map_or(false, Card::is_joker) {
        return JOKER_FALLBACK_VALUE;
    }

    let naturals: Vec<(usize, u8)> = cards
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.is_joker())
        .map(|(i, c)| (i, c.sequence_value()))
        .collect();
    if naturals.is_empty() {
        return JOKER_FALLBACK_VALUE;
    }

    let joker_count = cards.len() - naturals.len();
    let low: Vec<u8> = naturals.iter().map(|&(_, v)| v).collect();
    let vals = match run_reading(&low, joker_count) {
        Some(v) => v,
        None => return JOKER_FALLBACK_VALUE,
    };

    let mut sorted = vals.clone();
    sorted.sort_unstable();
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];

    // Rule 1: fill the smallest internal gap.
    for v in min..=max {
        if !sorted.contains(&v) {
            return v;
        }
    }

    match naturals.len() {
        2 if max - min == 1 => {
            let first_pos = naturals[0].0;
            let last_pos = naturals[1].0;
            if joker_index < first_pos {
                bounded(min.wrapping_sub(1))
            } else if joker_index > last_pos {
                bounded(max + 1)
            } else {
                JOKER_FALLBACK_VALUE
            }
        }
        1 => {
            let (pos, _) = naturals[0];
            let v = vals[0];
            if joker_index < pos {
                bounded(v.wrapping_sub(1))
            } else {
                bounded(v + 1)
            }
        }
        _ => JOKER_FALLBACK_VALUE,
    }
}

/// Clamp a positional extension into the valid sequence range.
fn bounded(v: u8) -> u8 {
    if (1..=14).contains(&v) {
        v
    } else {
        JOKER_FALLBACK_VALUE
    }
}

// =============================================================================
// SCORING
// =============================================================================

/// Card value in the default (no-meld) context, used for deadwood:
/// ace 1, face cards 10, numeric ranks face value, lone jokers 0. The
/// ace counts 11 only inside a set or an exceptional run (see
/// [`meld_points`]).
pub fn card_point_value(card: &Card) -> u32 {
    if card.is_joker() {
        return 0;
    }
    match card.rank {
        Rank::Ace => 1,
        Rank::Jack | Rank::Queen | Rank::King => 10,
        r => r.sequence_value() as u32,
    }
}

/// The rank a set represents (its first non-joker member).
pub(crate) fn set_rank(cards: &[Card]) -> Option<Rank> {
    cards.iter().find(|c| !c.is_joker()).map(|c| c.rank)
}

/// Rank value in set context: ace 11, face cards 10, numeric face value.
fn set_context_value(rank: Rank) -> u32 {
    match rank {
        Rank::Ace => 11,
        Rank::Jack | Rank::Queen | Rank::King => 10,
        r => r.sequence_value() as u32,
    }
}

/// Total scoring value of a meld under its stored classification.
///
/// Jokers in a set take the set rank's value; jokers in a run take their
/// positional [`joker_run_value`]. Aces score 1 in a plain run and 11 in
/// a set or an exceptional run.
pub fn meld_points(meld: &Meld) -> u32 {
    let exceptional = meld.kind == MeldKind::Run && is_exceptional_run(&meld.cards);

    meld.cards
        .iter()
        .enumerate()
        .map(|(i, card)| {
            if card.is_joker() {
                match meld.kind {
                    MeldKind::Set => set_rank(&meld.cards).map_or(0, set_context_value),
                    MeldKind::Run => joker_run_value(&meld.cards, i) as u32,
                }
            } else {
                match card.rank {
                    Rank::Ace if meld.kind == MeldKind::Set || exceptional => 11,
                    Rank::Ace => 1,
                    Rank::Jack | Rank::Queen | Rank::King => 10,
                    r => r.sequence_value() as u32,
                }
            }
        })
        .sum()
}

// =============================================================================
// TESTS
// =============================================================================
