//! Meld & Layoff Validator
//!
//! Legality checks for melds, discards, layoffs, joker substitution, and
//! layoff reversal. Pure functions over game state; the turn machine runs
//! every check before mutating anything, so a failed guard never leaves a
//! partial mutation behind.

use crate::game::card::{Card, Rank};
use crate::game::meld::{self, joker_run_value, set_rank, Meld, MeldKind};
use crate::game::state::{ChatId, GameAction, LayoffRecord, Player};
use crate::game::GameError;
use crate::{DISCARD_MELD_THRESHOLD, DISCARD_POINT_THRESHOLD, OPPONENT_LAYOFF_MIN_MELDS};

/// Whether the selected cards may form a new meld. 3-4 cards that
/// classify; returns the classification for storage on the new meld.
pub fn can_form_meld(selected: &[Card]) -> Result<MeldKind, GameError> {
    meld::classify(selected)
}

/// The discard gate. A player who drew from the discard pile this turn
/// may only discard with zero hidden melds and either 41 meld points or
/// three visible melds.
pub fn check_discard(player: &Player) -> Result<(), GameError> {
    if player.has_drawn_from_discard {
        if player.hidden_meld_count() > 0 {
            return Err(GameError::DiscardBlocked("hidden melds must be revealed first"));
        }
        if player.meld_points_total() < DISCARD_POINT_THRESHOLD
            && player.visible_meld_count() < DISCARD_MELD_THRESHOLD
        {
            return Err(GameError::DiscardBlocked(
                "need 41 meld points or three visible melds",
            ));
        }
    }
    Ok(())
}

/// Anti-stalling gate for laying off onto the opponent's melds: the
/// acting player must first have at least two visible melds of their own.
pub fn check_opponent_layoff_gate(actor: &Player) -> Result<(), GameError> {
    if actor.visible_meld_count() < OPPONENT_LAYOFF_MIN_MELDS {
        return Err(GameError::IllegalLayoff(
            "two visible melds required before laying off to the opponent",
        ));
    }
    Ok(())
}

/// Where `card` may be inserted to extend `meld` while preserving its
/// stored classification. Runs extend at either open end (front for one
/// below the effective minimum, back for one above the effective
/// maximum); sets take a missing suit of the set rank at the back.
/// Layoff is uncapped in card count; the grown sequence is re-checked
/// against the stored classification before the position is returned.
pub fn layoff_position(meld: &Meld, card: &Card) -> Result<usize, GameError> {
    let position = layoff_insert_index(meld, card)?;

    let mut extended = meld.cards.clone();
    extended.insert(position, *card);
    let kind = meld::shape(&extended)
        .map_err(|_| GameError::IllegalLayoff("card does not extend the meld"))?;
    if kind != meld.kind {
        return Err(GameError::IllegalLayoff("extension changes the meld's shape"));
    }
    Ok(position)
}

fn layoff_insert_index(meld: &Meld, card: &Card) -> Result<usize, GameError> {
    match meld.kind {
        MeldKind::Set => {
            if card.is_joker() {
                return Ok(meld.cards.len());
            }
            let rank = set_rank(&meld.cards).ok_or(GameError::IllegalLayoff("set has no rank"))?;
            if card.rank != rank {
                return Err(GameError::IllegalLayoff("rank does not match the set"));
            }
            if meld
                .cards
                .iter()
                .any(|c| !c.is_joker() && c.suit == card.suit)
            {
                return Err(GameError::IllegalLayoff("suit already present in the set"));
            }
            Ok(meld.cards.len())
        }
        MeldKind::Run => {
            if card.is_joker() {
                return Ok(meld.cards.len());
            }
            let effective = meld::effective_run_values(&meld.cards)
                .ok_or(GameError::IllegalLayoff("target run is not readable"))?;
            let min = *effective.iter().min().unwrap_or(&0);
            let max = *effective.iter().max().unwrap_or(&0);

            let low = card.sequence_value();
            let high = if low == 1 { 14 } else { low };

            if min > 1 && low == min - 1 {
                Ok(0)
            } else if low == max + 1 || high == max + 1 {
                Ok(meld.cards.len())
            } else {
                Err(GameError::IllegalLayoff("card must extend an open end of the run"))
            }
        }
    }
}

/// The literal rank a joker at `joker_index` stands in for: the set's
/// rank, or the positional run value.
pub fn joker_stand_in(meld: &Meld, joker_index: usize) -> Result<Rank, GameError> {
    let card = meld
        .cards
        .get(joker_index)
        .ok_or(GameError::JokerSubstitutionMismatch)?;
    if !card.is_joker() {
        return Err(GameError::JokerSubstitutionMismatch);
    }
    match meld.kind {
        MeldKind::Set => set_rank(&meld.cards).ok_or(GameError::JokerSubstitutionMismatch),
        MeldKind::Run => {
            let value = joker_run_value(&meld.cards, joker_index);
            Rank::from_sequence_value(value).ok_or(GameError::JokerSubstitutionMismatch)
        }
    }
}

/// Whether `replacement` may be swapped for the joker at `joker_index`.
/// The replacement must match the stand-in rank; in a set its suit must
/// not already be present.
pub fn check_substitution(
    meld: &Meld,
    joker_index: usize,
    replacement: &Card,
) -> Result<(), GameError> {
    if replacement.is_joker() {
        return Err(GameError::JokerSubstitutionMismatch);
    }
    let rank = joker_stand_in(meld, joker_index)?;
    if replacement.rank != rank {
        return Err(GameError::JokerSubstitutionMismatch);
    }
    if meld.kind == MeldKind::Set
        && meld
            .cards
            .iter()
            .any(|c| !c.is_joker() && c.suit == replacement.suit)
    {
        return Err(GameError::JokerSubstitutionMismatch);
    }
    Ok(())
}

/// Whether `requester` may reverse a layoff record. Only its creator may,
/// and never once the record carries the winning action.
pub fn check_remove_layoff(record: &LayoffRecord, requester: ChatId) -> Result<(), GameError> {
    if record.player_chat_id != requester {
        return Err(GameError::Forbidden);
    }
    if record.game_action == GameAction::PlayerWonByLayoff {
        return Err(GameError::Locked);
    }
    Ok(())
}

/// Whether the meld still reads correctly without the card at `position`.
/// Later layoffs may have built on a card; pulling it back out of the
/// middle of the grown sequence is not allowed.
pub fn check_removal_keeps_shape(meld: &Meld, position: usize) -> Result<(), GameError> {
    let mut remaining = meld.cards.clone();
    remaining.remove(position);
    let kind = meld::shape(&remaining)
        .map_err(|_| GameError::IllegalLayoff("removal would break the meld"))?;
    if kind != meld.kind {
        return Err(GameError::IllegalLayoff("removal would break the meld"));
    }
    Ok(())
}

/// A hand reorder must be a bijection over the current hand's indices.
pub fn check_reorder(new_order: &[usize], hand_len: usize) -> Result<(), GameError> {
    if new_order.len() != hand_len {
        return Err(GameError::InvalidReorder);
    }
    let mut seen = vec![false; hand_len];
    for &i in new_order {
        if i >= hand_len || seen[i] {
            return Err(GameError::InvalidReorder);
        }
        seen[i] = true;
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::card::Suit;
    use chrono::Utc;

    fn c(rank: Rank, suit: Suit) -> Card {
        Card::standard(rank, suit)
    }

    fn joker() -> Card {
        Card::printed_joker()
    }

    fn player_with_melds(melds: Vec<Meld>, drew_from_discard: bool) -> Player {
        Player {
            chat_id: 1,
            username: "alice".into(),
            is_host: true,
            hand: Vec::new(),
            melds,
            has_drawn: true,
            has_drawn_from_discard: drew_from_discard,
        }
    }

    fn set_of(rank: Rank, suits: [Suit; 3], visible: bool) -> Meld {
        Meld::new(suits.map(|s| c(rank, s)).to_vec(), MeldKind::Set, visible)
    }

    fn run_of(ranks: &[Rank], suit: Suit, visible: bool) -> Meld {
        Meld::new(
            ranks.iter().map(|&r| c(r, suit)).collect(),
            MeldKind::Run,
            visible,
        )
    }

    #[test]
    fn test_discard_free_without_discard_draw() {
        let player = player_with_melds(Vec::new(), false);
        assert!(check_discard(&player).is_ok());
    }

    #[test]
    fn test_discard_blocked_by_hidden_meld() {
        // Hidden melds block regardless of point total.
        let melds = vec![
            set_of(Rank::King, [Suit::Hearts, Suit::Spades, Suit::Clubs], true),
            set_of(Rank::Queen, [Suit::Hearts, Suit::Spades, Suit::Clubs], true),
            set_of(Rank::Ten, [Suit::Hearts, Suit::Spades, Suit::Clubs], false),
        ];
        let player = player_with_melds(melds, true);
        assert!(player.meld_points_total() >= DISCARD_POINT_THRESHOLD);
        assert!(matches!(
            check_discard(&player),
            Err(GameError::DiscardBlocked(_))
        ));
    }

    #[test]
    fn test_discard_point_threshold_flip() {
        // Exactly 40 points across two visible melds: blocked.
        let forty = vec![
            set_of(Rank::Ten, [Suit::Hearts, Suit::Spades, Suit::Clubs], true), // 30
            run_of(
                &[Rank::Ace, Rank::Two, Rank::Three, Rank::Four],
                Suit::Diamonds,
                true,
            ), // 10
        ];
        let player = player_with_melds(forty, true);
        assert_eq!(player.meld_points_total(), 40);
        assert!(matches!(
            check_discard(&player),
            Err(GameError::DiscardBlocked(_))
        ));

        // Raising the run by one card value crosses 41: allowed.
        let forty_four = vec![
            set_of(Rank::Ten, [Suit::Hearts, Suit::Spades, Suit::Clubs], true), // 30
            run_of(
                &[Rank::Two, Rank::Three, Rank::Four, Rank::Five],
                Suit::Diamonds,
                true,
            ), // 14
        ];
        let player = player_with_melds(forty_four, true);
        assert!(player.meld_points_total() >= 41);
        assert!(check_discard(&player).is_ok());
    }

    #[test]
    fn test_discard_three_visible_melds_override_points() {
        let melds = vec![
            run_of(&[Rank::Ace, Rank::Two, Rank::Three], Suit::Hearts, true), // 6
            run_of(&[Rank::Ace, Rank::Two, Rank::Three], Suit::Spades, true), // 6
            run_of(&[Rank::Ace, Rank::Two, Rank::Three], Suit::Clubs, true),  // 6
        ];
        let player = player_with_melds(melds, true);
        assert!(player.meld_points_total() < DISCARD_POINT_THRESHOLD);
        assert!(check_discard(&player).is_ok());
    }

    #[test]
    fn test_opponent_layoff_gate() {
        for (visible, ok) in [(0usize, false), (1, false), (2, true)] {
            let melds = (0..visible)
                .map(|i| {
                    set_of(
                        Rank::STANDARD[3 + i],
                        [Suit::Hearts, Suit::Spades, Suit::Clubs],
                        true,
                    )
                })
                .collect();
            let player = player_with_melds(melds, false);
            assert_eq!(check_opponent_layoff_gate(&player).is_ok(), ok);
        }
    }

    #[test]
    fn test_opponent_layoff_gate_ignores_hidden() {
        let melds = vec![
            set_of(Rank::Four, [Suit::Hearts, Suit::Spades, Suit::Clubs], true),
            set_of(Rank::Five, [Suit::Hearts, Suit::Spades, Suit::Clubs], false),
        ];
        let player = player_with_melds(melds, false);
        assert!(check_opponent_layoff_gate(&player).is_err());
    }

    #[test]
    fn test_layoff_run_extends_both_ends() {
        let meld = run_of(&[Rank::Five, Rank::Six, Rank::Seven], Suit::Hearts, true);

        assert_eq!(layoff_position(&meld, &c(Rank::Four, Suit::Hearts)), Ok(0));
        assert_eq!(layoff_position(&meld, &c(Rank::Eight, Suit::Hearts)), Ok(3));
        assert!(matches!(
            layoff_position(&meld, &c(Rank::Six, Suit::Spades)),
            Err(GameError::IllegalLayoff(_))
        ));
        assert!(matches!(
            layoff_position(&meld, &c(Rank::Ten, Suit::Hearts)),
            Err(GameError::IllegalLayoff(_))
        ));
    }

    #[test]
    fn test_layoff_run_counts_joker_span() {
        // {5, 6, Joker} reads 5-6-7: the 8 extends above the joker.
        let meld = Meld::new(
            vec![c(Rank::Five, Suit::Hearts), c(Rank::Six, Suit::Hearts), joker()],
            MeldKind::Run,
            true,
        );
        assert_eq!(layoff_position(&meld, &c(Rank::Eight, Suit::Hearts)), Ok(3));
        assert!(layoff_position(&meld, &c(Rank::Seven, Suit::Hearts)).is_err());
    }

    #[test]
    fn test_layoff_ace_extends_above_king() {
        let meld = run_of(&[Rank::Jack, Rank::Queen, Rank::King], Suit::Spades, true);
        assert_eq!(layoff_position(&meld, &c(Rank::Ace, Suit::Spades)), Ok(3));
    }

    #[test]
    fn test_layoff_set_takes_missing_suit() {
        let meld = set_of(Rank::Nine, [Suit::Hearts, Suit::Spades, Suit::Clubs], true);

        assert_eq!(
            layoff_position(&meld, &c(Rank::Nine, Suit::Diamonds)),
            Ok(3)
        );
        assert!(layoff_position(&meld, &c(Rank::Nine, Suit::Hearts)).is_err());
        assert!(layoff_position(&meld, &c(Rank::Eight, Suit::Diamonds)).is_err());
    }

    #[test]
    fn test_layoff_may_exceed_four_cards() {
        let meld = run_of(
            &[Rank::Four, Rank::Five, Rank::Six, Rank::Seven],
            Suit::Clubs,
            true,
        );
        assert_eq!(layoff_position(&meld, &c(Rank::Eight, Suit::Clubs)), Ok(4));
    }

    #[test]
    fn test_substitution_run_rank_must_match() {
        let meld = Meld::new(
            vec![c(Rank::Five, Suit::Hearts), joker(), c(Rank::Seven, Suit::Hearts)],
            MeldKind::Run,
            true,
        );
        assert_eq!(joker_stand_in(&meld, 1), Ok(Rank::Six));
        assert!(check_substitution(&meld, 1, &c(Rank::Six, Suit::Clubs)).is_ok());
        assert!(check_substitution(&meld, 1, &c(Rank::Seven, Suit::Hearts)).is_err());
    }

    #[test]
    fn test_substitution_set_requires_missing_suit() {
        let meld = Meld::new(
            vec![c(Rank::Nine, Suit::Hearts), c(Rank::Nine, Suit::Spades), joker()],
            MeldKind::Set,
            true,
        );
        assert!(check_substitution(&meld, 2, &c(Rank::Nine, Suit::Clubs)).is_ok());
        assert!(check_substitution(&meld, 2, &c(Rank::Nine, Suit::Hearts)).is_err());
    }

    #[test]
    fn test_substitution_rejects_bad_index_and_non_joker_target() {
        let meld = Meld::new(
            vec![c(Rank::Five, Suit::Hearts), joker(), c(Rank::Seven, Suit::Hearts)],
            MeldKind::Run,
            true,
        );
        assert_eq!(
            check_substitution(&meld, 9, &c(Rank::Six, Suit::Clubs)),
            Err(GameError::JokerSubstitutionMismatch)
        );
        assert_eq!(
            check_substitution(&meld, 0, &c(Rank::Six, Suit::Clubs)),
            Err(GameError::JokerSubstitutionMismatch)
        );
    }

    #[test]
    fn test_remove_layoff_creator_only() {
        let record = LayoffRecord {
            player_chat_id: 1,
            target_player_chat_id: 2,
            target_meld_index: 0,
            target_meld_kind: MeldKind::Run,
            card: c(Rank::Four, Suit::Hearts),
            position: 0,
            timestamp: Utc::now(),
            game_action: GameAction::CardLaidOff,
        };
        assert!(check_remove_layoff(&record, 1).is_ok());
        assert_eq!(check_remove_layoff(&record, 2), Err(GameError::Forbidden));
    }

    #[test]
    fn test_remove_layoff_locked_after_win() {
        let record = LayoffRecord {
            player_chat_id: 1,
            target_player_chat_id: 2,
            target_meld_index: 0,
            target_meld_kind: MeldKind::Run,
            card: c(Rank::Four, Suit::Hearts),
            position: 0,
            timestamp: Utc::now(),
            game_action: GameAction::PlayerWonByLayoff,
        };
        assert_eq!(check_remove_layoff(&record, 1), Err(GameError::Locked));
    }

    #[test]
    fn test_removal_keeps_shape_guards_run_interior() {
        let meld = run_of(
            &[Rank::Five, Rank::Six, Rank::Seven, Rank::Eight, Rank::Nine],
            Suit::Hearts,
            true,
        );
        // Either end may come back out; an interior card may not.
        assert!(check_removal_keeps_shape(&meld, 0).is_ok());
        assert!(check_removal_keeps_shape(&meld, 4).is_ok());
        assert!(matches!(
            check_removal_keeps_shape(&meld, 3),
            Err(GameError::IllegalLayoff(_))
        ));
    }

    #[test]
    fn test_reorder_bijection() {
        assert!(check_reorder(&[2, 0, 1], 3).is_ok());
        assert_eq!(check_reorder(&[0, 0, 1], 3), Err(GameError::InvalidReorder));
        assert_eq!(check_reorder(&[0, 1, 3], 3), Err(GameError::InvalidReorder));
        assert_eq!(check_reorder(&[0, 1], 3), Err(GameError::InvalidReorder));
    }
}
