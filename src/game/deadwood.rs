//! Deadwood Calculator
//!
//! Scores the unmelded portion of a hand and produces the canonical
//! "best sort" ordering used by the sort-hand action. Melded cards live
//! on the player's melds, not in the hand, so they never contribute.

use crate::game::card::Card;
use crate::game::meld::card_point_value;

/// Deadwood value of a hand: the sum of default-context card values over
/// every card still held.
pub fn deadwood(hand: &[Card]) -> u32 {
    hand.iter().map(card_point_value).sum()
}

/// Canonical hand ordering: suits in their fixed order, ascending by
/// sequence value within a suit, printed jokers last. Pure permutation
/// of the input; rules validity is unaffected.
pub fn best_sort(hand: &[Card]) -> Vec<Card> {
    let mut sorted = hand.to_vec();
    sorted.sort_by_key(|c| (c.suit.is_none(), c.suit, c.sequence_value()));
    sorted
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::card::{Rank, Suit};

    fn c(rank: Rank, suit: Suit) -> Card {
        Card::standard(rank, suit)
    }

    #[test]
    fn test_empty_hand_is_zero() {
        assert_eq!(deadwood(&[]), 0);
    }

    #[test]
    fn test_deadwood_additivity() {
        let mut hand = vec![c(Rank::Four, Suit::Hearts), c(Rank::Queen, Suit::Spades)];
        let base = deadwood(&hand);
        assert_eq!(base, 14);

        // Adding a card raises deadwood by exactly its default value.
        for (card, value) in [
            (c(Rank::Ace, Suit::Clubs), 1),
            (c(Rank::Nine, Suit::Diamonds), 9),
            (Card::printed_joker(), 0),
        ] {
            hand.push(card);
            assert_eq!(deadwood(&hand), base + value);
            hand.pop();
        }
    }

    #[test]
    fn test_ace_counts_one_outside_melds() {
        // An unmelded ace is the cheapest card to hold; the 11-point
        // reading applies only inside sets and exceptional runs.
        assert_eq!(deadwood(&[c(Rank::Ace, Suit::Clubs)]), 1);
        assert_eq!(
            deadwood(&[c(Rank::Ace, Suit::Hearts), c(Rank::King, Suit::Hearts)]),
            11
        );
    }

    #[test]
    fn test_best_sort_groups_by_suit_then_rank() {
        let hand = vec![
            c(Rank::King, Suit::Spades),
            Card::printed_joker(),
            c(Rank::Two, Suit::Hearts),
            c(Rank::Ace, Suit::Hearts),
            c(Rank::Five, Suit::Clubs),
        ];
        let sorted = best_sort(&hand);

        assert_eq!(
            sorted,
            vec![
                c(Rank::Ace, Suit::Hearts),
                c(Rank::Two, Suit::Hearts),
                c(Rank::Five, Suit::Clubs),
                c(Rank::King, Suit::Spades),
                Card::printed_joker(),
            ]
        );
    }

    #[test]
    fn test_best_sort_is_permutation() {
        let hand = vec![
            c(Rank::Nine, Suit::Diamonds),
            c(Rank::Nine, Suit::Clubs),
            Card::printed_joker(),
            c(Rank::Ace, Suit::Spades),
        ];
        let mut original = hand.clone();
        let mut sorted = best_sort(&hand);
        original.sort();
        sorted.sort();
        assert_eq!(original, sorted);
    }
}
