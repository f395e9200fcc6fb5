//! Turn State Machine
//!
//! Validated transitions over [`GameState`]. Every public method checks
//! all preconditions before touching state, so a rejected action is a
//! no-op. Cosmetic actions (sort, reorder) never update `last_action`.

use serde::{Deserialize, Serialize};

use crate::game::deadwood::best_sort;
use crate::game::meld::Meld;
use crate::game::rules;
use crate::game::state::{ChatId, GameAction, GameState, GameStatus, LayoffRecord};
use crate::game::GameError;
use crate::{MELD_MAX, MELD_MIN};

/// Where a draw takes its card from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawSource {
    /// Top of the face-down stock.
    Deck,
    /// Top of the discard pile.
    Discard,
    /// The face-up base card (at most once per game).
    Base,
}

impl GameState {
    fn require_playing(&self) -> Result<(), GameError> {
        if self.status != GameStatus::Playing {
            return Err(GameError::GameNotPlaying);
        }
        Ok(())
    }

    fn require_member(&self, chat_id: ChatId) -> Result<(), GameError> {
        if !self.is_member(chat_id) {
            return Err(GameError::Forbidden);
        }
        Ok(())
    }

    fn require_turn(&self, chat_id: ChatId) -> Result<(), GameError> {
        self.require_playing()?;
        self.require_member(chat_id)?;
        if self.current_player != Some(chat_id) {
            return Err(GameError::NotYourTurn);
        }
        Ok(())
    }

    /// An accepted game action by the poked player answers the poke.
    fn answer_poke(&mut self, actor: ChatId) {
        if self.poked_by.map_or(false, |by| by != actor) {
            self.poked_by = None;
        }
    }

    fn complete(&mut self, winner: ChatId, action: GameAction) {
        self.status = GameStatus::Completed;
        self.winner = Some(winner);
        self.last_action = action;
        self.current_player = None;
    }

    /// Draw one card from the chosen source into the acting player's hand.
    pub fn draw_card(&mut self, chat_id: ChatId, source: DrawSource) -> Result<(), GameError> {
        self.require_turn(chat_id)?;

        let idx = self.player_index(chat_id).ok_or(GameError::Forbidden)?;
        // The host's first turn opens only after the joiner has discarded.
        if self.players[idx].is_host && self.last_action == GameAction::GameStarted {
            return Err(GameError::NotYourTurn);
        }
        if self.players[idx].has_drawn {
            return Err(GameError::AlreadyDrawn);
        }

        let (card, action) = match source {
            DrawSource::Deck => (
                self.deck.pop().ok_or(GameError::EmptySource)?,
                GameAction::CardDrawn,
            ),
            DrawSource::Discard => (
                self.discard_pile.pop().ok_or(GameError::EmptySource)?,
                GameAction::CardDrawnFromDiscard,
            ),
            DrawSource::Base => (
                self.base_card.take().ok_or(GameError::EmptySource)?,
                GameAction::BaseCardTaken,
            ),
        };

        let player = &mut self.players[idx];
        player.hand.push(card);
        player.has_drawn = true;
        player.has_drawn_from_discard = source == DrawSource::Discard;
        self.last_action = action;
        self.answer_poke(chat_id);
        Ok(())
    }

    /// Form a new meld from the given hand indices. The meld starts
    /// hidden when this turn's draw came from the discard pile.
    pub fn meld_cards(&mut self, chat_id: ChatId, card_indices: &[usize]) -> Result<(), GameError> {
        self.require_turn(chat_id)?;

        let idx = self.player_index(chat_id).ok_or(GameError::Forbidden)?;
        if !self.players[idx].has_drawn {
            return Err(GameError::MustDrawFirst);
        }
        if card_indices.len() < MELD_MIN || card_indices.len() > MELD_MAX {
            return Err(GameError::InvalidMeldShape);
        }

        let hand_len = self.players[idx].hand.len();
        let mut seen = vec![false; hand_len];
        for &i in card_indices {
            if i >= hand_len || seen[i] {
                return Err(GameError::InvalidIndex);
            }
            seen[i] = true;
        }

        // Cards are read in the given order; run readings are
        // order-sensitive for joker values.
        let cards: Vec<_> = card_indices
            .iter()
            .map(|&i| self.players[idx].hand[i].clone())
            .collect();
        let kind = rules::can_form_meld(&cards)?;

        let mut to_remove: Vec<usize> = card_indices.to_vec();
        to_remove.sort_unstable_by(|a, b| b.cmp(a));
        for i in to_remove {
            self.players[idx].hand.remove(i);
        }

        let visible = !self.players[idx].has_drawn_from_discard;
        self.players[idx].melds.push(Meld::new(cards, kind, visible));
        self.last_action = GameAction::MeldFormed;
        self.answer_poke(chat_id);

        if self.players[idx].hand.is_empty() {
            self.complete(chat_id, GameAction::PlayerWon);
        }
        Ok(())
    }

    /// Reveal one of the acting player's hidden melds. Idempotent.
    pub fn make_meld_visible(&mut self, chat_id: ChatId, meld_index: usize) -> Result<(), GameError> {
        self.require_turn(chat_id)?;

        let idx = self.player_index(chat_id).ok_or(GameError::Forbidden)?;
        let meld = self.players[idx]
            .melds
            .get_mut(meld_index)
            .ok_or(GameError::InvalidIndex)?;
        meld.visible = true;
        self.last_action = GameAction::MeldRevealed;
        Ok(())
    }

    /// Lay a single card from the hand onto an existing visible meld,
    /// own or opponent's. Emptying the hand this way wins the game and
    /// seals the record.
    pub fn layoff_card(
        &mut self,
        chat_id: ChatId,
        card_index: usize,
        target_player_chat_id: ChatId,
        target_meld_index: usize,
    ) -> Result<(), GameError> {
        self.require_turn(chat_id)?;

        let actor_idx = self.player_index(chat_id).ok_or(GameError::Forbidden)?;
        let target_idx = self
            .player_index(target_player_chat_id)
            .ok_or(GameError::Forbidden)?;
        if !self.players[actor_idx].has_drawn {
            return Err(GameError::MustDrawFirst);
        }

        let card = self.players[actor_idx]
            .hand
            .get(card_index)
            .cloned()
            .ok_or(GameError::InvalidIndex)?;
        let meld = self.players[target_idx]
            .melds
            .get(target_meld_index)
            .ok_or(GameError::InvalidIndex)?;

        if target_idx != actor_idx {
            rules::check_opponent_layoff_gate(&self.players[actor_idx])?;
            if !meld.visible {
                return Err(GameError::IllegalLayoff("target meld is not revealed"));
            }
        }
        let position = rules::layoff_position(meld, &card)?;
        let kind = meld.kind;

        self.players[actor_idx].hand.remove(card_index);
        self.players[target_idx].melds[target_meld_index]
            .cards
            .insert(position, card.clone());

        let won = self.players[actor_idx].hand.is_empty();
        self.layoff_history.push(LayoffRecord {
            player_chat_id: chat_id,
            target_player_chat_id,
            target_meld_index,
            target_meld_kind: kind,
            card,
            position,
            timestamp: chrono::Utc::now(),
            game_action: if won {
                GameAction::PlayerWonByLayoff
            } else {
                GameAction::CardLaidOff
            },
        });
        self.last_action = GameAction::CardLaidOff;
        self.answer_poke(chat_id);

        if won {
            self.complete(chat_id, GameAction::PlayerWonByLayoff);
        }
        Ok(())
    }

    /// Reverse a prior layoff: the card returns from the meld to its
    /// creator's hand and the record is dropped. Only the record's
    /// creator may do this, and only while the meld still reads
    /// correctly without the card.
    pub fn remove_layoff(&mut self, chat_id: ChatId, layoff_index: usize) -> Result<(), GameError> {
        self.require_playing()?;
        self.require_member(chat_id)?;

        let record = self
            .layoff_history
            .get(layoff_index)
            .ok_or(GameError::InvalidIndex)?
            .clone();
        rules::check_remove_layoff(&record, chat_id)?;

        let target_idx = self
            .player_index(record.target_player_chat_id)
            .ok_or(GameError::InvalidIndex)?;
        let meld = self.players[target_idx]
            .melds
            .get_mut(record.target_meld_index)
            .ok_or(GameError::InvalidIndex)?;

        // The recorded position is authoritative unless later layoffs
        // shifted the card; fall back to locating it by equality.
        let position = match meld.cards.get(record.position) {
            Some(c) if *c == record.card => record.position,
            _ => meld
                .cards
                .iter()
                .position(|c| *c == record.card)
                .ok_or(GameError::InvalidIndex)?,
        };
        rules::check_removal_keeps_shape(meld, position)?;
        let card = meld.cards.remove(position);

        let actor_idx = self.player_index(chat_id).ok_or(GameError::Forbidden)?;
        self.players[actor_idx].hand.push(card);
        self.layoff_history.remove(layoff_index);
        self.last_action = GameAction::LayoffRemoved;
        Ok(())
    }

    /// Swap a card from the hand for a joker standing in for it inside a
    /// visible meld. The whole exchange is atomic: a failed check leaves
    /// both the hand and the meld untouched.
    pub fn substitute_joker(
        &mut self,
        chat_id: ChatId,
        target_player_chat_id: ChatId,
        meld_index: usize,
        joker_index: usize,
        replacement_index: usize,
    ) -> Result<(), GameError> {
        self.require_turn(chat_id)?;

        let actor_idx = self.player_index(chat_id).ok_or(GameError::Forbidden)?;
        let target_idx = self
            .player_index(target_player_chat_id)
            .ok_or(GameError::Forbidden)?;
        if !self.players[actor_idx].has_drawn {
            return Err(GameError::MustDrawFirst);
        }

        let replacement = self.players[actor_idx]
            .hand
            .get(replacement_index)
            .cloned()
            .ok_or(GameError::InvalidIndex)?;
        let meld = self.players[target_idx]
            .melds
            .get(meld_index)
            .ok_or(GameError::InvalidIndex)?;
        if target_idx != actor_idx && !meld.visible {
            return Err(GameError::Forbidden);
        }
        rules::check_substitution(meld, joker_index, &replacement)?;

        let joker = std::mem::replace(
            &mut self.players[target_idx].melds[meld_index].cards[joker_index],
            replacement,
        );
        self.players[actor_idx].hand.remove(replacement_index);
        self.players[actor_idx].hand.push(joker);
        self.last_action = GameAction::JokerSubstituted;
        self.answer_poke(chat_id);
        Ok(())
    }

    /// Discard one card, ending the turn. Emptying the hand wins the
    /// game instead.
    pub fn discard_card(&mut self, chat_id: ChatId, card_index: usize) -> Result<(), GameError> {
        self.require_turn(chat_id)?;

        let idx = self.player_index(chat_id).ok_or(GameError::Forbidden)?;
        if !self.players[idx].has_drawn {
            return Err(GameError::MustDrawFirst);
        }
        rules::check_discard(&self.players[idx])?;
        if card_index >= self.players[idx].hand.len() {
            return Err(GameError::InvalidIndex);
        }

        let card = self.players[idx].hand.remove(card_index);
        self.discard_pile.push(card);

        if self.players[idx].hand.is_empty() {
            self.complete(chat_id, GameAction::PlayerWon);
            return Ok(());
        }

        let next = self
            .opponent_of(chat_id)
            .map(|p| p.chat_id)
            .ok_or(GameError::GameNotPlaying)?;
        self.players[idx].reset_turn_flags();
        self.current_player = Some(next);
        self.last_action = GameAction::CardDiscarded;
        self.answer_poke(chat_id);
        Ok(())
    }

    /// Replace the hand with its canonical sorted order. Cosmetic:
    /// allowed off-turn and does not update `last_action`.
    pub fn sort_hand(&mut self, chat_id: ChatId) -> Result<(), GameError> {
        self.require_playing()?;
        self.require_member(chat_id)?;

        let idx = self.player_index(chat_id).ok_or(GameError::Forbidden)?;
        self.players[idx].hand = best_sort(&self.players[idx].hand);
        Ok(())
    }

    /// Apply an arbitrary permutation to the hand. Cosmetic, like
    /// [`GameState::sort_hand`].
    pub fn reorder_hand(&mut self, chat_id: ChatId, new_order: &[usize]) -> Result<(), GameError> {
        self.require_playing()?;
        self.require_member(chat_id)?;

        let idx = self.player_index(chat_id).ok_or(GameError::Forbidden)?;
        rules::check_reorder(new_order, self.players[idx].hand.len())?;
        let hand = &self.players[idx].hand;
        let reordered: Vec<_> = new_order.iter().map(|&i| hand[i].clone()).collect();
        self.players[idx].hand = reordered;
        Ok(())
    }

    /// Nudge the opponent. At most one poke may be outstanding; any
    /// accepted game action by the poked player answers it.
    pub fn poke(&mut self, chat_id: ChatId) -> Result<(), GameError> {
        self.require_playing()?;
        self.require_member(chat_id)?;

        if self.poked_by.is_some() {
            return Err(GameError::PokePending);
        }
        self.poked_by = Some(chat_id);
        self.poke_count += 1;
        Ok(())
    }

    /// Leave the game. A waiting game is cancelled; an in-progress game
    /// completes with the remaining player as winner.
    pub fn leave_game(&mut self, chat_id: ChatId) -> Result<(), GameError> {
        self.require_member(chat_id)?;
        match self.status {
            GameStatus::Waiting => {
                self.status = GameStatus::Cancelled;
                self.current_player = None;
                self.last_action = GameAction::PlayerLeft;
                Ok(())
            }
            GameStatus::Playing => {
                let winner = self
                    .opponent_of(chat_id)
                    .map(|p| p.chat_id)
                    .ok_or(GameError::GameNotPlaying)?;
                self.complete(winner, GameAction::PlayerLeft);
                Ok(())
            }
            _ => Err(GameError::GameNotPlaying),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
