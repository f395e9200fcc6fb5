//! Game Session Management
//!
//! Manages the lifecycle of games from creation to settlement.
//! Coordinates between connected clients and the deterministic rules
//! engine, and emits stake/payout events for the ledger.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::core::rng::derive_game_seed;
use crate::game::state::{ChatId, GameId, GameMode, GameState, GameStatus};
use crate::network::protocol::{GameSnapshot, ServerMessage};
use crate::{MAX_BET, MIN_BET, PAYOUT_DENOMINATOR, PAYOUT_NUMERATOR};

/// Configuration for session management.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Smallest allowed stake.
    pub min_bet: u32,
    /// Largest allowed stake.
    pub max_bet: u32,
    /// Games with no accepted action for this long are cancelled.
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_bet: MIN_BET,
            max_bet: MAX_BET,
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Ledger-facing settlement events. The server never touches balances
/// itself; a downstream consumer applies these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementEvent {
    /// A player's stake is reserved when they enter a game.
    StakeDebit {
        game_id: GameId,
        chat_id: ChatId,
        amount: u32,
    },
    /// The winner's payout: both stakes minus the house cut.
    WinnerPayout {
        game_id: GameId,
        chat_id: ChatId,
        amount: u32,
    },
    /// A stake returned for a cancelled game.
    Refund {
        game_id: GameId,
        chat_id: ChatId,
        amount: u32,
    },
}

/// Winner's payout for a stake: both stakes minus the house cut.
pub fn winner_payout(bet_amount: u32) -> u32 {
    bet_amount * 2 * PAYOUT_NUMERATOR / PAYOUT_DENOMINATOR
}

/// Messages prepared under a table lock for delivery after release.
pub type Outbox = Vec<(mpsc::Sender<ServerMessage>, ServerMessage)>;

/// Deliver prepared messages. Must run with no table lock held; sends
/// into bounded channels suspend when a client's buffer is full.
pub async fn deliver(outbox: Outbox) {
    for (sender, message) in outbox {
        let _ = sender.send(message).await;
    }
}

/// One live game and its attached connections.
pub struct GameTable {
    /// Authoritative state.
    pub state: GameState,
    /// Message channel per connected player.
    senders: BTreeMap<ChatId, mpsc::Sender<ServerMessage>>,
    /// Last accepted action, for idle cleanup.
    last_activity: Instant,
    /// Whether settlement events were already emitted.
    settled: bool,
}

impl GameTable {
    fn new(state: GameState) -> Self {
        Self {
            state,
            senders: BTreeMap::new(),
            last_activity: Instant::now(),
            settled: false,
        }
    }

    /// Attach (or replace) a player's outbound channel.
    pub fn attach(&mut self, chat_id: ChatId, sender: mpsc::Sender<ServerMessage>) {
        self.senders.insert(chat_id, sender);
    }

    /// Detach a player's outbound channel. The seat stays occupied;
    /// the player may reattach on reconnect.
    pub fn detach(&mut self, chat_id: ChatId) {
        self.senders.remove(&chat_id);
    }

    /// Record activity for idle cleanup.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since the last accepted action.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// A player's outbound channel, if connected.
    pub fn sender(&self, chat_id: ChatId) -> Option<mpsc::Sender<ServerMessage>> {
        self.senders.get(&chat_id).cloned()
    }

    /// Per-viewer snapshot messages paired with their outbound channels.
    /// Each player gets their own redacted projection. Prepared under
    /// the table lock and delivered after it is released, so a client
    /// with a full channel cannot stall the game.
    pub fn snapshot_outbox(&self) -> Outbox {
        self.senders
            .iter()
            .map(|(&chat_id, sender)| {
                let snapshot = GameSnapshot::for_viewer(&self.state, chat_id);
                (sender.clone(), ServerMessage::State(snapshot))
            })
            .collect()
    }

    /// Settlement events owed for a finished game. Emitted at most once.
    pub fn collect_settlements(&mut self) -> Vec<SettlementEvent> {
        if self.settled {
            return Vec::new();
        }
        let game_id = self.state.game_id.clone();
        let bet = self.state.bet_amount;

        match self.state.status {
            GameStatus::Completed => {
                self.settled = true;
                match self.state.winner {
                    Some(winner) => vec![SettlementEvent::WinnerPayout {
                        game_id,
                        chat_id: winner,
                        amount: winner_payout(bet),
                    }],
                    None => Vec::new(),
                }
            }
            GameStatus::Cancelled => {
                self.settled = true;
                self.state
                    .players
                    .iter()
                    .map(|p| SettlementEvent::Refund {
                        game_id: game_id.clone(),
                        chat_id: p.chat_id,
                        amount: bet,
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Player has no active game.
    #[error("not in a game")]
    NotInGame,

    /// Player already has an active game.
    #[error("already in a game")]
    AlreadyInGame,

    /// No such game.
    #[error("game not found")]
    GameNotFound,

    /// Stake outside the configured bounds.
    #[error("bet amount outside allowed range")]
    InvalidBet,

    /// A rules violation from the engine.
    #[error(transparent)]
    Game(#[from] crate::game::GameError),
}

// =============================================================================
// GAME MANAGER
// =============================================================================

/// Manages all active games and the player-to-game index.
pub struct GameManager {
    /// Active games.
    games: RwLock<BTreeMap<GameId, Arc<RwLock<GameTable>>>>,
    /// Player to game mapping; one active game per player.
    player_games: RwLock<BTreeMap<ChatId, GameId>>,
    /// Ledger event channel.
    settlement_tx: mpsc::Sender<SettlementEvent>,
    /// Configuration.
    config: SessionConfig,
}

impl GameManager {
    /// Create a manager plus the receiving end of the settlement stream.
    pub fn new(config: SessionConfig) -> (Self, mpsc::Receiver<SettlementEvent>) {
        let (settlement_tx, settlement_rx) = mpsc::channel(256);
        (
            Self {
                games: RwLock::new(BTreeMap::new()),
                player_games: RwLock::new(BTreeMap::new()),
                settlement_tx,
                config,
            },
            settlement_rx,
        )
    }

    /// Create a new waiting game with the caller as host. Reserves the
    /// host's stake.
    pub async fn create_game(
        &self,
        chat_id: ChatId,
        username: String,
        bet_amount: u32,
    ) -> Result<(GameId, Arc<RwLock<GameTable>>), SessionError> {
        if bet_amount < self.config.min_bet || bet_amount > self.config.max_bet {
            return Err(SessionError::InvalidBet);
        }
        {
            let player_games = self.player_games.read().await;
            if player_games.contains_key(&chat_id) {
                return Err(SessionError::AlreadyInGame);
            }
        }

        let game_id: GameId = uuid::Uuid::new_v4().to_string();
        let state = GameState::new(game_id.clone(), chat_id, username, bet_amount);
        let table = Arc::new(RwLock::new(GameTable::new(state)));

        self.games
            .write()
            .await
            .insert(game_id.clone(), table.clone());
        self.player_games
            .write()
            .await
            .insert(chat_id, game_id.clone());

        self.emit(SettlementEvent::StakeDebit {
            game_id: game_id.clone(),
            chat_id,
            amount: bet_amount,
        })
        .await;

        info!(game_id = %game_id, chat_id, bet_amount, "game created");
        Ok((game_id, table))
    }

    /// Join a waiting game. The joiner selects the mode, the deal runs,
    /// and the joiner moves first. Reserves the joiner's stake.
    pub async fn join_game(
        &self,
        game_id: &str,
        chat_id: ChatId,
        username: String,
        mode: GameMode,
    ) -> Result<Arc<RwLock<GameTable>>, SessionError> {
        {
            let player_games = self.player_games.read().await;
            if player_games.contains_key(&chat_id) {
                return Err(SessionError::AlreadyInGame);
            }
        }
        let table = self
            .game(game_id)
            .await
            .ok_or(SessionError::GameNotFound)?;

        let bet_amount;
        {
            let mut table = table.write().await;
            table.state.add_player(chat_id, username)?;

            let chat_ids: Vec<ChatId> =
                table.state.players.iter().map(|p| p.chat_id).collect();
            let seed = derive_game_seed(&table.state.game_id, &chat_ids, 0);
            table.state.begin(mode, seed)?;
            table.touch();
            bet_amount = table.state.bet_amount;
        }

        self.player_games
            .write()
            .await
            .insert(chat_id, game_id.to_string());

        self.emit(SettlementEvent::StakeDebit {
            game_id: game_id.to_string(),
            chat_id,
            amount: bet_amount,
        })
        .await;

        info!(game_id, chat_id, ?mode, "game started");
        Ok(table)
    }

    /// Get a game by ID.
    pub async fn game(&self, game_id: &str) -> Option<Arc<RwLock<GameTable>>> {
        self.games.read().await.get(game_id).cloned()
    }

    /// Get the active game for a player.
    pub async fn game_for_player(&self, chat_id: ChatId) -> Option<Arc<RwLock<GameTable>>> {
        let game_id = self.player_games.read().await.get(&chat_id).cloned()?;
        self.game(&game_id).await
    }

    /// Forward collected settlement events to the ledger channel.
    /// Callers collect under the table lock and emit after releasing it.
    pub async fn emit_settlements(&self, events: Vec<SettlementEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }

    /// Active game count.
    pub async fn game_count(&self) -> usize {
        self.games.read().await.len()
    }

    /// Drop finished games and cancel idle ones. Idle cancellation
    /// refunds both stakes.
    pub async fn cleanup(&self) {
        let tables: Vec<(GameId, Arc<RwLock<GameTable>>)> = {
            let games = self.games.read().await;
            games.iter().map(|(id, t)| (id.clone(), t.clone())).collect()
        };

        let mut to_remove = Vec::new();
        for (game_id, table) in tables {
            let owed = {
                let mut table = table.write().await;
                let finished = matches!(
                    table.state.status,
                    GameStatus::Completed | GameStatus::Cancelled
                );
                if !finished && table.idle_for() > self.config.idle_timeout {
                    warn!(game_id = %game_id, "cancelling idle game");
                    table.state.status = GameStatus::Cancelled;
                    table.state.current_player = None;
                }
                if matches!(
                    table.state.status,
                    GameStatus::Completed | GameStatus::Cancelled
                ) {
                    let members: Vec<ChatId> =
                        table.state.players.iter().map(|p| p.chat_id).collect();
                    to_remove.push((game_id, members));
                    table.collect_settlements()
                } else {
                    Vec::new()
                }
            };
            self.emit_settlements(owed).await;
        }

        if !to_remove.is_empty() {
            let mut games = self.games.write().await;
            let mut player_games = self.player_games.write().await;
            for (game_id, members) in to_remove {
                debug!(game_id = %game_id, "removing finished game");
                games.remove(&game_id);
                for chat_id in members {
                    if player_games.get(&chat_id) == Some(&game_id) {
                        player_games.remove(&chat_id);
                    }
                }
            }
        }
    }

    async fn emit(&self, event: SettlementEvent) {
        if self.settlement_tx.send(event).await.is_err() {
            warn!("settlement receiver dropped; event lost");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (GameManager, mpsc::Receiver<SettlementEvent>) {
        GameManager::new(SessionConfig::default())
    }

    #[tokio::test]
    async fn test_create_game_reserves_stake() {
        let (manager, mut rx) = manager();
        let (game_id, _table) = manager.create_game(1, "alice".into(), 100).await.unwrap();
        assert_eq!(manager.game_count().await, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SettlementEvent::StakeDebit {
                game_id,
                chat_id: 1,
                amount: 100,
            }
        );
    }

    #[tokio::test]
    async fn test_bet_bounds() {
        let (manager, _rx) = manager();
        assert_eq!(
            manager.create_game(1, "alice".into(), MIN_BET - 1).await.err(),
            Some(SessionError::InvalidBet)
        );
        assert_eq!(
            manager.create_game(1, "alice".into(), MAX_BET + 1).await.err(),
            Some(SessionError::InvalidBet)
        );
        assert!(manager.create_game(1, "alice".into(), MIN_BET).await.is_ok());
    }

    #[tokio::test]
    async fn test_one_game_per_player() {
        let (manager, _rx) = manager();
        manager.create_game(1, "alice".into(), 100).await.unwrap();
        assert_eq!(
            manager.create_game(1, "alice".into(), 100).await.err(),
            Some(SessionError::AlreadyInGame)
        );
    }

    #[tokio::test]
    async fn test_join_starts_game_with_joiner_to_act() {
        let (manager, mut rx) = manager();
        let (game_id, _) = manager.create_game(1, "alice".into(), 100).await.unwrap();
        let table = manager
            .join_game(&game_id, 2, "bob".into(), GameMode::UpAndDown)
            .await
            .unwrap();

        let table = table.read().await;
        assert_eq!(table.state.status, GameStatus::Playing);
        assert_eq!(table.state.current_player, Some(2));
        assert_eq!(table.state.mode, Some(GameMode::UpAndDown));

        // Both stakes were reserved.
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, SettlementEvent::StakeDebit { chat_id: 1, .. }));
        assert!(matches!(second, SettlementEvent::StakeDebit { chat_id: 2, .. }));
    }

    #[tokio::test]
    async fn test_join_missing_game() {
        let (manager, _rx) = manager();
        assert_eq!(
            manager
                .join_game("nope", 2, "bob".into(), GameMode::Up)
                .await
                .err(),
            Some(SessionError::GameNotFound)
        );
    }

    #[tokio::test]
    async fn test_winner_payout_rate() {
        // Two stakes in, one tenth to the house.
        assert_eq!(winner_payout(100), 180);
        assert_eq!(winner_payout(20), 36);
        assert_eq!(winner_payout(1000), 1800);
    }

    #[tokio::test]
    async fn test_completed_game_pays_winner_once() {
        let (manager, mut rx) = manager();
        let (game_id, _) = manager.create_game(1, "alice".into(), 100).await.unwrap();
        let table = manager
            .join_game(&game_id, 2, "bob".into(), GameMode::Up)
            .await
            .unwrap();
        // Drain the stake events.
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        let owed = {
            let mut table = table.write().await;
            table.state.leave_game(2).unwrap();
            let owed = table.collect_settlements();
            // A second collection owes nothing.
            assert!(table.collect_settlements().is_empty());
            owed
        };
        manager.emit_settlements(owed).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SettlementEvent::WinnerPayout {
                game_id,
                chat_id: 1,
                amount: 180,
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_game_refunds() {
        let (manager, mut rx) = manager();
        let (game_id, table) = manager.create_game(1, "alice".into(), 100).await.unwrap();
        rx.recv().await.unwrap();

        let owed = {
            let mut table = table.write().await;
            table.state.leave_game(1).unwrap();
            table.collect_settlements()
        };
        manager.emit_settlements(owed).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SettlementEvent::Refund {
                game_id,
                chat_id: 1,
                amount: 100,
            }
        );
    }

    #[tokio::test]
    async fn test_cleanup_removes_finished_games() {
        let (manager, _rx) = manager();
        let (game_id, table) = manager.create_game(1, "alice".into(), 100).await.unwrap();
        {
            let mut table = table.write().await;
            table.state.leave_game(1).unwrap();
        }

        manager.cleanup().await;
        assert_eq!(manager.game_count().await, 0);
        assert!(manager.game(&game_id).await.is_none());
        // The seat is free again.
        assert!(manager.create_game(1, "alice".into(), 100).await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_cancels_idle_games() {
        let config = SessionConfig {
            idle_timeout: Duration::from_secs(0),
            ..Default::default()
        };
        let (manager, mut rx) = GameManager::new(config);
        let (_game_id, _table) = manager.create_game(1, "alice".into(), 100).await.unwrap();
        rx.recv().await.unwrap();

        manager.cleanup().await;
        assert_eq!(manager.game_count().await, 0);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SettlementEvent::Refund { chat_id: 1, amount: 100, .. }));
    }

    #[tokio::test]
    async fn test_per_viewer_broadcast_channels() {
        let (manager, _rx) = manager();
        let (game_id, _) = manager.create_game(1, "alice".into(), 100).await.unwrap();
        let table = manager
            .join_game(&game_id, 2, "bob".into(), GameMode::Down)
            .await
            .unwrap();

        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let outbox = {
            let mut table = table.write().await;
            table.attach(1, tx1);
            table.attach(2, tx2);
            table.snapshot_outbox()
        };
        deliver(outbox).await;

        for (rx, me) in [(&mut rx1, 1), (&mut rx2, 2)] {
            match rx.recv().await.unwrap() {
                ServerMessage::State(snap) => {
                    assert_eq!(snap.you.unwrap().chat_id, me);
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_slow_reader_does_not_hold_table_lock() {
        let (manager, _rx) = manager();
        let (game_id, _) = manager.create_game(1, "alice".into(), 100).await.unwrap();
        let table = manager
            .join_game(&game_id, 2, "bob".into(), GameMode::Up)
            .await
            .unwrap();

        // Capacity-one channel, pre-filled: the next send suspends.
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(ServerMessage::PokeSent).await.unwrap();

        let outbox = {
            let mut table = table.write().await;
            table.attach(1, tx);
            table.snapshot_outbox()
        };
        let delivery = tokio::spawn(deliver(outbox));

        // The suspended delivery holds no table lock.
        let guard = tokio::time::timeout(Duration::from_millis(100), table.write()).await;
        assert!(guard.is_ok());
        drop(guard);

        // Drain the channel so the delivery completes.
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        delivery.await.unwrap();
    }
}
