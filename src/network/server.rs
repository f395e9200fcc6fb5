//! WebSocket Game Server
//!
//! Async WebSocket server for multiplayer connections.
//! Handles authentication, game creation and joining, and routes every
//! game action through the rules engine before broadcasting snapshots.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::state::{ChatId, GameState};
use crate::game::GameError;
use crate::network::auth::{validate_token, AuthConfig, AuthError, PlayerProfile};
use crate::network::protocol::{
    AuthResult, ClientMessage, ErrorCode, GameSnapshot, ServerError, ServerMessage,
};
use crate::network::session::{deliver, GameManager, SessionConfig, SessionError, SettlementEvent};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connection timeout.
    pub connection_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080"
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080))),
            max_connections: 1000,
            connection_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("CONQUER_BIND_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.bind_addr = parsed;
            }
        }
        config
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Connected client state.
struct ConnectedClient {
    /// Authenticated identity, set after a successful Auth message.
    profile: Option<PlayerProfile>,
    /// Connection time.
    #[allow(dead_code)]
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
    /// Message sender (for direct messaging to client).
    #[allow(dead_code)]
    sender: mpsc::Sender<ServerMessage>,
}

type ClientMap = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Token validation configuration.
    auth: Arc<AuthConfig>,
    /// Game and settlement coordinator.
    manager: Arc<GameManager>,
    /// Connected clients.
    clients: ClientMap,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server plus the settlement event stream the
    /// caller must consume.
    pub fn new(
        config: ServerConfig,
        auth: AuthConfig,
        session_config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SettlementEvent>) {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (manager, settlement_rx) = GameManager::new(session_config);

        (
            Self {
                config,
                auth: Arc::new(auth),
                manager: Arc::new(manager),
                clients: Arc::new(RwLock::new(BTreeMap::new())),
                shutdown_tx,
            },
            settlement_rx,
        )
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);

        // Spawn cleanup task
        let cleanup_clients = self.clients.clone();
        let cleanup_manager = self.manager.clone();
        let connection_timeout = self.config.connection_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_clients, cleanup_manager, connection_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let manager = self.manager.clone();
        let auth = self.auth.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    profile: None,
                    connected_at: Instant::now(),
                    last_activity: Instant::now(),
                    sender: msg_tx.clone(),
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError {
                                            code: ErrorCode::InvalidInput,
                                            message: "Invalid message format".to_string(),
                                        })).await;
                                        continue;
                                    }
                                };

                                // Update activity
                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                    }
                                }

                                Self::handle_client_message(
                                    addr,
                                    client_msg,
                                    &clients,
                                    &manager,
                                    &auth,
                                    &config,
                                    &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(ServerMessage::Pong {
                                    timestamp: 0,
                                    server_time: unix_millis(),
                                }).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            sender_task.abort();

            // Detach the outbound channel from any live game; the seat
            // stays reserved for reconnection.
            let profile = {
                let mut clients = clients.write().await;
                clients.remove(&addr).and_then(|c| c.profile)
            };
            if let Some(profile) = profile {
                if let Some(table) = manager.game_for_player(profile.chat_id).await {
                    table.write().await.detach(profile.chat_id);
                }
            }

            info!("Client {} cleaned up", addr);
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &ClientMap,
        manager: &Arc<GameManager>,
        auth: &Arc<AuthConfig>,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        // Auth and ping do not need an identity.
        match &msg {
            ClientMessage::Auth { token } => {
                Self::handle_auth(addr, token, clients, manager, auth, config, sender).await;
                return;
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender
                    .send(ServerMessage::Pong {
                        timestamp: *timestamp,
                        server_time: unix_millis(),
                    })
                    .await;
                return;
            }
            _ => {}
        }

        let profile = {
            let clients = clients.read().await;
            clients.get(&addr).and_then(|c| c.profile.clone())
        };
        let profile = match profile {
            Some(p) => p,
            None => {
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code: ErrorCode::NotAuthenticated,
                        message: "Must authenticate first".to_string(),
                    }))
                    .await;
                return;
            }
        };

        match msg {
            ClientMessage::CreateGame { bet_amount } => {
                Self::handle_create_game(profile, bet_amount, manager, sender).await;
            }
            ClientMessage::JoinGame { game_id, game_type } => {
                match manager
                    .join_game(&game_id, profile.chat_id, profile.username.clone(), game_type)
                    .await
                {
                    Ok(table) => {
                        let outbox = {
                            let mut table = table.write().await;
                            table.attach(profile.chat_id, sender.clone());
                            table.snapshot_outbox()
                        };
                        deliver(outbox).await;
                    }
                    Err(e) => {
                        let _ = sender.send(ServerMessage::Error(session_error(&e))).await;
                    }
                }
            }
            ClientMessage::DrawCard { game_id, source } => {
                Self::apply_action(&game_id, profile.chat_id, manager, sender, |state, chat| {
                    state.draw_card(chat, source)
                })
                .await;
            }
            ClientMessage::MeldCards { game_id, card_indices } => {
                Self::apply_action(&game_id, profile.chat_id, manager, sender, |state, chat| {
                    state.meld_cards(chat, &card_indices)
                })
                .await;
            }
            ClientMessage::MakeMeldVisible { game_id, meld_index } => {
                Self::apply_action(&game_id, profile.chat_id, manager, sender, |state, chat| {
                    state.make_meld_visible(chat, meld_index)
                })
                .await;
            }
            ClientMessage::LayoffCard {
                game_id,
                card_index,
                target_player_chat_id,
                target_meld_index,
            } => {
                Self::apply_action(&game_id, profile.chat_id, manager, sender, |state, chat| {
                    state.layoff_card(chat, card_index, target_player_chat_id, target_meld_index)
                })
                .await;
            }
            ClientMessage::RemoveLayoff { game_id, layoff_index } => {
                Self::apply_action(&game_id, profile.chat_id, manager, sender, |state, chat| {
                    state.remove_layoff(chat, layoff_index)
                })
                .await;
            }
            ClientMessage::SubstituteJoker {
                game_id,
                target_player_chat_id,
                meld_index,
                joker_index,
                replacement_index,
            } => {
                Self::apply_action(&game_id, profile.chat_id, manager, sender, |state, chat| {
                    state.substitute_joker(
                        chat,
                        target_player_chat_id,
                        meld_index,
                        joker_index,
                        replacement_index,
                    )
                })
                .await;
            }
            ClientMessage::DiscardCard { game_id, card_index } => {
                Self::apply_action(&game_id, profile.chat_id, manager, sender, |state, chat| {
                    state.discard_card(chat, card_index)
                })
                .await;
            }
            ClientMessage::SortHand { game_id } => {
                Self::apply_action(&game_id, profile.chat_id, manager, sender, |state, chat| {
                    state.sort_hand(chat)
                })
                .await;
            }
            ClientMessage::ReorderHand { game_id, new_order } => {
                Self::apply_action(&game_id, profile.chat_id, manager, sender, |state, chat| {
                    state.reorder_hand(chat, &new_order)
                })
                .await;
            }
            ClientMessage::PokeOpponent { game_id } => {
                Self::handle_poke(&game_id, &profile, manager, sender).await;
            }
            ClientMessage::LeaveGame { game_id } => {
                Self::apply_action(&game_id, profile.chat_id, manager, sender, |state, chat| {
                    state.leave_game(chat)
                })
                .await;
            }
            ClientMessage::Auth { .. } | ClientMessage::Ping { .. } => {}
        }
    }

    /// Handle authentication.
    async fn handle_auth(
        addr: SocketAddr,
        token: &str,
        clients: &ClientMap,
        manager: &Arc<GameManager>,
        auth: &Arc<AuthConfig>,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let profile = validate_token(token, auth).and_then(|claims| claims.profile());
        let profile = match profile {
            Ok(p) => p,
            Err(e) => {
                let code = match e {
                    AuthError::Expired => ErrorCode::TokenExpired,
                    AuthError::NotConfigured => ErrorCode::InternalError,
                    _ => ErrorCode::InvalidToken,
                };
                let _ = sender
                    .send(ServerMessage::AuthResult(AuthResult {
                        success: false,
                        chat_id: None,
                        username: None,
                        error: Some(e.to_string()),
                        server_version: config.version.clone(),
                    }))
                    .await;
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code,
                        message: e.to_string(),
                    }))
                    .await;
                return;
            }
        };

        {
            let mut clients = clients.write().await;
            if let Some(client) = clients.get_mut(&addr) {
                client.profile = Some(profile.clone());
            }
        }

        let _ = sender
            .send(ServerMessage::AuthResult(AuthResult {
                success: true,
                chat_id: Some(profile.chat_id),
                username: Some(profile.username.clone()),
                error: None,
                server_version: config.version.clone(),
            }))
            .await;

        // Reattach to a live game on reconnect.
        if let Some(table) = manager.game_for_player(profile.chat_id).await {
            let snapshot = {
                let mut table = table.write().await;
                table.attach(profile.chat_id, sender.clone());
                GameSnapshot::for_viewer(&table.state, profile.chat_id)
            };
            let _ = sender.send(ServerMessage::State(snapshot)).await;
        }

        debug!("Client {} authenticated as {}", addr, profile.chat_id);
    }

    /// Handle game creation.
    async fn handle_create_game(
        profile: PlayerProfile,
        bet_amount: u32,
        manager: &Arc<GameManager>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match manager
            .create_game(profile.chat_id, profile.username.clone(), bet_amount)
            .await
        {
            Ok((game_id, table)) => {
                let outbox = {
                    let mut table = table.write().await;
                    table.attach(profile.chat_id, sender.clone());
                    table.snapshot_outbox()
                };
                let _ = sender
                    .send(ServerMessage::GameCreated {
                        game_id,
                        bet_amount,
                    })
                    .await;
                deliver(outbox).await;
            }
            Err(e) => {
                let _ = sender.send(ServerMessage::Error(session_error(&e))).await;
            }
        }
    }

    /// Run one rules-engine action against a game. On success the state
    /// is broadcast to every connected player and any settlements owed
    /// are emitted; on failure only the acting player sees the error.
    async fn apply_action<F>(
        game_id: &str,
        chat_id: ChatId,
        manager: &Arc<GameManager>,
        sender: &mpsc::Sender<ServerMessage>,
        action: F,
    ) where
        F: FnOnce(&mut GameState, ChatId) -> Result<(), GameError>,
    {
        let table = match manager.game(game_id).await {
            Some(t) => t,
            None => {
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code: ErrorCode::GameNotFound,
                        message: "game not found".to_string(),
                    }))
                    .await;
                return;
            }
        };

        // Mutate under the write lock, then release it before any send:
        // settlement and snapshot channels are bounded, and a slow
        // consumer must not stall the game.
        let mut table = table.write().await;
        match action(&mut table.state, chat_id) {
            Ok(()) => {
                table.touch();
                let owed = table.collect_settlements();
                let outbox = table.snapshot_outbox();
                drop(table);

                manager.emit_settlements(owed).await;
                deliver(outbox).await;
            }
            Err(e) => {
                drop(table);
                debug!(game_id, chat_id, error = %e, "action rejected");
                let _ = sender
                    .send(ServerMessage::Error(ServerError::from_game_error(&e)))
                    .await;
            }
        }
    }

    /// Handle a poke: record it and notify the opponent directly.
    async fn handle_poke(
        game_id: &str,
        profile: &PlayerProfile,
        manager: &Arc<GameManager>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let table = match manager.game(game_id).await {
            Some(t) => t,
            None => {
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code: ErrorCode::GameNotFound,
                        message: "game not found".to_string(),
                    }))
                    .await;
                return;
            }
        };

        let mut table = table.write().await;
        match table.state.poke(profile.chat_id) {
            Ok(()) => {
                table.touch();
                let poke_count = table.state.poke_count;
                let opponent = table
                    .state
                    .opponent_of(profile.chat_id)
                    .map(|o| o.chat_id)
                    .and_then(|id| table.sender(id));
                let outbox = table.snapshot_outbox();
                drop(table);

                if let Some(opponent) = opponent {
                    let _ = opponent
                        .send(ServerMessage::PokeReceived {
                            from_username: profile.username.clone(),
                            poke_count,
                        })
                        .await;
                }
                let _ = sender.send(ServerMessage::PokeSent).await;
                deliver(outbox).await;
            }
            Err(e) => {
                drop(table);
                let _ = sender
                    .send(ServerMessage::Error(ServerError::from_game_error(&e)))
                    .await;
            }
        }
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(
        clients: ClientMap,
        manager: Arc<GameManager>,
        connection_timeout: Duration,
    ) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            // Cleanup idle connections
            let now = Instant::now();
            let to_remove: Vec<_> = {
                let clients = clients.read().await;
                clients
                    .iter()
                    .filter(|(_, c)| now.duration_since(c.last_activity) > connection_timeout)
                    .map(|(addr, _)| *addr)
                    .collect()
            };

            for addr in to_remove {
                let profile = {
                    let mut clients = clients.write().await;
                    clients.remove(&addr).and_then(|c| c.profile)
                };
                if let Some(profile) = profile {
                    if let Some(table) = manager.game_for_player(profile.chat_id).await {
                        table.write().await.detach(profile.chat_id);
                    }
                }
                info!("Removed idle client {}", addr);
            }

            // Cleanup finished and idle games
            manager.cleanup().await;
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active game count.
    pub async fn game_count(&self) -> usize {
        self.manager.game_count().await
    }
}

/// Map a session error to its wire form.
fn session_error(err: &SessionError) -> ServerError {
    let code = match err {
        SessionError::NotInGame => ErrorCode::NotInGame,
        SessionError::AlreadyInGame => ErrorCode::AlreadyInGame,
        SessionError::GameNotFound => ErrorCode::GameNotFound,
        SessionError::InvalidBet => ErrorCode::InvalidBet,
        SessionError::Game(game_err) => ErrorCode::from(game_err),
    };
    ServerError {
        code,
        message: err.to_string(),
    }
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> (GameServer, mpsc::Receiver<SettlementEvent>) {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        GameServer::new(config, AuthConfig::default(), SessionConfig::default())
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.connection_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let (server, _rx) = test_server();
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.game_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let (server, _rx) = test_server();
        server.shutdown();
        // Should not panic
    }

    #[test]
    fn test_session_error_mapping() {
        assert_eq!(
            session_error(&SessionError::InvalidBet).code,
            ErrorCode::InvalidBet
        );
        assert_eq!(
            session_error(&SessionError::Game(GameError::NotYourTurn)).code,
            ErrorCode::NotYourTurn
        );
    }
}
