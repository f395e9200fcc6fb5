//! Network Layer
//!
//! WebSocket server for real-time multiplayer communication.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod auth;
pub mod protocol;
pub mod server;
pub mod session;

pub use auth::{validate_token, AuthConfig, AuthError, PlayerProfile, TokenClaims};
pub use protocol::{ClientMessage, ErrorCode, GameSnapshot, ServerError, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{GameManager, GameTable, SessionConfig, SessionError, SettlementEvent};
