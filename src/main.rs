//! Conquer Game Server
//!
//! Authoritative WebSocket server for Conquer. Validates every action
//! through the rules engine and emits settlement events for the ledger.

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conquer::network::{AuthConfig, GameServer, ServerConfig, SessionConfig, SettlementEvent};
use conquer::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Conquer Server v{}", VERSION);

    let config = ServerConfig::from_env();
    let auth = AuthConfig::from_env();
    if !auth.is_configured() {
        warn!("no AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; all connections will fail auth");
    }

    let (server, mut settlements) =
        GameServer::new(config, auth, SessionConfig::default());

    // Settlement events go to the log until a ledger consumer is wired
    // up downstream.
    tokio::spawn(async move {
        while let Some(event) = settlements.recv().await {
            match event {
                SettlementEvent::StakeDebit { game_id, chat_id, amount } => {
                    info!(%game_id, chat_id, amount, "stake reserved");
                }
                SettlementEvent::WinnerPayout { game_id, chat_id, amount } => {
                    info!(%game_id, chat_id, amount, "winner payout");
                }
                SettlementEvent::Refund { game_id, chat_id, amount } => {
                    info!(%game_id, chat_id, amount, "stake refunded");
                }
            }
        }
    });

    server.run().await.context("server terminated")?;
    Ok(())
}
