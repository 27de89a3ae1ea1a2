//! Math Blitz game server binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use math_blitz::game::manager::{GameConfig, GameManager};
use math_blitz::network::auth::AuthConfig;
use math_blitz::network::server::{GameServer, ServerConfig};
use math_blitz::store::{MemoryStore, ScoreStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Math Blitz server v{} starting", math_blitz::VERSION);

    let server_config = ServerConfig::from_env();
    let auth_config = AuthConfig::from_env();

    let store: Arc<dyn ScoreStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = math_blitz::store::mysql::MySqlStore::connect(&url)
                .await
                .context("failed to connect to database")?;
            info!("connected to MySQL score store");
            Arc::new(store)
        }
        Err(_) => {
            warn!("DATABASE_URL not set, scores will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };

    let manager = Arc::new(GameManager::new(store.clone(), GameConfig::default()));
    let server = GameServer::new(server_config, auth_config, manager, store);

    tokio::select! {
        result = server.run() => {
            result.context("server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            server.shutdown();
        }
    }

    info!("server stopped");
    Ok(())
}
