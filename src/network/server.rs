//! WebSocket Game Server
//!
//! Async WebSocket server for game connections. A connection
//! authenticates once (initData or a previously issued token), then
//! starts rounds and submits answers over the same socket. The
//! ticker-driven game over arrives as an unsolicited push.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::game::manager::{GameError, GameManager, GameOverNotice};
use crate::network::auth::{self, AuthConfig};
use crate::network::protocol::{
    AuthOutcome, ClientMessage, ErrorCode, EventInfo, ServerError, ServerMessage,
};
use crate::store::{ScoreStore, TelegramUser};

/// Default leaderboard page size.
const LEADERBOARD_DEFAULT_LIMIT: u32 = 10;

/// Leaderboard page size cap.
const LEADERBOARD_MAX_LIMIT: u32 = 50;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// The currently running tournament, if any.
    pub event_uuid: Option<Uuid>,
    /// Display name for the running tournament.
    pub event_name: String,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static bind address"),
            max_connections: 1000,
            event_uuid: None,
            event_name: "Main Tournament".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = std::env::var("BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .or_else(|| {
                let port: u16 = std::env::var("PORT").ok()?.parse().ok()?;
                format!("0.0.0.0:{port}").parse().ok()
            })
            .unwrap_or(defaults.bind_addr);

        let event_uuid = std::env::var("EVENT_UUID").ok().and_then(|v| {
            Uuid::parse_str(&v)
                .map_err(|e| warn!(value = %v, error = %e, "ignoring invalid EVENT_UUID"))
                .ok()
        });

        Self {
            bind_addr,
            max_connections: std::env::var("MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            event_uuid,
            event_name: std::env::var("EVENT_NAME").unwrap_or(defaults.event_name),
            version: defaults.version,
        }
    }

    /// Tournaments currently open for play.
    pub fn active_events(&self) -> Vec<EventInfo> {
        match self.event_uuid {
            Some(id) => vec![EventInfo {
                id,
                name: self.event_name.clone(),
                description: "Compete for the grand prize in the main event!".to_string(),
            }],
            None => Vec::new(),
        }
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
}

/// Connected client state.
struct ConnectedClient {
    /// Authenticated profile, None until auth.
    user: Option<TelegramUser>,
    /// Message channel to this client.
    sender: mpsc::Sender<ServerMessage>,
}

type ClientMap = Arc<RwLock<HashMap<SocketAddr, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    auth: AuthConfig,
    manager: Arc<GameManager>,
    store: Arc<dyn ScoreStore>,
    clients: ClientMap,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(
        config: ServerConfig,
        auth: AuthConfig,
        manager: Arc<GameManager>,
        store: Arc<dyn ScoreStore>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            auth,
            manager,
            store,
            clients: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
        }
    }

    /// Signal all tasks to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the server until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("game server listening on {}", self.config.bind_addr);

        if !self.auth.is_configured() {
            warn!("authentication not fully configured; clients will be rejected");
        }

        let sweeper = self.manager.clone().run_sweeper();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let client_count = self.clients.read().await.len();
                            if client_count >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            debug!("new connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    self.notify_shutdown().await;
                    break;
                }
            }
        }

        sweeper.abort();
        Ok(())
    }

    /// Push a shutdown notice to every connected client.
    async fn notify_shutdown(&self) {
        let clients = self.clients.read().await;
        for client in clients.values() {
            let _ = client.sender.send(ServerMessage::Shutdown {
                reason: "Server shutting down".to_string(),
            }).await;
        }
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let manager = self.manager.clone();
        let store = self.store.clone();
        let auth_config = self.auth.clone();
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

            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    user: None,
                    sender: msg_tx.clone(),
                });
            }

            // Outbound pump: everything the connection sends goes through
            // this channel, including ticker-driven game-over pushes.
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(error_message(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        )).await;
                                        continue;
                                    }
                                };

                                handle_client_message(
                                    addr,
                                    client_msg,
                                    &clients,
                                    &manager,
                                    &store,
                                    &auth_config,
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
                                debug!("client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        // The accept loop pushes the shutdown notice through
                        // the registry sender; give the pump a chance to
                        // flush it before tearing the connection down.
                        tokio::task::yield_now().await;
                        break;
                    }
                }
            }

            sender_task.abort();
            clients.write().await.remove(&addr);
        });
    }
}

/// Dispatch one parsed client message.
#[allow(clippy::too_many_arguments)]
async fn handle_client_message(
    addr: SocketAddr,
    message: ClientMessage,
    clients: &ClientMap,
    manager: &Arc<GameManager>,
    store: &Arc<dyn ScoreStore>,
    auth_config: &AuthConfig,
    config: &ServerConfig,
    msg_tx: &mpsc::Sender<ServerMessage>,
) {
    match message {
        ClientMessage::Ping { timestamp } => {
            let _ = msg_tx.send(ServerMessage::Pong {
                timestamp,
                server_time: unix_millis(),
            }).await;
        }

        ClientMessage::Auth { init_data } => {
            match auth::validate_init_data(&init_data, auth_config) {
                Ok(user) => match auth::issue_token(&user, auth_config) {
                    Ok(token) => {
                        info!(user_id = user.id, "initData auth successful");
                        set_client_user(clients, addr, user.clone()).await;
                        let _ = msg_tx.send(auth_success(Some(token), user, config)).await;
                    }
                    Err(e) => {
                        error!("token issue failed: {}", e);
                        let _ = msg_tx.send(auth_failure(&e, config)).await;
                    }
                },
                Err(e) => {
                    warn!("initData validation failed for {}: {}", addr, e);
                    let _ = msg_tx.send(auth_failure(&e, config)).await;
                }
            }
        }

        ClientMessage::Token { token } => {
            match auth::validate_token(&token, auth_config) {
                Ok(claims) => match claims.profile() {
                    Some(user) => {
                        debug!(user_id = user.id, "token auth successful");
                        set_client_user(clients, addr, user.clone()).await;
                        let _ = msg_tx.send(auth_success(None, user, config)).await;
                    }
                    None => {
                        let _ = msg_tx
                            .send(auth_failure(&auth::AuthError::MissingClaim("sub".into()), config))
                            .await;
                    }
                },
                Err(e) => {
                    warn!("token validation failed for {}: {}", addr, e);
                    let _ = msg_tx.send(auth_failure(&e, config)).await;
                }
            }
        }

        ClientMessage::Start { event_id } => {
            let Some(user) = authed_user(clients, addr).await else {
                let _ = msg_tx
                    .send(error_message(ErrorCode::AuthRequired, "Authenticate first"))
                    .await;
                return;
            };

            if let Some(ref id) = event_id {
                if Uuid::parse_str(id).is_err() {
                    let _ = msg_tx
                        .send(error_message(ErrorCode::InvalidInput, "Invalid event id"))
                        .await;
                    return;
                }
            }

            // Bridge the ticker's game-over push onto this connection.
            let (notice_tx, mut notice_rx) = mpsc::channel::<GameOverNotice>(1);
            {
                let msg_tx = msg_tx.clone();
                tokio::spawn(async move {
                    while let Some(notice) = notice_rx.recv().await {
                        let _ = msg_tx.send(notice.into()).await;
                    }
                });
            }

            match manager.start(&user, event_id, notice_tx).await {
                Ok(started) => {
                    let _ = msg_tx.send(started.into()).await;
                }
                Err(e) => {
                    let _ = msg_tx.send(game_error_message(&e)).await;
                }
            }
        }

        ClientMessage::Answer { answer } => {
            let Some(user) = authed_user(clients, addr).await else {
                let _ = msg_tx
                    .send(error_message(ErrorCode::AuthRequired, "Authenticate first"))
                    .await;
                return;
            };

            match manager.submit_answer(user.id, answer).await {
                Ok(outcome) => {
                    let _ = msg_tx.send(outcome.into()).await;
                }
                Err(e) => {
                    let _ = msg_tx.send(game_error_message(&e)).await;
                }
            }
        }

        ClientMessage::Leaderboard { limit, offset } => {
            let limit = limit
                .unwrap_or(LEADERBOARD_DEFAULT_LIMIT)
                .clamp(1, LEADERBOARD_MAX_LIMIT);
            let offset = offset.unwrap_or(0);

            match store.leaderboard(limit, offset).await {
                Ok(page) => {
                    let _ = msg_tx.send(ServerMessage::Leaderboard {
                        entries: page.entries,
                        meta: page.meta,
                    }).await;
                }
                Err(e) => {
                    error!("leaderboard query failed: {}", e);
                    let _ = msg_tx
                        .send(error_message(ErrorCode::Internal, "Internal server error"))
                        .await;
                }
            }
        }

        ClientMessage::Events => {
            let _ = msg_tx.send(ServerMessage::Events {
                events: config.active_events(),
            }).await;
        }
    }
}

async fn authed_user(clients: &ClientMap, addr: SocketAddr) -> Option<TelegramUser> {
    clients.read().await.get(&addr).and_then(|c| c.user.clone())
}

async fn set_client_user(clients: &ClientMap, addr: SocketAddr, user: TelegramUser) {
    if let Some(client) = clients.write().await.get_mut(&addr) {
        client.user = Some(user);
    }
}

fn auth_success(token: Option<String>, user: TelegramUser, config: &ServerConfig) -> ServerMessage {
    ServerMessage::AuthResult(AuthOutcome {
        success: true,
        token,
        user: Some(user),
        error: None,
        server_version: config.version.clone(),
    })
}

fn auth_failure(error: &auth::AuthError, config: &ServerConfig) -> ServerMessage {
    ServerMessage::AuthResult(AuthOutcome {
        success: false,
        token: None,
        user: None,
        error: Some(error.to_string()),
        server_version: config.version.clone(),
    })
}

fn error_message(code: ErrorCode, message: &str) -> ServerMessage {
    ServerMessage::Error(ServerError {
        code,
        message: message.to_string(),
    })
}

/// Map core game errors onto wire error codes.
fn game_error_message(error: &GameError) -> ServerMessage {
    let code = match error {
        GameError::MissingIdentity => ErrorCode::AuthRequired,
        GameError::NotFound => ErrorCode::NotFound,
    };
    ServerMessage::Error(ServerError {
        code,
        message: error.to_string(),
    })
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::manager::GameConfig;
    use crate::store::MemoryStore;

    fn server() -> GameServer {
        let store: Arc<dyn ScoreStore> = Arc::new(MemoryStore::new());
        let manager = Arc::new(GameManager::new(store.clone(), GameConfig::default()));
        GameServer::new(ServerConfig::default(), AuthConfig::default(), manager, store)
    }

    #[tokio::test]
    async fn test_shutdown_notice_reaches_registered_clients() {
        let server = server();
        let addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let (tx, mut rx) = mpsc::channel(4);

        server.clients.write().await.insert(addr, ConnectedClient {
            user: None,
            sender: tx,
        });

        server.notify_shutdown().await;
        match rx.recv().await {
            Some(ServerMessage::Shutdown { reason }) => assert!(!reason.is_empty()),
            other => panic!("expected shutdown notice, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.event_uuid.is_none());
        assert!(config.active_events().is_empty());
    }

    #[test]
    fn test_active_events_from_configured_uuid() {
        let id = Uuid::new_v4();
        let config = ServerConfig {
            event_uuid: Some(id),
            event_name: "Weekend Challenge".into(),
            ..ServerConfig::default()
        };

        let events = config.active_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].name, "Weekend Challenge");
    }

    #[test]
    fn test_game_errors_map_to_wire_codes() {
        let cases = [
            (GameError::MissingIdentity, ErrorCode::AuthRequired),
            (GameError::NotFound, ErrorCode::NotFound),
        ];

        for (error, expected) in cases {
            match game_error_message(&error) {
                ServerMessage::Error(ServerError { code, .. }) => assert_eq!(code, expected),
                other => panic!("unexpected message {other:?}"),
            }
        }
    }
}
