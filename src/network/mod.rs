//! Networking.
//!
//! `auth` validates Telegram identity and JWTs, `protocol` defines the
//! wire messages, `server` runs the WebSocket accept loop.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{AuthConfig, AuthError, TokenClaims};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{GameServer, ServerConfig};
