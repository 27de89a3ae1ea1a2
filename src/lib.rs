//! # Math Blitz Game Server
//!
//! Authoritative server for Math Blitz, a timed true/false math trivia game
//! played from a Telegram Mini-App.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MATH BLITZ SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Game logic                                │
//! │  ├── problem.rs  - True/false problem generation             │
//! │  ├── session.rs  - Per-player round state machine            │
//! │  └── manager.rs  - Session map, tickers, idle eviction       │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── auth.rs     - Telegram initData validation + JWT        │
//! │  ├── protocol.rs - Message types                             │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  store/          - Persistence                               │
//! │  ├── mod.rs      - ScoreStore trait + in-memory store        │
//! │  └── mysql.rs    - sqlx MySQL store                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Game rules
//!
//! Each player has at most one live session. A session starts with a full
//! clock; the server poses statements like `47 + 38 = 85` and the player
//! answers true or false. Correct answers add time and a point, wrong
//! answers cost time. When the clock reaches zero the round is over and a
//! positive final score is persisted exactly once.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use game::manager::{GameConfig, GameError, GameManager};
pub use game::problem::{Problem, ProblemCard};
pub use game::session::Session;
pub use store::{MemoryStore, ScoreStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Round length and time-bank ceiling, in seconds
pub const ROUND_TIME_SECS: u32 = 40;

/// Seconds added to the clock for a correct answer
pub const CORRECT_BONUS_SECS: u32 = 5;

/// Seconds removed from the clock for a wrong answer
pub const WRONG_PENALTY_SECS: u32 = 10;

/// Sessions idle longer than this are evicted (seconds)
pub const IDLE_TIMEOUT_SECS: u64 = 600;
