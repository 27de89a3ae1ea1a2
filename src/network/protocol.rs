//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON with a `type` tag.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::manager::{GameOverNotice, RoundOutcome, StartedGame};
use crate::game::problem::Problem;
use crate::store::{LeaderboardEntry, LeaderboardMeta, TelegramUser};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with raw Telegram Mini-App initData.
    Auth {
        /// The `window.Telegram.WebApp.initData` string.
        init_data: String,
    },

    /// Authenticate with a previously issued token.
    Token {
        /// JWT from an earlier `AuthResult`.
        token: String,
    },

    /// Start a round, replacing any live one.
    Start {
        /// Tournament to play in; free play when absent.
        event_id: Option<String>,
    },

    /// Answer the outstanding card.
    Answer {
        /// The player's true/false response.
        answer: bool,
    },

    /// Request a leaderboard page.
    Leaderboard {
        /// Page size (defaults to 10, capped at 50).
        limit: Option<u32>,
        /// Page offset (defaults to 0).
        offset: Option<u32>,
    },

    /// List active tournaments.
    Events,

    /// Ping for latency measurement.
    Ping {
        /// Echoed back in the pong.
        timestamp: u64,
    },
}

impl ClientMessage {
    /// Parse from a JSON string.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthOutcome),

    /// A round started.
    GameStarted {
        /// The first card.
        problem: Problem,
        /// Seconds on the clock.
        time_left: u32,
        /// Always zero at start.
        score: u32,
        /// The player's historical best.
        top_score: u32,
    },

    /// The round continues with a fresh card.
    Round {
        /// Whether the previous answer was right.
        feedback: Feedback,
        /// The next card.
        problem: Problem,
        /// Seconds on the clock after bonus/penalty.
        time_left: u32,
        /// Points so far.
        score: u32,
    },

    /// The round is over. Sent in reply to an answer, or pushed
    /// unsolicited when the clock runs out.
    GameOver {
        /// Score the round ended with.
        final_score: u32,
        /// The player's best score including this round.
        top_score: u32,
    },

    /// A leaderboard page.
    Leaderboard {
        /// Rows, best score first.
        entries: Vec<LeaderboardEntry>,
        /// Pagination metadata.
        meta: LeaderboardMeta,
    },

    /// Active tournaments.
    Events {
        /// Currently running events.
        events: Vec<EventInfo>,
    },

    /// Pong response.
    Pong {
        /// Client timestamp echoed back.
        timestamp: u64,
        /// Server wall-clock milliseconds.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

impl ServerMessage {
    /// Parse from a JSON string.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOutcome {
    /// Whether auth succeeded.
    pub success: bool,
    /// Issued token on initData auth; absent on token auth.
    pub token: Option<String>,
    /// The authenticated profile.
    pub user: Option<TelegramUser>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Feedback on the previous answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    /// The answer matched the key.
    Correct,
    /// It did not.
    Wrong,
}

/// An active tournament.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInfo {
    /// Tournament identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Short description.
    pub description: String,
}

/// Error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authenticate before playing.
    AuthRequired,
    /// No live session; start a new game.
    NotFound,
    /// Malformed request.
    InvalidInput,
    /// Server-side fault.
    Internal,
}

impl From<StartedGame> for ServerMessage {
    fn from(started: StartedGame) -> Self {
        ServerMessage::GameStarted {
            problem: started.problem,
            time_left: started.time_left,
            score: started.score,
            top_score: started.top_score,
        }
    }
}

impl From<RoundOutcome> for ServerMessage {
    fn from(outcome: RoundOutcome) -> Self {
        match outcome {
            RoundOutcome::Continue { correct, problem, time_left, score } => {
                ServerMessage::Round {
                    feedback: if correct { Feedback::Correct } else { Feedback::Wrong },
                    problem,
                    time_left,
                    score,
                }
            }
            RoundOutcome::GameOver { final_score, top_score } => {
                ServerMessage::GameOver { final_score, top_score }
            }
        }
    }
}

impl From<GameOverNotice> for ServerMessage {
    fn from(notice: GameOverNotice) -> Self {
        ServerMessage::GameOver {
            final_score: notice.final_score,
            top_score: notice.top_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::problem::Op;

    #[test]
    fn test_client_message_roundtrip() {
        let messages = vec![
            ClientMessage::Auth { init_data: "user=...&hash=ab".into() },
            ClientMessage::Start { event_id: Some("e1".into()) },
            ClientMessage::Answer { answer: true },
            ClientMessage::Leaderboard { limit: Some(5), offset: None },
            ClientMessage::Ping { timestamp: 9 },
        ];

        for message in messages {
            let json = message.to_json().unwrap();
            let back = ClientMessage::from_json(&json).unwrap();
            assert_eq!(format!("{message:?}"), format!("{back:?}"));
        }
    }

    #[test]
    fn test_message_tags_are_snake_case() {
        let json = ClientMessage::Answer { answer: false }.to_json().unwrap();
        assert!(json.contains(r#""type":"answer""#));

        let json = ServerMessage::GameOver { final_score: 3, top_score: 9 }
            .to_json()
            .unwrap();
        assert!(json.contains(r#""type":"game_over""#));
        assert!(json.contains(r#""final_score":3"#));
    }

    #[test]
    fn test_round_outcome_conversion() {
        let outcome = RoundOutcome::Continue {
            correct: false,
            problem: Problem::Statement { a: 3, op: Op::Add, b: Some(4), shown: 8 },
            time_left: 30,
            score: 2,
        };
        match ServerMessage::from(outcome) {
            ServerMessage::Round { feedback, time_left, score, .. } => {
                assert_eq!(feedback, Feedback::Wrong);
                assert_eq!(time_left, 30);
                assert_eq!(score, 2);
            }
            other => panic!("unexpected message {other:?}"),
        }

        let notice = GameOverNotice { final_score: 7, top_score: 11 };
        match ServerMessage::from(notice) {
            ServerMessage::GameOver { final_score, top_score } => {
                assert_eq!(final_score, 7);
                assert_eq!(top_score, 11);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
