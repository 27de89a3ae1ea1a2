//! Game logic.
//!
//! `problem` generates the true/false cards, `session` holds the
//! per-player round state machine, `manager` owns the session map and
//! the timer tasks that drive it.

pub mod manager;
pub mod problem;
pub mod session;

pub use manager::{GameConfig, GameError, GameManager};
pub use problem::{Problem, ProblemCard};
pub use session::{AnswerOutcome, Session, TickOutcome};
