//! Per-Player Round State Machine
//!
//! Pure state: no timers, no I/O. The manager drives this from answer
//! submissions and the one-second ticker and owns all persistence. The
//! terminal transition is a check-and-set on the phase so that the ticker
//! and an answer-driven game over can never both claim it, which is what
//! keeps score persistence at-most-once.

use std::time::Instant;

use crate::game::problem::{Problem, ProblemCard};

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Round in progress, clock running.
    Active,
    /// Round over. Terminal; only a fresh start yields a new session.
    Ended,
}

/// Scoring and time-bank rules for a round.
#[derive(Debug, Clone, Copy)]
pub struct Rules {
    /// Round length and time-bank ceiling (seconds).
    pub round_secs: u32,
    /// Clock bonus for a correct answer (seconds).
    pub bonus_secs: u32,
    /// Clock penalty for a wrong answer (seconds).
    pub penalty_secs: u32,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            round_secs: crate::ROUND_TIME_SECS,
            bonus_secs: crate::CORRECT_BONUS_SECS,
            penalty_secs: crate::WRONG_PENALTY_SECS,
        }
    }
}

/// Result of applying a submitted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The round had already ended; replay of the terminal result.
    AlreadyOver {
        /// Score the round ended with.
        final_score: u32,
        /// Player's best score including this round.
        top_score: u32,
    },
    /// This answer drove the clock to zero and ended the round.
    /// The caller performed the terminal transition and must persist.
    Ended {
        /// Score the round ended with.
        final_score: u32,
        /// Player's best score including this round.
        top_score: u32,
    },
    /// Round continues; the caller should deal the next card.
    Continue {
        /// Whether the answer matched the key.
        correct: bool,
    },
}

/// Result of one ticker second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Clock still running.
    Running {
        /// Seconds remaining.
        time_left: u32,
    },
    /// This tick drove the clock to zero and ended the round.
    /// The caller performed the terminal transition and must persist.
    Expired {
        /// Score the round ended with.
        final_score: u32,
        /// Player's best score including this round.
        top_score: u32,
    },
    /// The round ended elsewhere; the ticker should stop.
    AlreadyOver,
}

/// One player's live round.
#[derive(Debug)]
pub struct Session {
    /// Telegram user id.
    pub user_id: i64,
    /// Points this round. Non-decreasing until a fresh start.
    pub score: u32,
    /// Seconds on the clock, always within `[0, rules.round_secs]`.
    pub time_left: u32,
    /// Best persisted score at round start, updated on round end.
    pub top_score: u32,
    /// Tournament this round counts toward, if any.
    pub event_id: Option<String>,
    /// Refreshed on answers and ticks; drives idle eviction.
    pub last_activity: Instant,
    phase: Phase,
    rules: Rules,
    problem: Problem,
    answer_key: bool,
}

impl Session {
    /// Start a fresh round with a full clock and the first card dealt.
    pub fn new(
        user_id: i64,
        top_score: u32,
        event_id: Option<String>,
        rules: Rules,
        first_card: ProblemCard,
    ) -> Self {
        Self {
            user_id,
            score: 0,
            time_left: rules.round_secs,
            top_score,
            event_id,
            last_activity: Instant::now(),
            phase: Phase::Active,
            rules,
            problem: first_card.problem,
            answer_key: first_card.answer,
        }
    }

    /// Whether the round is still running.
    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    /// The card the player is currently looking at.
    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    /// The expected response for the outstanding card.
    pub(crate) fn answer_key(&self) -> bool {
        self.answer_key
    }

    /// Deal the next card.
    pub fn set_card(&mut self, card: ProblemCard) {
        self.problem = card.problem;
        self.answer_key = card.answer;
    }

    /// Refresh the idle-eviction timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Terminal check-and-set. Returns true iff this call performed the
    /// transition; exactly one caller per session ever sees true.
    pub fn end(&mut self) -> bool {
        if self.phase == Phase::Ended {
            return false;
        }
        self.phase = Phase::Ended;
        self.top_score = self.top_score.max(self.score);
        true
    }

    /// Apply a submitted answer.
    pub fn apply_answer(&mut self, answer: bool) -> AnswerOutcome {
        self.touch();

        if self.phase == Phase::Ended {
            return AnswerOutcome::AlreadyOver {
                final_score: self.score,
                top_score: self.top_score,
            };
        }

        let correct = answer == self.answer_key;
        if correct {
            self.time_left = self.rules.round_secs.min(self.time_left + self.rules.bonus_secs);
            self.score += 1;
        } else {
            self.time_left = self.time_left.saturating_sub(self.rules.penalty_secs);
        }

        if self.time_left == 0 {
            // Under the session lock only one of answer/tick gets here first.
            let won = self.end();
            debug_assert!(won);
            return AnswerOutcome::Ended {
                final_score: self.score,
                top_score: self.top_score,
            };
        }

        AnswerOutcome::Continue { correct }
    }

    /// Advance the countdown by one second.
    pub fn tick_second(&mut self) -> TickOutcome {
        if self.phase == Phase::Ended {
            return TickOutcome::AlreadyOver;
        }

        self.touch();
        self.time_left = self.time_left.saturating_sub(1);

        if self.time_left == 0 {
            let won = self.end();
            debug_assert!(won);
            return TickOutcome::Expired {
                final_score: self.score,
                top_score: self.top_score,
            };
        }

        TickOutcome::Running { time_left: self.time_left }
    }
}
