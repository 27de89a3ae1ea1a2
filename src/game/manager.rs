//! Game Session Management
//!
//! Owns the map of live rounds keyed by user id, the per-session
//! one-second ticker tasks, and the idle-eviction sweep. All persistence
//! goes through the injected [`ScoreStore`]; store failures are logged and
//! swallowed so a database hiccup never takes a round down with it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::game::problem::{self, Problem};
use crate::game::session::{AnswerOutcome, Rules, Session, TickOutcome};
use crate::store::{ScoreStore, TelegramUser};

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Scoring and time-bank rules.
    pub rules: Rules,
    /// Countdown period.
    pub tick_interval: Duration,
    /// How often the idle sweep runs.
    pub sweep_interval: Duration,
    /// Sessions idle longer than this are evicted.
    pub idle_timeout: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rules: Rules::default(),
            tick_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(crate::IDLE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(crate::IDLE_TIMEOUT_SECS),
        }
    }
}

/// Caller-visible game errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GameError {
    /// Authenticated identity carries no usable user id.
    #[error("user identity missing")]
    MissingIdentity,

    /// No session for this user; start a new game.
    #[error("player not found, start a new game")]
    NotFound,
}

/// Snapshot returned by [`GameManager::start`].
#[derive(Debug, Clone)]
pub struct StartedGame {
    /// The first card.
    pub problem: Problem,
    /// Seconds on the clock.
    pub time_left: u32,
    /// Always zero at start.
    pub score: u32,
    /// Historical best read from the store.
    pub top_score: u32,
}

/// Result of a submitted answer.
#[derive(Debug, Clone)]
pub enum RoundOutcome {
    /// Round continues with a fresh card.
    Continue {
        /// Whether the answer matched the key.
        correct: bool,
        /// The next card.
        problem: Problem,
        /// Seconds on the clock after bonus/penalty.
        time_left: u32,
        /// Points so far.
        score: u32,
    },
    /// Round over, either right now or on an earlier transition.
    GameOver {
        /// Score the round ended with.
        final_score: u32,
        /// Player's best score including this round.
        top_score: u32,
    },
}

/// Unsolicited end-of-round notice pushed when the ticker expires a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameOverNotice {
    /// Score the round ended with.
    pub final_score: u32,
    /// Player's best score including this round.
    pub top_score: u32,
}

struct PlayerEntry {
    session: Arc<Mutex<Session>>,
    ticker: JoinHandle<()>,
}

/// Manages all live rounds.
pub struct GameManager {
    sessions: RwLock<HashMap<i64, PlayerEntry>>,
    store: Arc<dyn ScoreStore>,
    config: GameConfig,
}

impl GameManager {
    /// Create a manager backed by the given store.
    pub fn new(store: Arc<dyn ScoreStore>, config: GameConfig) -> Self {
        info!(
            round_secs = config.rules.round_secs,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "game manager initialized"
        );
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            config,
        }
    }

    /// Start a round for the user, replacing any prior one. The previous
    /// session's ticker is aborted so a stale round can neither tick nor
    /// persist. `notify` receives the game-over push if the clock runs out.
    pub async fn start(
        &self,
        user: &TelegramUser,
        event_id: Option<String>,
        notify: mpsc::Sender<GameOverNotice>,
    ) -> Result<StartedGame, GameError> {
        if user.id == 0 {
            return Err(GameError::MissingIdentity);
        }

        if let Err(e) = self.store.upsert_user(user).await {
            warn!(user_id = user.id, error = %e, "failed to upsert user profile");
        }

        let top_score = match self.store.top_score(user.id).await {
            Ok(best) => best,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "failed to read top score");
                0
            }
        };

        let first_card = {
            let mut rng = rand::thread_rng();
            problem::generate(0, &mut rng)
        };

        let session = Session::new(
            user.id,
            top_score,
            event_id.clone(),
            self.config.rules,
            first_card,
        );
        let started = StartedGame {
            problem: session.problem().clone(),
            time_left: session.time_left,
            score: session.score,
            top_score,
        };

        let session = Arc::new(Mutex::new(session));
        let ticker = spawn_ticker(
            session.clone(),
            self.store.clone(),
            self.config.tick_interval,
            notify,
        );

        let replaced = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(user.id, PlayerEntry { session, ticker })
        };
        if let Some(old) = replaced {
            old.ticker.abort();
            debug!(user_id = user.id, "superseded previous session");
        }

        info!(
            user_id = user.id,
            event_id = event_id.as_deref().unwrap_or("free play"),
            top_score,
            "game started"
        );
        Ok(started)
    }

    /// Apply a submitted answer for the user's live round.
    pub async fn submit_answer(&self, user_id: i64, answer: bool) -> Result<RoundOutcome, GameError> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&user_id)
                .map(|entry| entry.session.clone())
                .ok_or(GameError::NotFound)?
        };

        let mut session = session.lock().await;
        match session.apply_answer(answer) {
            AnswerOutcome::AlreadyOver { final_score, top_score } => {
                Ok(RoundOutcome::GameOver { final_score, top_score })
            }
            AnswerOutcome::Ended { final_score, top_score } => {
                let event_id = session.event_id.clone();
                drop(session);
                persist_final(self.store.as_ref(), user_id, final_score, event_id.as_deref()).await;
                Ok(RoundOutcome::GameOver { final_score, top_score })
            }
            AnswerOutcome::Continue { correct } => {
                let card = {
                    let mut rng = rand::thread_rng();
                    problem::generate(session.score, &mut rng)
                };
                let problem = card.problem.clone();
                session.set_card(card);
                Ok(RoundOutcome::Continue {
                    correct,
                    problem,
                    time_left: session.time_left,
                    score: session.score,
                })
            }
        }
    }

    /// Remove sessions idle past the threshold, aborting their tickers.
    /// Returns the number evicted.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;

        let mut stale = Vec::new();
        for (user_id, entry) in sessions.iter() {
            let session = entry.session.lock().await;
            if session.last_activity.elapsed() > self.config.idle_timeout {
                stale.push(*user_id);
            }
        }

        for user_id in &stale {
            if let Some(entry) = sessions.remove(user_id) {
                entry.ticker.abort();
                info!(user_id, "evicted idle session");
            }
        }

        stale.len()
    }

    /// Run the periodic idle sweep until the task is aborted.
    pub fn run_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = self.evict_idle().await;
                if evicted > 0 {
                    debug!(evicted, "idle sweep");
                }
            }
        })
    }

    /// Number of sessions currently held (live and game-over replays).
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Persist a finished round. Failures are logged and swallowed; the
/// session has already transitioned and the caller is not informed.
async fn persist_final(store: &dyn ScoreStore, user_id: i64, score: u32, event_id: Option<&str>) {
    if score == 0 {
        return;
    }
    match store.insert_score(user_id, score, event_id).await {
        Ok(()) => info!(
            user_id,
            score,
            event_id = event_id.unwrap_or("free play"),
            "saved final score"
        ),
        Err(e) => error!(user_id, score, error = %e, "failed to save final score"),
    }
}

/// One-second countdown task for a single session. Exits as soon as it
/// observes a terminal phase; only the claimant of the terminal
/// check-and-set persists and notifies.
fn spawn_ticker(
    session: Arc<Mutex<Session>>,
    store: Arc<dyn ScoreStore>,
    tick_interval: Duration,
    notify: mpsc::Sender<GameOverNotice>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        // An interval fires immediately; consume that so the first
        // decrement lands a full period after start.
        interval.tick().await;

        loop {
            interval.tick().await;

            let (user_id, event_id, outcome) = {
                let mut session = session.lock().await;
                (session.user_id, session.event_id.clone(), session.tick_second())
            };

            match outcome {
                TickOutcome::Running { .. } => {}
                TickOutcome::AlreadyOver => break,
                TickOutcome::Expired { final_score, top_score } => {
                    debug!(user_id, final_score, "round expired by ticker");
                    persist_final(store.as_ref(), user_id, final_score, event_id.as_deref()).await;
                    let _ = notify.send(GameOverNotice { final_score, top_score }).await;
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn user(id: i64) -> TelegramUser {
        TelegramUser {
            id,
            first_name: "Ada".into(),
            last_name: None,
            username: Some(format!("player{id}")),
            photo_url: None,
            language_code: None,
        }
    }

    fn manager_with(config: GameConfig) -> (Arc<GameManager>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(GameManager::new(store.clone(), config));
        (manager, store)
    }

    fn manager() -> (Arc<GameManager>, Arc<MemoryStore>) {
        manager_with(GameConfig::default())
    }

    async fn answer_key(manager: &GameManager, user_id: i64) -> bool {
        let sessions = manager.sessions.read().await;
        let session = sessions.get(&user_id).unwrap().session.clone();
        drop(sessions);
        let session = session.lock().await;
        session.answer_key()
    }

    async fn session_of(manager: &GameManager, user_id: i64) -> Arc<Mutex<Session>> {
        let sessions = manager.sessions.read().await;
        sessions.get(&user_id).unwrap().session.clone()
    }

    #[tokio::test]
    async fn test_start_initializes_round() {
        let (manager, _store) = manager();
        let (tx, _rx) = mpsc::channel(8);

        let started = manager.start(&user(42), None, tx).await.unwrap();
        assert_eq!(started.time_left, crate::ROUND_TIME_SECS);
        assert_eq!(started.score, 0);
        assert_eq!(started.top_score, 0);
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_start_requires_identity() {
        let (manager, _store) = manager();
        let (tx, _rx) = mpsc::channel(8);

        let result = manager.start(&user(0), None, tx).await;
        assert!(matches!(result, Err(GameError::MissingIdentity)));
    }

    #[tokio::test]
    async fn test_start_reads_historical_best() {
        let (manager, store) = manager();
        store.insert_score(7, 12, None).await.unwrap();
        let (tx, _rx) = mpsc::channel(8);

        let started = manager.start(&user(7), None, tx).await.unwrap();
        assert_eq!(started.top_score, 12);
    }

    #[tokio::test]
    async fn test_answer_without_session_is_not_found() {
        let (manager, _store) = manager();
        let result = manager.submit_answer(99, true).await;
        assert!(matches!(result, Err(GameError::NotFound)));
    }

    #[tokio::test]
    async fn test_correct_and_wrong_answers_move_clock_and_score() {
        let (manager, _store) = manager();
        let (tx, _rx) = mpsc::channel(8);
        manager.start(&user(42), None, tx).await.unwrap();

        let key = answer_key(&manager, 42).await;
        match manager.submit_answer(42, key).await.unwrap() {
            RoundOutcome::Continue { correct, time_left, score, .. } => {
                assert!(correct);
                assert_eq!(score, 1);
                // bonus clamps at the ceiling
                assert_eq!(time_left, crate::ROUND_TIME_SECS);
            }
            other => panic!("expected continue, got {other:?}"),
        }

        let key = answer_key(&manager, 42).await;
        match manager.submit_answer(42, !key).await.unwrap() {
            RoundOutcome::Continue { correct, time_left, score, .. } => {
                assert!(!correct);
                assert_eq!(score, 1);
                assert_eq!(time_left, crate::ROUND_TIME_SECS - crate::WRONG_PENALTY_SECS);
            }
            other => panic!("expected continue, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_positive_final_score_persists_exactly_once() {
        let (manager, store) = manager();
        let (tx, _rx) = mpsc::channel(8);
        manager.start(&user(42), None, tx).await.unwrap();

        {
            let session = session_of(&manager, 42).await;
            let mut session = session.lock().await;
            session.score = 3;
            session.time_left = 5;
        }

        let key = answer_key(&manager, 42).await;
        match manager.submit_answer(42, !key).await.unwrap() {
            RoundOutcome::GameOver { final_score, top_score } => {
                assert_eq!(final_score, 3);
                assert_eq!(top_score, 3);
            }
            other => panic!("expected game over, got {other:?}"),
        }
        assert_eq!(store.insert_count(), 1);

        // Terminal replay, no second row
        match manager.submit_answer(42, true).await.unwrap() {
            RoundOutcome::GameOver { final_score, .. } => assert_eq!(final_score, 3),
            other => panic!("expected replay, got {other:?}"),
        }
        assert_eq!(store.insert_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_score_round_never_persists() {
        let (manager, store) = manager();
        let (tx, _rx) = mpsc::channel(8);
        manager.start(&user(42), None, tx).await.unwrap();

        {
            let session = session_of(&manager, 42).await;
            session.lock().await.time_left = 5;
        }

        let key = answer_key(&manager, 42).await;
        match manager.submit_answer(42, !key).await.unwrap() {
            RoundOutcome::GameOver { final_score, .. } => assert_eq!(final_score, 0),
            other => panic!("expected game over, got {other:?}"),
        }
        assert_eq!(store.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_tick_expiry_after_answer_end_does_not_double_persist() {
        let (manager, store) = manager();
        let (tx, _rx) = mpsc::channel(8);
        manager.start(&user(42), None, tx).await.unwrap();

        let session = session_of(&manager, 42).await;
        {
            let mut session = session.lock().await;
            session.score = 2;
            session.time_left = 5;
        }

        let key = answer_key(&manager, 42).await;
        manager.submit_answer(42, !key).await.unwrap();
        assert_eq!(store.insert_count(), 1);

        // The race the ticker could lose: it fires after the answer already
        // claimed the terminal transition and must see AlreadyOver.
        assert_eq!(session.lock().await.tick_second(), TickOutcome::AlreadyOver);
        assert_eq!(store.insert_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_expires_round_and_notifies() {
        let (manager, store) = manager();
        let (tx, mut rx) = mpsc::channel(8);
        manager.start(&user(42), None, tx).await.unwrap();

        {
            let session = session_of(&manager, 42).await;
            let mut session = session.lock().await;
            session.score = 4;
            session.time_left = 2;
        }

        // Paused clock auto-advances while we wait on the channel.
        let notice = rx.recv().await.expect("game over push");
        assert_eq!(notice, GameOverNotice { final_score: 4, top_score: 4 });
        assert_eq!(store.insert_count(), 1);

        let session = session_of(&manager, 42).await;
        assert!(!session.lock().await.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_aborts_stale_ticker() {
        let (manager, store) = manager();
        let (tx1, _rx1) = mpsc::channel(8);
        manager.start(&user(42), None, tx1).await.unwrap();

        let stale = session_of(&manager, 42).await;
        {
            let mut session = stale.lock().await;
            session.score = 5;
            session.time_left = 1;
        }

        let (tx2, _rx2) = mpsc::channel(8);
        let started = manager.start(&user(42), None, tx2).await.unwrap();
        assert_eq!(started.score, 0);
        assert_eq!(manager.session_count().await, 1);

        // Give the aborted ticker every chance to misfire
        tokio::time::sleep(Duration::from_secs(5)).await;

        let session = stale.lock().await;
        assert!(session.is_active(), "stale session must not be ticked");
        assert_eq!(session.time_left, 1);
        assert_eq!(store.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let config = GameConfig {
            idle_timeout: Duration::from_millis(50),
            ..GameConfig::default()
        };
        let (manager, _store) = manager_with(config);
        let (tx, _rx) = mpsc::channel(8);
        manager.start(&user(42), None, tx).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(manager.evict_idle().await, 1);
        assert_eq!(manager.session_count().await, 0);

        let result = manager.submit_answer(42, true).await;
        assert!(matches!(result, Err(GameError::NotFound)));
    }

    #[tokio::test]
    async fn test_fresh_sessions_survive_the_sweep() {
        let (manager, _store) = manager();
        let (tx, _rx) = mpsc::channel(8);
        manager.start(&user(42), None, tx).await.unwrap();

        assert_eq!(manager.evict_idle().await, 0);
        assert_eq!(manager.session_count().await, 1);
    }
}
