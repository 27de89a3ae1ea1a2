//! Score Persistence
//!
//! The game core talks to storage only through [`ScoreStore`]: read a
//! player's historical best, insert a finished-round row, and serve the
//! leaderboard. [`MemoryStore`] backs unit tests and database-free dev
//! runs; [`MySqlStore`] is the production implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

pub mod mysql;

pub use mysql::MySqlStore;

/// A Telegram user profile as carried in auth claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramUser {
    /// Telegram user id.
    pub id: i64,
    /// First name (the only name field Telegram guarantees).
    pub first_name: String,
    /// Last name, if set.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Username, if set.
    #[serde(default)]
    pub username: Option<String>,
    /// Profile photo URL, if shared.
    #[serde(default)]
    pub photo_url: Option<String>,
    /// IETF language tag, if shared.
    #[serde(default)]
    pub language_code: Option<String>,
}

/// One leaderboard row: a player and their best score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Telegram user id.
    pub telegram_id: i64,
    /// Username, if set.
    pub username: Option<String>,
    /// First name.
    pub first_name: String,
    /// Profile photo URL, if shared.
    pub photo_url: Option<String>,
    /// The player's best persisted score.
    pub score: u32,
}

/// Pagination metadata for a leaderboard page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardMeta {
    /// Total number of ranked players.
    pub total: u64,
    /// Page size requested.
    pub limit: u32,
    /// Page offset requested.
    pub offset: u32,
    /// Whether more rows exist past this page.
    pub has_more: bool,
}

/// A page of the leaderboard.
#[derive(Debug, Clone)]
pub struct LeaderboardPage {
    /// Rows, best score first.
    pub entries: Vec<LeaderboardEntry>,
    /// Pagination metadata.
    pub meta: LeaderboardMeta,
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence seam for the game core.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Create or refresh the user's profile row.
    async fn upsert_user(&self, user: &TelegramUser) -> Result<(), StoreError>;

    /// The user's best persisted score, 0 if they have none.
    async fn top_score(&self, user_id: i64) -> Result<u32, StoreError>;

    /// Insert one finished-round row.
    async fn insert_score(
        &self,
        user_id: i64,
        score: u32,
        event_id: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Best score per player, descending, paginated.
    async fn leaderboard(&self, limit: u32, offset: u32) -> Result<LeaderboardPage, StoreError>;
}

/// A persisted finished-round row (in-memory representation).
#[derive(Debug, Clone)]
pub struct ScoreRow {
    /// Telegram user id.
    pub user_id: i64,
    /// Final score of the round.
    pub score: u32,
    /// Tournament the round counted toward, if any.
    pub event_id: Option<String>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    users: HashMap<i64, TelegramUser>,
    scores: Vec<ScoreRow>,
}

/// In-memory store for tests and database-free dev runs.
///
/// Counts inserts so tests can observe the at-most-once persistence
/// property directly.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    inserts: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many score rows have been inserted over the store's lifetime.
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoreStore for MemoryStore {
    async fn upsert_user(&self, user: &TelegramUser) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn top_score(&self, user_id: i64) -> Result<u32, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .scores
            .iter()
            .filter(|row| row.user_id == user_id)
            .map(|row| row.score)
            .max()
            .unwrap_or(0))
    }

    async fn insert_score(
        &self,
        user_id: i64,
        score: u32,
        event_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.scores.push(ScoreRow {
            user_id,
            score,
            event_id: event_id.map(str::to_owned),
            created_at: Utc::now(),
        });
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn leaderboard(&self, limit: u32, offset: u32) -> Result<LeaderboardPage, StoreError> {
        let inner = self.inner.read().await;

        let mut best: HashMap<i64, u32> = HashMap::new();
        for row in &inner.scores {
            let entry = best.entry(row.user_id).or_insert(0);
            *entry = (*entry).max(row.score);
        }

        let mut ranked: Vec<(i64, u32)> = best.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let total = ranked.len() as u64;
        let entries = ranked
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(user_id, score)| {
                let user = inner.users.get(&user_id);
                LeaderboardEntry {
                    telegram_id: user_id,
                    username: user.and_then(|u| u.username.clone()),
                    first_name: user.map(|u| u.first_name.clone()).unwrap_or_default(),
                    photo_url: user.and_then(|u| u.photo_url.clone()),
                    score,
                }
            })
            .collect();

        Ok(LeaderboardPage {
            entries,
            meta: LeaderboardMeta {
                total,
                limit,
                offset,
                has_more: (offset as u64 + limit as u64) < total,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, name: &str) -> TelegramUser {
        TelegramUser {
            id,
            first_name: name.into(),
            last_name: None,
            username: Some(name.to_lowercase()),
            photo_url: None,
            language_code: None,
        }
    }

    #[tokio::test]
    async fn test_top_score_is_max_over_rows() {
        let store = MemoryStore::new();
        store.insert_score(1, 5, None).await.unwrap();
        store.insert_score(1, 9, None).await.unwrap();
        store.insert_score(1, 3, Some("event")).await.unwrap();

        assert_eq!(store.top_score(1).await.unwrap(), 9);
        assert_eq!(store.top_score(2).await.unwrap(), 0);
        assert_eq!(store.insert_count(), 3);
    }

    #[tokio::test]
    async fn test_leaderboard_ranks_best_scores_descending() {
        let store = MemoryStore::new();
        store.upsert_user(&user(1, "Ada")).await.unwrap();
        store.upsert_user(&user(2, "Emmy")).await.unwrap();
        store.upsert_user(&user(3, "Kurt")).await.unwrap();
        store.insert_score(1, 10, None).await.unwrap();
        store.insert_score(1, 4, None).await.unwrap();
        store.insert_score(2, 25, None).await.unwrap();
        store.insert_score(3, 17, None).await.unwrap();

        let page = store.leaderboard(2, 0).await.unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].telegram_id, 2);
        assert_eq!(page.entries[0].score, 25);
        assert_eq!(page.entries[0].first_name, "Emmy");
        assert_eq!(page.entries[1].telegram_id, 3);
        assert_eq!(page.meta.total, 3);
        assert!(page.meta.has_more);

        let rest = store.leaderboard(2, 2).await.unwrap();
        assert_eq!(rest.entries.len(), 1);
        assert_eq!(rest.entries[0].telegram_id, 1);
        assert!(!rest.meta.has_more);
    }

    #[tokio::test]
    async fn test_upsert_user_refreshes_profile() {
        let store = MemoryStore::new();
        store.upsert_user(&user(1, "Ada")).await.unwrap();
        let mut updated = user(1, "Ada");
        updated.username = Some("ada_l".into());
        store.upsert_user(&updated).await.unwrap();
        store.insert_score(1, 1, None).await.unwrap();

        let page = store.leaderboard(10, 0).await.unwrap();
        assert_eq!(page.entries[0].username.as_deref(), Some("ada_l"));
    }
}
