//! MySQL Score Store
//!
//! Production [`ScoreStore`] on sqlx. Expected schema:
//!
//! ```sql
//! CREATE TABLE users (
//!     telegram_id   BIGINT       NOT NULL PRIMARY KEY,
//!     first_name    VARCHAR(255) NOT NULL,
//!     last_name     VARCHAR(255),
//!     username      VARCHAR(255),
//!     photo_url     TEXT,
//!     language_code VARCHAR(16)
//! );
//!
//! CREATE TABLE scores (
//!     id                BIGINT   NOT NULL AUTO_INCREMENT PRIMARY KEY,
//!     user_telegram_id  BIGINT   NOT NULL REFERENCES users (telegram_id),
//!     score             INT      NOT NULL,
//!     event_id          CHAR(36),
//!     created_at        DATETIME NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::Utc;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tracing::info;

use super::{
    LeaderboardEntry, LeaderboardMeta, LeaderboardPage, ScoreStore, StoreError, TelegramUser,
};

/// MySQL-backed store.
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connect and build a store.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        info!("connected to MySQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScoreStore for MySqlStore {
    async fn upsert_user(&self, user: &TelegramUser) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (telegram_id, first_name, last_name, username, photo_url, language_code)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                first_name = VALUES(first_name),
                last_name = VALUES(last_name),
                username = VALUES(username),
                photo_url = VALUES(photo_url),
                language_code = VALUES(language_code)
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(&user.photo_url)
        .bind(&user.language_code)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn top_score(&self, user_id: i64) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "SELECT MAX(score) AS top_score FROM scores WHERE user_telegram_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let best: Option<i64> = row.try_get("top_score")?;
        Ok(best.unwrap_or(0).max(0) as u32)
    }

    async fn insert_score(
        &self,
        user_id: i64,
        score: u32,
        event_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scores (user_telegram_id, score, event_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(score as i64)
        .bind(event_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn leaderboard(&self, limit: u32, offset: u32) -> Result<LeaderboardPage, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT u.telegram_id, u.username, u.first_name, u.photo_url,
                   MAX(s.score) AS best
            FROM scores s
            JOIN users u ON u.telegram_id = s.user_telegram_id
            GROUP BY u.telegram_id, u.username, u.first_name, u.photo_url
            ORDER BY best DESC, u.telegram_id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(|row| {
                let best: i64 = row.try_get("best")?;
                Ok(LeaderboardEntry {
                    telegram_id: row.try_get("telegram_id")?,
                    username: row.try_get("username")?,
                    first_name: row.try_get("first_name")?,
                    photo_url: row.try_get("photo_url")?,
                    score: best.max(0) as u32,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let total_row = sqlx::query("SELECT COUNT(DISTINCT user_telegram_id) AS total FROM scores")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = total_row.try_get("total")?;
        let total = total.max(0) as u64;

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
