//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `mod.rs` - Upstream rows (weeks, activities, points, balance history)
//! - `sources.rs` - `PointsSource` / `BalanceHistorySource` over those rows
//! - `leaderboard.rs` - Partition replacement and loading for the cache

mod leaderboard;
mod sources;

pub use leaderboard::{LoadedPartition, PartitionRun, SeasonTotals};

use crate::domain::{AccountId, ActivityId, CategoryId, Week, WeekId};
use sqlx::sqlite::SqlitePool;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Close the underlying pool; subsequent calls fail as storage unavailable.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Upstream rows
    // =========================================================================

    /// Insert or update a week.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_week(&self, week: &Week) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO weeks (id, season_id, start_ms, end_ms)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                season_id = excluded.season_id,
                start_ms = excluded.start_ms,
                end_ms = excluded.end_ms
            "#,
        )
        .bind(week.id.as_str())
        .bind(week.season_id.as_str())
        .bind(week.start.as_ms())
        .bind(week.end.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Map an activity to its category.
    pub async fn upsert_activity(
        &self,
        activity: &ActivityId,
        category: &CategoryId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO activities (id, category_id) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET category_id = excluded.category_id
            "#,
        )
        .bind(activity.as_str())
        .bind(category.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store raw weekly points for one account/activity.
    ///
    /// `points` is stored verbatim; it is decoded (and rejected if malformed)
    /// when a population run reads it.
    pub async fn upsert_points(
        &self,
        week: &WeekId,
        account: &AccountId,
        activity: &ActivityId,
        points: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO account_activity_points (week_id, account_id, activity_id, points)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(week_id, account_id, activity_id) DO UPDATE SET points = excluded.points
            "#,
        )
        .bind(week.as_str())
        .bind(account.as_str())
        .bind(activity.as_str())
        .bind(points)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that the ledger knows `account`.
    pub async fn register_account(&self, account: &AccountId) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO known_accounts (account_id) VALUES (?)")
            .bind(account.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append a raw balance event, registering the account.
    pub async fn insert_balance_event(
        &self,
        account: &AccountId,
        time_ms: i64,
        balance: &str,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO known_accounts (account_id) VALUES (?)")
            .bind(account.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO balance_events (account_id, time_ms, balance) VALUES (?, ?, ?)")
            .bind(account.as_str())
            .bind(time_ms)
            .bind(balance)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
