//! Collaborator traits implemented over the upstream tables.

use super::Repository;
use crate::datasource::{BalanceHistorySource, PointsSource, RawBalanceRow, RawPointsRow, SourceError};
use crate::domain::{AccountId, ActivityId, CategoryId, SeasonId, TimeMs, Week, WeekId};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;

fn week_from_row(row: &SqliteRow) -> Week {
    Week {
        id: WeekId::new(row.get::<String, _>("id")),
        season_id: SeasonId::new(row.get::<String, _>("season_id")),
        start: TimeMs::new(row.get("start_ms")),
        end: TimeMs::new(row.get("end_ms")),
    }
}

#[async_trait]
impl PointsSource for Repository {
    async fn list_weeks(&self, season: Option<&SeasonId>) -> Result<Vec<Week>, SourceError> {
        let rows = match season {
            Some(season) => {
                sqlx::query(
                    r#"
                    SELECT id, season_id, start_ms, end_ms FROM weeks
                    WHERE season_id = ?
                    ORDER BY start_ms ASC, id ASC
                    "#,
                )
                .bind(season.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, season_id, start_ms, end_ms FROM weeks
                    ORDER BY start_ms ASC, id ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(week_from_row).collect())
    }

    async fn get_week(&self, week_id: &WeekId) -> Result<Option<Week>, SourceError> {
        let row = sqlx::query("SELECT id, season_id, start_ms, end_ms FROM weeks WHERE id = ?")
            .bind(week_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(week_from_row))
    }

    async fn fetch_activity_categories(
        &self,
    ) -> Result<HashMap<ActivityId, CategoryId>, SourceError> {
        let rows = sqlx::query("SELECT id, category_id FROM activities")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    ActivityId::new(row.get::<String, _>("id")),
                    CategoryId::new(row.get::<String, _>("category_id")),
                )
            })
            .collect())
    }

    async fn fetch_cohort(&self, week: &Week) -> Result<Vec<RawPointsRow>, SourceError> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, activity_id, points
            FROM account_activity_points
            WHERE week_id = ?
            ORDER BY account_id ASC, activity_id ASC
            "#,
        )
        .bind(week.id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RawPointsRow {
                account_id: row.get("account_id"),
                activity_id: row.get("activity_id"),
                points: row.get("points"),
            })
            .collect())
    }
}

#[async_trait]
impl BalanceHistorySource for Repository {
    async fn fetch_balance_events(
        &self,
        account: &AccountId,
        period_start: TimeMs,
        period_end: TimeMs,
    ) -> Result<Vec<RawBalanceRow>, SourceError> {
        // One read transaction so the carry-in and the in-period rows come
        // from the same snapshot of the ledger.
        let mut tx = self.pool.begin().await?;
        let known = sqlx::query("SELECT 1 FROM known_accounts WHERE account_id = ?")
            .bind(account.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if known.is_none() {
            tx.rollback().await?;
            return Err(SourceError::UnknownAccount(account.to_string()));
        }

        // Carry-in row: the balance in force when the period opens.
        let carry_in = sqlx::query(
            r#"
            SELECT balance FROM balance_events
            WHERE account_id = ? AND time_ms <= ?
            ORDER BY time_ms DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(account.as_str())
        .bind(period_start.as_ms())
        .fetch_optional(&mut *tx)
        .await?;

        let in_period = sqlx::query(
            r#"
            SELECT time_ms, balance FROM balance_events
            WHERE account_id = ? AND time_ms > ? AND time_ms <= ?
            ORDER BY time_ms ASC, id ASC
            "#,
        )
        .bind(account.as_str())
        .bind(period_start.as_ms())
        .bind(period_end.as_ms())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut events = Vec::with_capacity(in_period.len() + 1);
        if let Some(row) = carry_in {
            events.push(RawBalanceRow::new(period_start.as_ms(), row.get::<String, _>("balance")));
        }
        events.extend(
            in_period
                .iter()
                .map(|row| RawBalanceRow::new(row.get("time_ms"), row.get::<String, _>("balance"))),
        );
        Ok(events)
    }
}
