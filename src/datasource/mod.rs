//! Collaborator interfaces: balance history from the ledger/indexer and raw
//! weekly points from the upstream points stage.
//!
//! Sources hand back undecoded rows; decoding (and the skip-and-count policy
//! for malformed rows) lives in `orchestration::cohort`.

use crate::domain::{AccountId, ActivityId, CategoryId, SeasonId, TimeMs, Week, WeekId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

pub mod mock;

pub use mock::{CohortFetchHold, MockDataSource};

/// A balance history row as stored by the ledger indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBalanceRow {
    pub time_ms: i64,
    pub balance: String,
}

impl RawBalanceRow {
    pub fn new(time_ms: i64, balance: impl Into<String>) -> Self {
        Self {
            time_ms,
            balance: balance.into(),
        }
    }
}

/// One account's raw points for one activity in a week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPointsRow {
    pub account_id: String,
    pub activity_id: String,
    pub points: String,
}

impl RawPointsRow {
    pub fn new(
        account_id: impl Into<String>,
        activity_id: impl Into<String>,
        points: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            activity_id: activity_id.into(),
            points: points.into(),
        }
    }
}

/// Ledger/indexer balance history.
#[async_trait]
pub trait BalanceHistorySource: Send + Sync + fmt::Debug {
    /// Fetch an account's balance events relevant to `[period_start, period_end]`.
    ///
    /// The result starts with the balance in force at `period_start` (the
    /// latest earlier event, re-stamped at `period_start`) when one exists,
    /// followed by the events inside the period in recording order.
    async fn fetch_balance_events(
        &self,
        account: &AccountId,
        period_start: TimeMs,
        period_end: TimeMs,
    ) -> Result<Vec<RawBalanceRow>, SourceError>;
}

/// Upstream points-computation stage.
#[async_trait]
pub trait PointsSource: Send + Sync + fmt::Debug {
    /// Weeks of one season, or of every season when `season` is `None`,
    /// ordered by start time.
    async fn list_weeks(&self, season: Option<&SeasonId>) -> Result<Vec<Week>, SourceError>;

    async fn get_week(&self, week_id: &WeekId) -> Result<Option<Week>, SourceError>;

    /// Activity → category resolution table.
    async fn fetch_activity_categories(
        &self,
    ) -> Result<HashMap<ActivityId, CategoryId>, SourceError>;

    /// Raw per-account, per-activity weekly points for `week`.
    async fn fetch_cohort(&self, week: &Week) -> Result<Vec<RawPointsRow>, SourceError>;
}

/// Error type for collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Backend unreachable or failing (caller surfaces as StorageUnavailable).
    Unavailable(String),
    /// The ledger has never seen this account.
    UnknownAccount(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unavailable(msg) => write!(f, "Source unavailable: {}", msg),
            SourceError::UnknownAccount(account) => write!(f, "Unknown account: {}", account),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        SourceError::Unavailable(err.to_string())
    }
}

/// Restrict a full history to what matters for `[start, end]`.
///
/// The latest row at or before `start` is carried in at `start`; rows after
/// `end` are dropped. Input order is preserved among kept rows.
pub fn clip_to_period(rows: &[RawBalanceRow], start: TimeMs, end: TimeMs) -> Vec<RawBalanceRow> {
    let carry_in = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.time_ms <= start.as_ms())
        .max_by_key(|(idx, r)| (r.time_ms, *idx))
        .map(|(_, r)| RawBalanceRow::new(start.as_ms(), r.balance.clone()));

    carry_in
        .into_iter()
        .chain(
            rows.iter()
                .filter(|r| r.time_ms > start.as_ms() && r.time_ms <= end.as_ms())
                .cloned(),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_display() {
        let err = SourceError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Source unavailable: connection refused");

        let err = SourceError::UnknownAccount("acct_9".to_string());
        assert_eq!(err.to_string(), "Unknown account: acct_9");
    }

    #[test]
    fn test_clip_carries_in_latest_prior_balance() {
        let rows = vec![
            RawBalanceRow::new(100, "1"),
            RawBalanceRow::new(500, "2"),
            RawBalanceRow::new(1500, "3"),
            RawBalanceRow::new(5000, "4"),
        ];
        let clipped = clip_to_period(&rows, TimeMs::new(1000), TimeMs::new(2000));
        assert_eq!(
            clipped,
            vec![RawBalanceRow::new(1000, "2"), RawBalanceRow::new(1500, "3")]
        );
    }

    #[test]
    fn test_clip_prefers_last_recorded_on_tie() {
        let rows = vec![RawBalanceRow::new(500, "2"), RawBalanceRow::new(500, "7")];
        let clipped = clip_to_period(&rows, TimeMs::new(1000), TimeMs::new(2000));
        assert_eq!(clipped, vec![RawBalanceRow::new(1000, "7")]);
    }

    #[test]
    fn test_clip_without_prior_history() {
        let rows = vec![RawBalanceRow::new(1200, "3")];
        let clipped = clip_to_period(&rows, TimeMs::new(1000), TimeMs::new(2000));
        assert_eq!(clipped, rows);
    }
}
