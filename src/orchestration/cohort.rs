//! Week cohort assembly: decode raw points, resolve categories, attach TWA balances.

use crate::datasource::{BalanceHistorySource, PointsSource, RawBalanceRow, RawPointsRow};
use crate::domain::{
    AccountId, ActivityId, BalanceEvent, CategoryId, CohortEntry, Decimal, TimeMs, Week, WeekId,
};
use crate::engine::compute_time_weighted_average;
use crate::error::EngineError;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Rows and accounts dropped while assembling a cohort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyReport {
    /// Points or balance rows that failed decoding.
    pub malformed_rows: usize,
    /// Points rows whose activity has no category.
    pub unresolved_activities: usize,
    /// Accounts left out of the cohort (unknown to the ledger or bad history).
    pub excluded_accounts: usize,
}

/// Everything a week partition is built from.
#[derive(Debug, Clone)]
pub struct WeekCohort {
    pub week: Week,
    /// One entry per account, ordered by account id.
    pub entries: Vec<CohortEntry>,
    /// Raw points per category per account (cohort members only).
    pub category_points: BTreeMap<CategoryId, BTreeMap<AccountId, Decimal>>,
    pub report: AssemblyReport,
}

/// Builds [`WeekCohort`]s from the points and balance-history collaborators.
#[derive(Debug, Clone)]
pub struct CohortAssembler {
    points: Arc<dyn PointsSource>,
    balances: Arc<dyn BalanceHistorySource>,
    balance_fetch_concurrency: usize,
}

struct DecodedPoints {
    account: AccountId,
    category: CategoryId,
    points: Decimal,
}

fn decode_points_row(
    week: &WeekId,
    row: &RawPointsRow,
    categories: &HashMap<ActivityId, CategoryId>,
) -> Result<DecodedPoints, EngineError> {
    let key = format!("{}/{}/{}", week, row.account_id, row.activity_id);
    let points = Decimal::from_str_canonical(&row.points).map_err(|e| {
        EngineError::MalformedRecord {
            key: key.clone(),
            reason: e.to_string(),
        }
    })?;
    if points.is_negative() {
        return Err(EngineError::MalformedRecord {
            key,
            reason: format!("negative points {}", points),
        });
    }

    let category = categories
        .get(&ActivityId::new(row.activity_id.as_str()))
        .cloned()
        .ok_or_else(|| EngineError::ActivityNotResolved {
            account: row.account_id.clone(),
            activity: row.activity_id.clone(),
        })?;

    Ok(DecodedPoints {
        account: AccountId::new(row.account_id.as_str()),
        category,
        points,
    })
}

/// Decode balance rows, skipping (and counting) malformed ones.
fn decode_balance_rows(account: &AccountId, rows: Vec<RawBalanceRow>) -> (Vec<BalanceEvent>, usize) {
    let mut skipped = 0;
    let events = rows
        .into_iter()
        .filter_map(|row| match Decimal::from_str_canonical(&row.balance) {
            Ok(balance) => Some(BalanceEvent::new(TimeMs::new(row.time_ms), balance)),
            Err(e) => {
                warn!(
                    key = %format!("{}@{}", account, row.time_ms),
                    error = %e,
                    "Skipping malformed balance row"
                );
                skipped += 1;
                None
            }
        })
        .collect();
    (events, skipped)
}

impl CohortAssembler {
    pub fn new(
        points: Arc<dyn PointsSource>,
        balances: Arc<dyn BalanceHistorySource>,
        balance_fetch_concurrency: usize,
    ) -> Self {
        Self {
            points,
            balances,
            balance_fetch_concurrency: balance_fetch_concurrency.max(1),
        }
    }

    /// Assemble the cohort for `week`.
    ///
    /// Malformed rows, unresolved activities and per-account failures are
    /// logged and counted in the report.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if either collaborator is unreachable.
    pub async fn assemble(&self, week: &Week) -> Result<WeekCohort, EngineError> {
        let categories = self.points.fetch_activity_categories().await?;
        let rows = self.points.fetch_cohort(week).await?;

        let mut report = AssemblyReport::default();
        let mut weekly_points: BTreeMap<AccountId, Decimal> = BTreeMap::new();
        let mut category_points: BTreeMap<CategoryId, BTreeMap<AccountId, Decimal>> =
            BTreeMap::new();

        for row in &rows {
            match decode_points_row(&week.id, row, &categories) {
                Ok(decoded) => {
                    *weekly_points
                        .entry(decoded.account.clone())
                        .or_insert_with(Decimal::zero) += decoded.points;
                    *category_points
                        .entry(decoded.category)
                        .or_default()
                        .entry(decoded.account)
                        .or_insert_with(Decimal::zero) += decoded.points;
                }
                Err(EngineError::MalformedRecord { key, reason }) => {
                    warn!(key = %key, reason = %reason, "Skipping malformed points row");
                    report.malformed_rows += 1;
                }
                Err(err @ EngineError::ActivityNotResolved { .. }) => {
                    warn!(week = %week.id, error = %err, "Dropping unresolved activity");
                    report.unresolved_activities += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let fetches: Vec<_> = weekly_points
            .into_iter()
            .map(|(account, points)| async move {
                let balance = self.time_weighted_balance(&account, week).await;
                (account, points, balance)
            })
            .collect();
        let balances: Vec<(AccountId, Decimal, Result<(Decimal, usize), EngineError>)> =
            stream::iter(fetches)
                .buffered(self.balance_fetch_concurrency)
                .collect()
                .await;

        let mut entries = Vec::with_capacity(balances.len());
        for (account, points, balance) in balances {
            match balance {
                Ok((twa, skipped)) => {
                    report.malformed_rows += skipped;
                    entries.push(CohortEntry::new(account, twa, points));
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(week = %week.id, account = %account, error = %err, "Excluding account from cohort");
                    report.excluded_accounts += 1;
                    for per_account in category_points.values_mut() {
                        per_account.remove(&account);
                    }
                }
            }
        }
        category_points.retain(|_, per_account| !per_account.is_empty());

        info!(
            week = %week.id,
            season = %week.season_id,
            accounts = entries.len(),
            malformed_rows = report.malformed_rows,
            unresolved_activities = report.unresolved_activities,
            excluded_accounts = report.excluded_accounts,
            "Cohort assembled"
        );

        Ok(WeekCohort {
            week: week.clone(),
            entries,
            category_points,
            report,
        })
    }

    /// TWA balance over the week plus the number of balance rows skipped.
    async fn time_weighted_balance(
        &self,
        account: &AccountId,
        week: &Week,
    ) -> Result<(Decimal, usize), EngineError> {
        let rows = self
            .balances
            .fetch_balance_events(account, week.start, week.end)
            .await?;
        let (events, skipped) = decode_balance_rows(account, rows);
        let twa = compute_time_weighted_average(events, week.end)?;
        Ok((twa, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockDataSource;
    use crate::domain::SeasonId;

    const DAY_MS: i64 = 86_400_000;

    fn week() -> Week {
        Week {
            id: WeekId::new("w1"),
            season_id: SeasonId::new("s1"),
            start: TimeMs::new(0),
            end: TimeMs::new(7 * DAY_MS),
        }
    }

    fn assembler(mock: MockDataSource) -> CohortAssembler {
        let mock = Arc::new(mock);
        CohortAssembler::new(mock.clone(), mock, 2)
    }

    fn base_mock() -> MockDataSource {
        MockDataSource::new()
            .with_week(week())
            .with_activity("swap", "trading")
            .with_activity("supply", "lending")
    }

    #[tokio::test]
    async fn test_sums_points_per_account_and_category() {
        let mock = base_mock()
            .with_points("w1", "a", "swap", "10")
            .with_points("w1", "a", "supply", "2.5")
            .with_points("w1", "b", "swap", "4")
            .with_balance("a", 0, "20000")
            .with_balance("b", 0, "5000");

        let cohort = assembler(mock).assemble(&week()).await.unwrap();
        assert_eq!(cohort.report, AssemblyReport::default());
        assert_eq!(
            cohort.entries,
            vec![
                CohortEntry::new(
                    AccountId::new("a"),
                    Decimal::from(20000),
                    Decimal::from_str_canonical("12.5").unwrap()
                ),
                CohortEntry::new(AccountId::new("b"), Decimal::from(5000), Decimal::from(4)),
            ]
        );
        let trading = &cohort.category_points[&CategoryId::new("trading")];
        assert_eq!(trading[&AccountId::new("a")], Decimal::from(10));
        assert_eq!(trading[&AccountId::new("b")], Decimal::from(4));
        assert_eq!(cohort.category_points[&CategoryId::new("lending")].len(), 1);
    }

    #[tokio::test]
    async fn test_twa_over_week() {
        // 0 for the first half of the week, 14000 for the second.
        let mock = base_mock()
            .with_points("w1", "a", "swap", "1")
            .with_balance("a", 0, "0")
            .with_balance("a", 7 * DAY_MS / 2, "14000");

        let cohort = assembler(mock).assemble(&week()).await.unwrap();
        assert_eq!(cohort.entries[0].balance, Decimal::from(7000));
    }

    #[tokio::test]
    async fn test_malformed_and_unresolved_rows_are_counted() {
        let mock = base_mock()
            .with_points("w1", "a", "swap", "not-a-number")
            .with_points("w1", "a", "supply", "3")
            .with_points("w1", "b", "bridge", "9")
            .with_points("w1", "c", "swap", "-1")
            .with_balance("a", 0, "100")
            .with_balance("a", 10, "garbage");

        let cohort = assembler(mock).assemble(&week()).await.unwrap();
        assert_eq!(cohort.report.malformed_rows, 3);
        assert_eq!(cohort.report.unresolved_activities, 1);
        assert_eq!(cohort.entries.len(), 1);
        assert_eq!(cohort.entries[0].weekly_points, Decimal::from(3));
        assert_eq!(cohort.entries[0].balance, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_unknown_and_negative_accounts_are_excluded() {
        let mock = base_mock()
            .with_points("w1", "a", "swap", "1")
            .with_points("w1", "ghost", "swap", "1")
            .with_points("w1", "neg", "swap", "1")
            .with_unknown_account("ghost")
            .with_balance("a", 0, "100")
            .with_balance("neg", 0, "-5");

        let cohort = assembler(mock).assemble(&week()).await.unwrap();
        assert_eq!(cohort.report.excluded_accounts, 2);
        let accounts: Vec<_> = cohort.entries.iter().map(|e| e.account_id.as_str()).collect();
        assert_eq!(accounts, vec!["a"]);
        let trading = &cohort.category_points[&CategoryId::new("trading")];
        assert_eq!(trading.len(), 1);
    }

    #[tokio::test]
    async fn test_overflowing_balance_excludes_account() {
        let mock = base_mock()
            .with_points("w1", "a", "swap", "1")
            .with_points("w1", "whale", "swap", "1")
            .with_balance("a", 0, "100")
            .with_balance("whale", 0, "10000000000000000000000000");

        let cohort = assembler(mock).assemble(&week()).await.unwrap();
        assert_eq!(cohort.report.excluded_accounts, 1);
        let accounts: Vec<_> = cohort.entries.iter().map(|e| e.account_id.as_str()).collect();
        assert_eq!(accounts, vec!["a"]);
    }

    #[tokio::test]
    async fn test_account_without_history_has_zero_balance() {
        let mock = base_mock().with_points("w1", "a", "swap", "5");
        let cohort = assembler(mock).assemble(&week()).await.unwrap();
        assert_eq!(cohort.entries[0].balance, Decimal::zero());
    }

    #[tokio::test]
    async fn test_unavailable_source_is_fatal() {
        let mock = base_mock().with_points("w1", "a", "swap", "5");
        mock.set_unavailable(Some("ledger down"));
        let err = assembler(mock).assemble(&week()).await.unwrap_err();
        assert!(matches!(err, EngineError::StorageUnavailable(_)));
    }
}
