//! In-memory data source for tests and local runs.

use super::{
    clip_to_period, BalanceHistorySource, PointsSource, RawBalanceRow, RawPointsRow, SourceError,
};
use crate::domain::{AccountId, ActivityId, CategoryId, SeasonId, TimeMs, Week, WeekId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct MockData {
    weeks: Vec<Week>,
    activities: HashMap<ActivityId, CategoryId>,
    points: HashMap<WeekId, Vec<RawPointsRow>>,
    balances: HashMap<AccountId, Vec<RawBalanceRow>>,
    unknown_accounts: HashSet<AccountId>,
    unavailable: Option<String>,
}

/// Returned by [`MockDataSource::hold_cohort_fetch`].
///
/// The next `fetch_cohort` call snapshots its rows, signals `entered`, then
/// waits for `release` (or for the sender to be dropped).
#[derive(Debug)]
pub struct CohortFetchHold {
    pub entered: oneshot::Receiver<()>,
    pub release: oneshot::Sender<()>,
}

#[derive(Debug)]
struct PendingHold {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Mock data source that serves predefined rows.
///
/// Builder methods configure it up front; the `set_*` methods mutate it
/// through a shared reference so tests can change "upstream" data between runs.
#[derive(Debug, Default)]
pub struct MockDataSource {
    data: RwLock<MockData>,
    hold: Mutex<Option<PendingHold>>,
}

impl MockDataSource {
    /// Create a new mock data source with empty data.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_week(self, week: Week) -> Self {
        self.data.write().weeks.push(week);
        self
    }

    pub fn with_activity(self, activity: &str, category: &str) -> Self {
        self.data
            .write()
            .activities
            .insert(ActivityId::new(activity), CategoryId::new(category));
        self
    }

    pub fn with_points(self, week: &str, account: &str, activity: &str, points: &str) -> Self {
        self.push_points(week, RawPointsRow::new(account, activity, points));
        self
    }

    pub fn with_balance(self, account: &str, time_ms: i64, balance: &str) -> Self {
        self.push_balance(account, RawBalanceRow::new(time_ms, balance));
        self
    }

    pub fn with_unknown_account(self, account: &str) -> Self {
        self.data
            .write()
            .unknown_accounts
            .insert(AccountId::new(account));
        self
    }

    /// Replace all points rows of `week`.
    pub fn set_points(&self, week: &str, rows: Vec<RawPointsRow>) {
        self.data.write().points.insert(WeekId::new(week), rows);
    }

    pub fn push_points(&self, week: &str, row: RawPointsRow) {
        self.data
            .write()
            .points
            .entry(WeekId::new(week))
            .or_default()
            .push(row);
    }

    pub fn push_balance(&self, account: &str, row: RawBalanceRow) {
        self.data
            .write()
            .balances
            .entry(AccountId::new(account))
            .or_default()
            .push(row);
    }

    /// Make every call fail with `SourceError::Unavailable` until cleared with `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.data.write().unavailable = reason.map(str::to_string);
    }

    /// Pause the next `fetch_cohort` call until the returned hold is released.
    pub fn hold_cohort_fetch(&self) -> CohortFetchHold {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.hold.lock() = Some(PendingHold {
            entered: entered_tx,
            release: release_rx,
        });
        CohortFetchHold {
            entered: entered_rx,
            release: release_tx,
        }
    }

    fn check_available(&self) -> Result<(), SourceError> {
        match &self.data.read().unavailable {
            Some(reason) => Err(SourceError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PointsSource for MockDataSource {
    async fn list_weeks(&self, season: Option<&SeasonId>) -> Result<Vec<Week>, SourceError> {
        self.check_available()?;
        let mut weeks: Vec<Week> = self
            .data
            .read()
            .weeks
            .iter()
            .filter(|w| season.map_or(true, |s| &w.season_id == s))
            .cloned()
            .collect();
        weeks.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(weeks)
    }

    async fn get_week(&self, week_id: &WeekId) -> Result<Option<Week>, SourceError> {
        self.check_available()?;
        Ok(self
            .data
            .read()
            .weeks
            .iter()
            .find(|w| &w.id == week_id)
            .cloned())
    }

    async fn fetch_activity_categories(
        &self,
    ) -> Result<HashMap<ActivityId, CategoryId>, SourceError> {
        self.check_available()?;
        Ok(self.data.read().activities.clone())
    }

    async fn fetch_cohort(&self, week: &Week) -> Result<Vec<RawPointsRow>, SourceError> {
        self.check_available()?;
        let rows = self
            .data
            .read()
            .points
            .get(&week.id)
            .cloned()
            .unwrap_or_default();

        let pending = self.hold.lock().take();
        if let Some(pending) = pending {
            let _ = pending.entered.send(());
            let _ = pending.release.await;
        }

        Ok(rows)
    }
}

#[async_trait]
impl BalanceHistorySource for MockDataSource {
    async fn fetch_balance_events(
        &self,
        account: &AccountId,
        period_start: TimeMs,
        period_end: TimeMs,
    ) -> Result<Vec<RawBalanceRow>, SourceError> {
        self.check_available()?;
        let data = self.data.read();
        if data.unknown_accounts.contains(account) {
            return Err(SourceError::UnknownAccount(account.to_string()));
        }
        Ok(data
            .balances
            .get(account)
            .map(|rows| clip_to_period(rows, period_start, period_end))
            .unwrap_or_default())
    }
}
