//! Leaderboard cache: per-partition population runs and snapshot reads.
//!
//! A partition is either a season aggregate or one week (with all of its
//! category slices). Each partition moves Stale → Populating → Fresh:
//! - a run starts by claiming the partition's next version in storage, so
//!   the claim holds across processes sharing the database;
//! - a non-forced request while Populating is a no-op;
//! - a forced request claims a newer version, and an older run that finishes
//!   afterwards is discarded;
//! - commits are serialized per partition and replace it in one transaction
//!   that only succeeds for the latest claim, then swap the in-memory snapshot.
//!
//! Reads only touch the current snapshot and never wait on a run.

use super::cohort::{CohortAssembler, WeekCohort};
use super::snapshot::PartitionSnapshot;
use crate::config::Config;
use crate::datasource::{BalanceHistorySource, PointsSource};
use crate::db::Repository;
use crate::domain::{
    AccountId, AccountStanding, Decimal, LeaderboardEntry, LeaderboardScope, PartitionKey,
    ScopeBoard, ScopeState, ScopeStats, SeasonId, TimeMs, Week, WeekId,
};
use crate::engine::{rank_scope, scope_stats, standing, PointsApplier};
use crate::error::EngineError;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateOptions {
    /// Supersede any in-flight run for the same partition.
    pub force: bool,
}

impl PopulateOptions {
    pub fn force() -> Self {
        Self { force: true }
    }
}

/// What happened to one partition during a populate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PartitionOutcome {
    Populated,
    /// Another run held the partition and the request was not forced.
    AlreadyPopulating,
    /// A newer run claimed the partition before this one committed.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionReport {
    pub partition: String,
    pub outcome: PartitionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub scopes_written: usize,
    pub rows_written: usize,
    pub rows_skipped: usize,
    pub accounts_excluded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl PartitionReport {
    fn unwritten(key: &PartitionKey, outcome: PartitionOutcome, version: Option<u64>) -> Self {
        Self {
            partition: key.to_string(),
            outcome,
            version,
            scopes_written: 0,
            rows_written: 0,
            rows_skipped: 0,
            accounts_excluded: 0,
            digest: None,
        }
    }
}

/// Totals across every partition touched by one populate call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulateSummary {
    pub run_id: String,
    pub partitions_processed: usize,
    pub scopes_written: usize,
    pub rows_written: usize,
    pub rows_skipped: usize,
    pub accounts_excluded: usize,
    pub superseded: usize,
    pub already_populating: usize,
    pub partitions: Vec<PartitionReport>,
}

impl PopulateSummary {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            partitions_processed: 0,
            scopes_written: 0,
            rows_written: 0,
            rows_skipped: 0,
            accounts_excluded: 0,
            superseded: 0,
            already_populating: 0,
            partitions: Vec::new(),
        }
    }

    fn record(&mut self, report: PartitionReport) {
        match report.outcome {
            PartitionOutcome::Populated => self.partitions_processed += 1,
            PartitionOutcome::AlreadyPopulating => self.already_populating += 1,
            PartitionOutcome::Superseded => self.superseded += 1,
        }
        self.scopes_written += report.scopes_written;
        self.rows_written += report.rows_written;
        self.rows_skipped += report.rows_skipped;
        self.accounts_excluded += report.accounts_excluded;
        self.partitions.push(report);
    }

    /// Report for one partition, by its display key.
    pub fn partition(&self, key: &PartitionKey) -> Option<&PartitionReport> {
        let key = key.to_string();
        self.partitions.iter().find(|p| p.partition == key)
    }
}

#[derive(Debug, Default)]
struct PartitionSlot {
    latest_version: u64,
    populating: bool,
}

/// A claimed run. Dropping it clears the in-process populating flag if no
/// newer run has claimed the partition since; the stored claim is released
/// by the commit or by `release`.
struct PartitionClaim<'a> {
    cache: &'a LeaderboardCache,
    key: PartitionKey,
    version: u64,
}

impl PartitionClaim<'_> {
    fn is_current(&self) -> bool {
        self.cache
            .slots
            .lock()
            .get(&self.key)
            .map_or(false, |slot| slot.latest_version == self.version)
    }
}

impl Drop for PartitionClaim<'_> {
    fn drop(&mut self) {
        let mut slots = self.cache.slots.lock();
        if let Some(slot) = slots.get_mut(&self.key) {
            if slot.latest_version == self.version {
                slot.populating = false;
            }
        }
    }
}

/// Materialized leaderboards, populated from the points/balance collaborators
/// and persisted through the repository.
pub struct LeaderboardCache {
    repo: Arc<Repository>,
    points: Arc<dyn PointsSource>,
    assembler: CohortAssembler,
    applier: PointsApplier,
    populate_concurrency: usize,
    claim_timeout_ms: i64,
    slots: Mutex<HashMap<PartitionKey, PartitionSlot>>,
    writers: Mutex<HashMap<PartitionKey, Arc<tokio::sync::Mutex<()>>>>,
    snapshots: RwLock<HashMap<PartitionKey, Arc<PartitionSnapshot>>>,
}

impl std::fmt::Debug for LeaderboardCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderboardCache")
            .field("populate_concurrency", &self.populate_concurrency)
            .finish_non_exhaustive()
    }
}

impl LeaderboardCache {
    pub fn new(
        repo: Arc<Repository>,
        points: Arc<dyn PointsSource>,
        balances: Arc<dyn BalanceHistorySource>,
        config: &Config,
    ) -> Self {
        Self {
            repo,
            assembler: CohortAssembler::new(
                points.clone(),
                balances,
                config.balance_fetch_concurrency,
            ),
            points,
            applier: PointsApplier::new(config.min_eligible_balance),
            populate_concurrency: config.populate_concurrency.max(1),
            claim_timeout_ms: i64::try_from(config.claim_timeout_secs.saturating_mul(1000))
                .unwrap_or(i64::MAX),
            slots: Mutex::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Population
    // =========================================================================

    /// Populate the partition(s) behind `scope`.
    ///
    /// A week or category scope repopulates its week and then the week's
    /// season; a season scope repopulates every week of the season and then
    /// the season aggregate.
    ///
    /// # Errors
    /// Fatal errors (storage unavailable, unknown week) are returned after
    /// every started partition run has finished; the affected partitions keep
    /// their previous materialization.
    pub async fn populate(
        &self,
        scope: &LeaderboardScope,
        options: PopulateOptions,
    ) -> Result<PopulateSummary, EngineError> {
        match &scope.week_id {
            Some(week_id) => {
                let week = self.find_week(week_id).await?;
                if week.season_id != scope.season_id {
                    return Err(EngineError::NotFound(format!(
                        "week {} in season {}",
                        week_id, scope.season_id
                    )));
                }
                self.populate_weeks(vec![week], options).await
            }
            None => self.populate_season(&scope.season_id, options).await,
        }
    }

    /// Recompute one week (all categories) and its season.
    pub async fn populate_week(
        &self,
        week_id: &WeekId,
        options: PopulateOptions,
    ) -> Result<PopulateSummary, EngineError> {
        let week = self.find_week(week_id).await?;
        self.populate_weeks(vec![week], options).await
    }

    /// Recompute every week of a season, then the season aggregate.
    pub async fn populate_season(
        &self,
        season: &SeasonId,
        options: PopulateOptions,
    ) -> Result<PopulateSummary, EngineError> {
        let weeks = self.points.list_weeks(Some(season)).await?;
        if weeks.is_empty() {
            // Still refresh the aggregate so it exists (empty) for readers.
            let run_id = Uuid::new_v4().to_string();
            let mut summary = PopulateSummary::new(run_id.clone());
            summary.record(self.run_season(season, options.force, &run_id).await?);
            return Ok(summary);
        }
        self.populate_weeks(weeks, options).await
    }

    /// Recompute every week of every season, then every season aggregate.
    pub async fn populate_all(&self, options: PopulateOptions) -> Result<PopulateSummary, EngineError> {
        let weeks = self.points.list_weeks(None).await?;
        self.populate_weeks(weeks, options).await
    }

    async fn find_week(&self, week_id: &WeekId) -> Result<Week, EngineError> {
        self.points
            .get_week(week_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("week {}", week_id)))
    }

    async fn populate_weeks(
        &self,
        weeks: Vec<Week>,
        options: PopulateOptions,
    ) -> Result<PopulateSummary, EngineError> {
        let run_id = Uuid::new_v4().to_string();
        let seasons: BTreeSet<SeasonId> = weeks.iter().map(|w| w.season_id.clone()).collect();
        info!(
            run_id = %run_id,
            weeks = weeks.len(),
            seasons = seasons.len(),
            force = options.force,
            "Population run started"
        );

        let mut summary = PopulateSummary::new(run_id.clone());

        let runs: Vec<_> = weeks
            .iter()
            .map(|week| self.run_week(week, options.force, &run_id))
            .collect();
        let week_results: Vec<Result<PartitionReport, EngineError>> = stream::iter(runs)
            .buffer_unordered(self.populate_concurrency)
            .collect()
            .await;
        let mut first_error = None;
        for result in week_results {
            match result {
                Ok(report) => summary.record(report),
                Err(err) => {
                    warn!(run_id = %run_id, error = %err, "Week partition failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        for season in &seasons {
            summary.record(self.run_season(season, options.force, &run_id).await?);
        }

        info!(
            run_id = %run_id,
            partitions = summary.partitions_processed,
            rows_written = summary.rows_written,
            rows_skipped = summary.rows_skipped,
            accounts_excluded = summary.accounts_excluded,
            superseded = summary.superseded,
            already_populating = summary.already_populating,
            "Population run finished"
        );
        Ok(summary)
    }

    async fn claim(
        &self,
        key: &PartitionKey,
        force: bool,
        run_id: &str,
    ) -> Result<Option<PartitionClaim<'_>>, EngineError> {
        let stale_before = TimeMs::now().as_ms().saturating_sub(self.claim_timeout_ms);
        let Some(version) = self
            .repo
            .claim_partition(key, run_id, force, stale_before)
            .await?
        else {
            return Ok(None);
        };
        let version = version as u64;

        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        if version >= slot.latest_version {
            slot.latest_version = version;
            slot.populating = true;
        }
        Ok(Some(PartitionClaim {
            cache: self,
            key: key.clone(),
            version,
        }))
    }

    /// Hand a failed run's stored claim back so later requests are not blocked.
    async fn release(&self, claim: &PartitionClaim<'_>) {
        if let Err(e) = self
            .repo
            .release_partition_claim(&claim.key, claim.version as i64)
            .await
        {
            warn!(partition = %claim.key, version = claim.version, error = %e, "Failed to release claim");
        }
    }

    fn writer(&self, key: &PartitionKey) -> Arc<tokio::sync::Mutex<()>> {
        self.writers.lock().entry(key.clone()).or_default().clone()
    }

    async fn run_week(
        &self,
        week: &Week,
        force: bool,
        run_id: &str,
    ) -> Result<PartitionReport, EngineError> {
        let key = PartitionKey::week(week.season_id.clone(), week.id.clone());
        let Some(claim) = self.claim(&key, force, run_id).await? else {
            debug!(partition = %key, "Partition already populating, skipping");
            return Ok(PartitionReport::unwritten(&key, PartitionOutcome::AlreadyPopulating, None));
        };
        info!(partition = %key, version = claim.version, run_id = %run_id, "Populating week");

        let result = self.populate_claimed_week(&claim, week, run_id).await;
        if result.is_err() {
            self.release(&claim).await;
        }
        result
    }

    async fn populate_claimed_week(
        &self,
        claim: &PartitionClaim<'_>,
        week: &Week,
        run_id: &str,
    ) -> Result<PartitionReport, EngineError> {
        let cohort = self.assembler.assemble(week).await?;
        if !claim.is_current() {
            return Ok(superseded(claim));
        }

        let scopes = self.build_week_scopes(&claim.key, &cohort);
        let rows_skipped = cohort.report.malformed_rows + cohort.report.unresolved_activities;
        self.commit(claim, run_id, scopes, rows_skipped, cohort.report.excluded_accounts)
            .await
    }

    async fn run_season(
        &self,
        season: &SeasonId,
        force: bool,
        run_id: &str,
    ) -> Result<PartitionReport, EngineError> {
        let key = PartitionKey::season(season.clone());
        let Some(claim) = self.claim(&key, force, run_id).await? else {
            debug!(partition = %key, "Partition already populating, skipping");
            return Ok(PartitionReport::unwritten(&key, PartitionOutcome::AlreadyPopulating, None));
        };
        info!(partition = %key, version = claim.version, run_id = %run_id, "Populating season");

        let result = self.populate_claimed_season(&claim, season, run_id).await;
        if result.is_err() {
            self.release(&claim).await;
        }
        result
    }

    async fn populate_claimed_season(
        &self,
        claim: &PartitionClaim<'_>,
        season: &SeasonId,
        run_id: &str,
    ) -> Result<PartitionReport, EngineError> {
        let totals = self.repo.load_season_totals(season).await?;
        if !claim.is_current() {
            return Ok(superseded(claim));
        }

        let root = claim.key.root_scope();
        let mut scopes = BTreeMap::new();
        scopes.insert(root.clone(), board(&root, totals.totals));
        self.commit(claim, run_id, scopes, totals.skipped_rows, 0).await
    }

    /// Week total (multiplier-adjusted) plus one scope per category, each
    /// category's raw points scaled by the account's week multiplier.
    fn build_week_scopes(
        &self,
        key: &PartitionKey,
        cohort: &WeekCohort,
    ) -> BTreeMap<LeaderboardScope, ScopeBoard> {
        let adjusted = self.applier.apply(&cohort.entries);
        let multipliers: HashMap<&AccountId, Decimal> = adjusted
            .iter()
            .map(|a| (&a.entry.account_id, a.effective_multiplier()))
            .collect();

        let mut scopes = BTreeMap::new();
        let root = key.root_scope();
        let week_totals = adjusted
            .iter()
            .map(|a| (a.entry.account_id.clone(), a.calculated_points));
        scopes.insert(root.clone(), board(&root, week_totals));

        for (category, per_account) in &cohort.category_points {
            let scope = LeaderboardScope::category(
                cohort.week.season_id.clone(),
                cohort.week.id.clone(),
                category.clone(),
            );
            let totals = per_account.iter().map(|(account, points)| {
                let multiplier = multipliers.get(account).copied().unwrap_or_else(Decimal::one);
                (account.clone(), *points * multiplier)
            });
            scopes.insert(scope.clone(), board(&scope, totals));
        }
        scopes
    }

    async fn commit(
        &self,
        claim: &PartitionClaim<'_>,
        run_id: &str,
        scopes: BTreeMap<LeaderboardScope, ScopeBoard>,
        rows_skipped: usize,
        accounts_excluded: usize,
    ) -> Result<PartitionReport, EngineError> {
        let writer = self.writer(&claim.key);
        let _guard = writer.lock().await;

        if !claim.is_current() {
            return Ok(superseded(claim));
        }

        let snapshot = PartitionSnapshot::new(
            claim.key.clone(),
            claim.version,
            run_id.to_string(),
            scopes,
        );
        let written = self
            .repo
            .replace_partition(
                &claim.key,
                claim.version as i64,
                &snapshot.scopes,
                run_id,
                &snapshot.digest,
            )
            .await
            .map_err(|e| {
                warn!(partition = %claim.key, error = %e, "Partition replacement failed");
                EngineError::from(e)
            })?;
        // Another process claimed a newer version after this run started.
        let Some(rows_written) = written else {
            return Ok(superseded(claim));
        };

        let report = PartitionReport {
            partition: claim.key.to_string(),
            outcome: PartitionOutcome::Populated,
            version: Some(claim.version),
            scopes_written: snapshot.scopes.len(),
            rows_written,
            rows_skipped,
            accounts_excluded,
            digest: Some(snapshot.digest.clone()),
        };
        self.snapshots
            .write()
            .insert(claim.key.clone(), Arc::new(snapshot));

        info!(
            partition = %claim.key,
            version = claim.version,
            scopes = report.scopes_written,
            rows_written,
            rows_skipped,
            "Partition committed"
        );
        Ok(report)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Last committed snapshot of a partition, loading it from storage on first use.
    async fn snapshot(&self, key: &PartitionKey) -> Result<Arc<PartitionSnapshot>, EngineError> {
        let cached = self.snapshots.read().get(key).cloned();
        if let Some(snapshot) = cached {
            return Ok(snapshot);
        }

        let loaded = self
            .repo
            .load_partition(key)
            .await?
            .ok_or_else(|| EngineError::NotMaterialized(key.to_string()))?;
        if loaded.skipped_rows > 0 {
            warn!(partition = %key, skipped = loaded.skipped_rows, "Skipped malformed cached rows");
        }
        let snapshot = Arc::new(PartitionSnapshot::from_loaded(key.clone(), loaded));

        // A run may have committed while we were loading; keep the newer one.
        let mut snapshots = self.snapshots.write();
        Ok(snapshots.entry(key.clone()).or_insert(snapshot).clone())
    }

    /// Ranked rows of `scope`, rank ascending.
    ///
    /// Serves the last committed materialization even while a run is in
    /// progress. A category with no activity in a materialized week is empty.
    ///
    /// # Errors
    /// `NotMaterialized` if no run ever succeeded for the scope's partition;
    /// `StorageUnavailable` if it has to be loaded and storage fails.
    pub async fn get_leaderboard(
        &self,
        scope: &LeaderboardScope,
    ) -> Result<Vec<LeaderboardEntry>, EngineError> {
        let snapshot = self.snapshot(&scope.partition()).await?;
        Ok(snapshot
            .board(scope)
            .map(|b| b.entries.clone())
            .unwrap_or_default())
    }

    pub async fn get_stats(&self, scope: &LeaderboardScope) -> Result<ScopeStats, EngineError> {
        let snapshot = self.snapshot(&scope.partition()).await?;
        Ok(snapshot
            .board(scope)
            .map(|b| b.stats.clone())
            .unwrap_or_else(ScopeStats::empty))
    }

    /// Rank, points and top-percentile of one account; `None` if it is not ranked.
    pub async fn get_standing(
        &self,
        scope: &LeaderboardScope,
        account: &AccountId,
    ) -> Result<Option<AccountStanding>, EngineError> {
        let snapshot = self.snapshot(&scope.partition()).await?;
        Ok(snapshot
            .board(scope)
            .and_then(|b| standing(&b.entries, account)))
    }

    /// Digest of the partition's current snapshot, if one is loaded.
    pub fn digest(&self, scope: &LeaderboardScope) -> Option<String> {
        self.snapshots
            .read()
            .get(&scope.partition())
            .map(|s| s.digest.clone())
    }

    /// Population state of the scope's partition as seen by this process.
    pub fn state(&self, scope: &LeaderboardScope) -> ScopeState {
        let key = scope.partition();
        let populating = self
            .slots
            .lock()
            .get(&key)
            .map_or(false, |slot| slot.populating);
        if populating {
            ScopeState::Populating
        } else if self.snapshots.read().contains_key(&key) {
            ScopeState::Fresh
        } else {
            ScopeState::Stale
        }
    }
}

fn superseded(claim: &PartitionClaim<'_>) -> PartitionReport {
    debug!(partition = %claim.key, version = claim.version, "Run superseded before commit");
    PartitionReport::unwritten(&claim.key, PartitionOutcome::Superseded, Some(claim.version))
}

fn board(
    scope: &LeaderboardScope,
    totals: impl IntoIterator<Item = (AccountId, Decimal)>,
) -> ScopeBoard {
    let entries = rank_scope(scope, totals);
    let stats = scope_stats(&entries);
    ScopeBoard { entries, stats }
}
