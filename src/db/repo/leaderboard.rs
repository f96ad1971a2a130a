//! Leaderboard partition persistence: whole-partition replacement and loading.

use super::Repository;
use crate::domain::{
    AccountId, CategoryId, Decimal, LeaderboardEntry, LeaderboardScope, PartitionKey, ScopeBoard,
    ScopeStats, SeasonId, TimeMs,
};
use crate::engine::{rank_scope, scope_stats};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Ledger row of the last committed run for a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRun {
    /// Incremented on every replacement of the partition.
    pub generation: i64,
    pub run_id: String,
    pub digest: String,
    pub populated_at: i64,
}

/// A partition read back from storage.
#[derive(Debug, Clone)]
pub struct LoadedPartition {
    pub run: PartitionRun,
    pub scopes: BTreeMap<LeaderboardScope, ScopeBoard>,
    /// Stored rows that failed decoding and were left out.
    pub skipped_rows: usize,
}

/// Per-account sums of a season's materialized week totals.
#[derive(Debug, Clone, Default)]
pub struct SeasonTotals {
    pub totals: BTreeMap<AccountId, Decimal>,
    pub skipped_rows: usize,
}

/// `''` stands in for an absent week or category.
fn key_part<T: AsRef<str>>(value: Option<&T>) -> &str {
    value.map_or("", |v| v.as_ref())
}

fn category_from_column(value: String) -> Option<CategoryId> {
    if value.is_empty() {
        None
    } else {
        Some(CategoryId::new(value))
    }
}

async fn partition_run(
    conn: &mut SqliteConnection,
    key: &PartitionKey,
) -> Result<Option<PartitionRun>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT generation, run_id, digest, populated_at
        FROM leaderboard_runs
        WHERE season_id = ? AND week_id = ?
        "#,
    )
    .bind(key.season_id.as_str())
    .bind(key_part(key.week_id.as_ref()))
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| PartitionRun {
        generation: row.get("generation"),
        run_id: row.get("run_id"),
        digest: row.get("digest"),
        populated_at: row.get("populated_at"),
    }))
}

impl Repository {
    /// Claim the next run version of a partition.
    ///
    /// Succeeds when the partition is idle, when `force` is set, or when the
    /// current holder claimed it before `stale_before_ms`. Returns `None` if
    /// another run holds the claim.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn claim_partition(
        &self,
        key: &PartitionKey,
        run_id: &str,
        force: bool,
        stale_before_ms: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO leaderboard_claims
                (season_id, week_id, claimed_version, populating, run_id, claimed_at)
            VALUES (?, ?, 1, 1, ?, ?)
            ON CONFLICT(season_id, week_id) DO UPDATE SET
                claimed_version = leaderboard_claims.claimed_version + 1,
                populating = 1,
                run_id = excluded.run_id,
                claimed_at = excluded.claimed_at
            WHERE leaderboard_claims.populating = 0
                OR ?
                OR leaderboard_claims.claimed_at < ?
            RETURNING claimed_version
            "#,
        )
        .bind(key.season_id.as_str())
        .bind(key_part(key.week_id.as_ref()))
        .bind(run_id)
        .bind(TimeMs::now().as_ms())
        .bind(force)
        .bind(stale_before_ms)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get("claimed_version")))
    }

    /// Release a claim without committing. No-op if a newer run holds it.
    pub async fn release_partition_claim(
        &self,
        key: &PartitionKey,
        version: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE leaderboard_claims SET populating = 0
            WHERE season_id = ? AND week_id = ? AND claimed_version = ?
            "#,
        )
        .bind(key.season_id.as_str())
        .bind(key_part(key.week_id.as_ref()))
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically replace every scope of a partition on behalf of the run
    /// holding claim `version`.
    ///
    /// Releases the claim, deletes all entries and stats of the partition
    /// (week total and all its categories), inserts `scopes`, and bumps the
    /// partition's run generation, all in one transaction. Returns the number
    /// of entry rows written, or `None` without writing anything if a newer
    /// run has claimed the partition since.
    ///
    /// # Errors
    /// Returns an error if any statement fails; the partition is left untouched.
    pub async fn replace_partition(
        &self,
        key: &PartitionKey,
        version: i64,
        scopes: &BTreeMap<LeaderboardScope, ScopeBoard>,
        run_id: &str,
        digest: &str,
    ) -> Result<Option<usize>, sqlx::Error> {
        let season = key.season_id.as_str();
        let week = key_part(key.week_id.as_ref());
        let mut tx = self.pool.begin().await?;

        let released = sqlx::query(
            r#"
            UPDATE leaderboard_claims SET populating = 0
            WHERE season_id = ? AND week_id = ? AND claimed_version = ?
            "#,
        )
        .bind(season)
        .bind(week)
        .bind(version)
        .execute(&mut *tx)
        .await?;
        if released.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query("DELETE FROM leaderboard_entries WHERE season_id = ? AND week_id = ?")
            .bind(season)
            .bind(week)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM leaderboard_stats WHERE season_id = ? AND week_id = ?")
            .bind(season)
            .bind(week)
            .execute(&mut *tx)
            .await?;

        let mut rows_written = 0usize;
        for (scope, board) in scopes {
            let category = key_part(scope.category_id.as_ref());

            for entry in &board.entries {
                sqlx::query(
                    r#"
                    INSERT INTO leaderboard_entries
                        (season_id, week_id, category_id, account_id, points, rank)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(season)
                .bind(week)
                .bind(category)
                .bind(entry.account_id.as_str())
                .bind(entry.points.to_canonical_string())
                .bind(entry.rank as i64)
                .execute(&mut *tx)
                .await?;
                rows_written += 1;
            }

            sqlx::query(
                r#"
                INSERT INTO leaderboard_stats
                    (season_id, week_id, category_id, total_accounts, median, average)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(season)
            .bind(week)
            .bind(category)
            .bind(board.stats.total_accounts as i64)
            .bind(board.stats.median.to_canonical_string())
            .bind(board.stats.average.to_canonical_string())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO leaderboard_runs (season_id, week_id, generation, run_id, digest, populated_at)
            VALUES (?, ?, 1, ?, ?, ?)
            ON CONFLICT(season_id, week_id) DO UPDATE SET
                generation = leaderboard_runs.generation + 1,
                run_id = excluded.run_id,
                digest = excluded.digest,
                populated_at = excluded.populated_at
            "#,
        )
        .bind(season)
        .bind(week)
        .bind(run_id)
        .bind(digest)
        .bind(TimeMs::now().as_ms())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(rows_written))
    }

    /// Run ledger row for a partition, if it was ever materialized.
    pub async fn get_partition_run(
        &self,
        key: &PartitionKey,
    ) -> Result<Option<PartitionRun>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        partition_run(&mut *conn, key).await
    }

    /// Load a materialized partition. `None` if no run ever committed.
    ///
    /// The run row, stats and entries are read in one transaction, so they
    /// always come from the same committed generation. Entry rows with
    /// undecodable points are skipped and counted; a scope that lost rows is
    /// re-ranked and its stats recomputed, as is a scope whose stats row
    /// fails decoding.
    pub async fn load_partition(
        &self,
        key: &PartitionKey,
    ) -> Result<Option<LoadedPartition>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let Some(run) = partition_run(&mut *tx, key).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        let season = key.season_id.as_str();
        let week = key_part(key.week_id.as_ref());
        let scope_for = |category: String| LeaderboardScope {
            season_id: key.season_id.clone(),
            week_id: key.week_id.clone(),
            category_id: category_from_column(category),
        };

        let mut skipped_rows = 0usize;
        let mut entries: BTreeMap<LeaderboardScope, Vec<LeaderboardEntry>> = BTreeMap::new();
        let mut stats: BTreeMap<LeaderboardScope, Option<ScopeStats>> = BTreeMap::new();
        let mut damaged: BTreeSet<LeaderboardScope> = BTreeSet::new();

        let stat_rows = sqlx::query(
            r#"
            SELECT category_id, total_accounts, median, average
            FROM leaderboard_stats
            WHERE season_id = ? AND week_id = ?
            "#,
        )
        .bind(season)
        .bind(week)
        .fetch_all(&mut *tx)
        .await?;

        let entry_rows = sqlx::query(
            r#"
            SELECT category_id, account_id, points, rank
            FROM leaderboard_entries
            WHERE season_id = ? AND week_id = ?
            ORDER BY category_id ASC, rank ASC
            "#,
        )
        .bind(season)
        .bind(week)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        for row in stat_rows {
            let scope = scope_for(row.get("category_id"));
            let median: String = row.get("median");
            let average: String = row.get("average");
            let decoded = match (
                Decimal::from_str_canonical(&median),
                Decimal::from_str_canonical(&average),
            ) {
                (Ok(median), Ok(average)) => Some(ScopeStats {
                    total_accounts: row.get::<i64, _>("total_accounts") as u32,
                    median,
                    average,
                }),
                _ => {
                    warn!(scope = %scope, "Malformed stats row, recomputing from entries");
                    skipped_rows += 1;
                    None
                }
            };
            stats.insert(scope, decoded);
        }

        for row in entry_rows {
            let scope = scope_for(row.get("category_id"));
            let account_id: String = row.get("account_id");
            let raw_points: String = row.get("points");
            match Decimal::from_str_canonical(&raw_points) {
                Ok(points) => entries.entry(scope.clone()).or_default().push(LeaderboardEntry {
                    scope,
                    account_id: AccountId::new(account_id),
                    points,
                    rank: row.get::<i64, _>("rank") as u32,
                }),
                Err(e) => {
                    warn!(
                        scope = %scope,
                        account = %account_id,
                        error = %e,
                        "Skipping malformed leaderboard row"
                    );
                    skipped_rows += 1;
                    damaged.insert(scope);
                }
            }
        }

        let all_scopes: BTreeSet<LeaderboardScope> = stats
            .keys()
            .chain(entries.keys())
            .chain(damaged.iter())
            .cloned()
            .collect();
        let mut scopes = BTreeMap::new();
        for scope in all_scopes {
            let mut scope_entries = entries.remove(&scope).unwrap_or_default();
            let stored_stats = stats.remove(&scope).flatten();
            let board_stats = if damaged.contains(&scope) {
                scope_entries = rank_scope(
                    &scope,
                    scope_entries.into_iter().map(|e| (e.account_id, e.points)),
                );
                scope_stats(&scope_entries)
            } else {
                match stored_stats {
                    Some(stored) => stored,
                    None => scope_stats(&scope_entries),
                }
            };
            scopes.insert(
                scope,
                ScopeBoard {
                    entries: scope_entries,
                    stats: board_stats,
                },
            );
        }

        Ok(Some(LoadedPartition {
            run,
            scopes,
            skipped_rows,
        }))
    }

    /// Sum each account's materialized week totals across a season.
    ///
    /// Only week-level rows count; category slices are ignored.
    pub async fn load_season_totals(&self, season: &SeasonId) -> Result<SeasonTotals, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT week_id, account_id, points
            FROM leaderboard_entries
            WHERE season_id = ? AND week_id <> '' AND category_id = ''
            ORDER BY week_id ASC, account_id ASC
            "#,
        )
        .bind(season.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = SeasonTotals::default();
        for row in rows {
            let week: String = row.get("week_id");
            let account: String = row.get("account_id");
            let raw_points: String = row.get("points");
            match Decimal::from_str_canonical(&raw_points) {
                Ok(points) => {
                    *out.totals
                        .entry(AccountId::new(account))
                        .or_insert_with(Decimal::zero) += points;
                }
                Err(e) => {
                    warn!(
                        season = %season,
                        week = %week,
                        account = %account,
                        error = %e,
                        "Skipping malformed week total"
                    );
                    out.skipped_rows += 1;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::setup_test_db;
    use super::*;
    use crate::domain::WeekId;
    use crate::orchestration::partition_digest;

    fn board(scope: &LeaderboardScope, rows: &[(&str, i64)]) -> ScopeBoard {
        let entries = rank_scope(
            scope,
            rows.iter()
                .map(|(a, p)| (AccountId::new(*a), Decimal::from(*p))),
        );
        let stats = scope_stats(&entries);
        ScopeBoard { entries, stats }
    }

    async fn commit(
        repo: &Repository,
        key: &PartitionKey,
        scopes: &BTreeMap<LeaderboardScope, ScopeBoard>,
        run_id: &str,
        digest: &str,
    ) -> Result<usize, sqlx::Error> {
        let version = repo
            .claim_partition(key, run_id, false, 0)
            .await?
            .expect("partition already claimed");
        Ok(repo
            .replace_partition(key, version, scopes, run_id, digest)
            .await?
            .expect("claim superseded"))
    }

    fn week_key() -> PartitionKey {
        PartitionKey::week(SeasonId::new("s1"), WeekId::new("w1"))
    }

    fn week_scopes(rows: &[(&str, i64)]) -> BTreeMap<LeaderboardScope, ScopeBoard> {
        let key = week_key();
        let week_scope = key.root_scope();
        let cat_scope = LeaderboardScope::category(
            SeasonId::new("s1"),
            WeekId::new("w1"),
            CategoryId::new("trading"),
        );
        let mut scopes = BTreeMap::new();
        scopes.insert(week_scope.clone(), board(&week_scope, rows));
        scopes.insert(cat_scope.clone(), board(&cat_scope, &rows[..1]));
        scopes
    }

    #[tokio::test]
    async fn test_replace_and_load_partition() {
        let (repo, _temp) = setup_test_db().await;
        let scopes = week_scopes(&[("a", 10), ("b", 30)]);

        let written = commit(&repo, &week_key(), &scopes, "run-1", "abc")
            .await
            .unwrap();
        assert_eq!(written, 3);

        let loaded = repo.load_partition(&week_key()).await.unwrap().unwrap();
        assert_eq!(loaded.run.generation, 1);
        assert_eq!(loaded.run.digest, "abc");
        assert_eq!(loaded.skipped_rows, 0);
        assert_eq!(loaded.scopes, scopes);
    }

    #[tokio::test]
    async fn test_replace_drops_previous_rows_and_bumps_generation() {
        let (repo, _temp) = setup_test_db().await;
        commit(&repo, &week_key(), &week_scopes(&[("a", 10), ("b", 30)]), "run-1", "d1")
            .await
            .unwrap();

        let mut second = BTreeMap::new();
        let root = week_key().root_scope();
        second.insert(root.clone(), board(&root, &[("c", 5)]));
        commit(&repo, &week_key(), &second, "run-2", "d2")
            .await
            .unwrap();

        let loaded = repo.load_partition(&week_key()).await.unwrap().unwrap();
        assert_eq!(loaded.run.generation, 2);
        assert_eq!(loaded.run.run_id, "run-2");
        assert_eq!(loaded.scopes, second);
    }

    #[tokio::test]
    async fn test_load_never_materialized() {
        let (repo, _temp) = setup_test_db().await;
        assert!(repo.load_partition(&week_key()).await.unwrap().is_none());
        assert!(repo.get_partition_run(&week_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_skips_malformed_entry() {
        let (repo, _temp) = setup_test_db().await;
        commit(&repo, &week_key(), &week_scopes(&[("a", 10), ("b", 30)]), "run-1", "d")
            .await
            .unwrap();
        sqlx::query("UPDATE leaderboard_entries SET points = 'NaN?' WHERE account_id = 'b' AND category_id = ''")
            .execute(&repo.pool)
            .await
            .unwrap();

        let loaded = repo.load_partition(&week_key()).await.unwrap().unwrap();
        assert_eq!(loaded.skipped_rows, 1);
        let week = &loaded.scopes[&week_key().root_scope()];
        assert_eq!(week.entries.len(), 1);
        assert_eq!(week.entries[0].account_id, AccountId::new("a"));
    }

    #[tokio::test]
    async fn test_season_totals_sum_week_rows_only() {
        let (repo, _temp) = setup_test_db().await;
        commit(&repo, &week_key(), &week_scopes(&[("a", 10), ("b", 30)]), "r1", "d")
            .await
            .unwrap();

        let w2 = PartitionKey::week(SeasonId::new("s1"), WeekId::new("w2"));
        let mut scopes = BTreeMap::new();
        let root = w2.root_scope();
        scopes.insert(root.clone(), board(&root, &[("a", 5)]));
        commit(&repo, &w2, &scopes, "r2", "d").await.unwrap();

        let totals = repo.load_season_totals(&SeasonId::new("s1")).await.unwrap();
        assert_eq!(totals.skipped_rows, 0);
        assert_eq!(totals.totals[&AccountId::new("a")], Decimal::from(15));
        assert_eq!(totals.totals[&AccountId::new("b")], Decimal::from(30));

        let other = repo.load_season_totals(&SeasonId::new("s9")).await.unwrap();
        assert!(other.totals.is_empty());
    }

    #[tokio::test]
    async fn test_reload_reranks_scope_after_skipping_row() {
        let (repo, _temp) = setup_test_db().await;
        let root = week_key().root_scope();
        let mut scopes = BTreeMap::new();
        scopes.insert(root.clone(), board(&root, &[("a", 30), ("b", 20), ("c", 10)]));
        commit(&repo, &week_key(), &scopes, "run-1", "d").await.unwrap();
        sqlx::query("UPDATE leaderboard_entries SET points = '??' WHERE account_id = 'b'")
            .execute(&repo.pool)
            .await
            .unwrap();

        let loaded = repo.load_partition(&week_key()).await.unwrap().unwrap();
        let week = &loaded.scopes[&root];
        let ranks: Vec<(&str, u32)> = week
            .entries
            .iter()
            .map(|e| (e.account_id.as_str(), e.rank))
            .collect();
        assert_eq!(ranks, vec![("a", 1), ("c", 2)]);
        assert_eq!(week.stats.total_accounts, 2);
        assert_eq!(week.stats.average, Decimal::from(20));
    }

    #[tokio::test]
    async fn test_claim_is_held_until_released_or_committed() {
        let (repo, _temp) = setup_test_db().await;
        let key = week_key();

        let first = repo.claim_partition(&key, "r1", false, 0).await.unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(repo.claim_partition(&key, "r2", false, 0).await.unwrap(), None);

        repo.release_partition_claim(&key, 1).await.unwrap();
        assert_eq!(repo.claim_partition(&key, "r3", false, 0).await.unwrap(), Some(2));

        // Abandoned claims older than the cutoff can be taken over.
        let cutoff = TimeMs::now().as_ms() + 60_000;
        assert_eq!(repo.claim_partition(&key, "r4", false, cutoff).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_superseded_claim_cannot_commit() {
        let (repo, _temp) = setup_test_db().await;
        let key = week_key();
        let old = repo.claim_partition(&key, "old", false, 0).await.unwrap().unwrap();
        let new = repo.claim_partition(&key, "new", true, 0).await.unwrap().unwrap();
        assert!(new > old);

        let written = repo
            .replace_partition(&key, old, &week_scopes(&[("a", 1)]), "old", "d-old")
            .await
            .unwrap();
        assert_eq!(written, None);
        assert!(repo.load_partition(&key).await.unwrap().is_none());

        // The superseded release leaves the newer claim in place.
        repo.release_partition_claim(&key, old).await.unwrap();
        assert_eq!(repo.claim_partition(&key, "other", false, 0).await.unwrap(), None);

        let written = repo
            .replace_partition(&key, new, &week_scopes(&[("b", 2)]), "new", "d-new")
            .await
            .unwrap();
        assert_eq!(written, Some(2));
        assert_eq!(repo.get_partition_run(&key).await.unwrap().unwrap().run_id, "new");
    }

    #[tokio::test]
    async fn test_load_sees_one_generation_during_replacements() {
        let (repo, _temp) = setup_test_db().await;
        let repo = std::sync::Arc::new(repo);
        let key = week_key();
        let variants = [week_scopes(&[("a", 10), ("b", 30)]), week_scopes(&[("c", 5)])];
        commit(&repo, &key, &variants[0], "r0", &partition_digest(&key, &variants[0]))
            .await
            .unwrap();

        let writer = {
            let repo = repo.clone();
            let key = key.clone();
            let variants = variants.clone();
            tokio::spawn(async move {
                for i in 1..40 {
                    let scopes = &variants[i % 2];
                    commit(&repo, &key, scopes, "r", &partition_digest(&key, scopes))
                        .await
                        .unwrap();
                }
            })
        };

        for _ in 0..40 {
            let loaded = repo.load_partition(&key).await.unwrap().unwrap();
            assert_eq!(partition_digest(&key, &loaded.scopes), loaded.run.digest);
        }
        writer.await.unwrap();
    }
}
