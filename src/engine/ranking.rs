//! Rank assignment and per-scope statistics.

use crate::domain::{
    AccountId, AccountStanding, Decimal, LeaderboardEntry, LeaderboardScope, ScopeStats,
};

/// Decimal places kept for median/average, matching the stats cache.
const STATS_SCALE: u32 = 6;

/// Rank `(account, points)` pairs for one scope.
///
/// Descending points, ascending account id on ties; ranks run `1..=N`.
pub fn rank_scope(
    scope: &LeaderboardScope,
    totals: impl IntoIterator<Item = (AccountId, Decimal)>,
) -> Vec<LeaderboardEntry> {
    let mut totals: Vec<(AccountId, Decimal)> = totals.into_iter().collect();
    totals.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    totals
        .into_iter()
        .enumerate()
        .map(|(idx, (account_id, points))| LeaderboardEntry {
            scope: scope.clone(),
            account_id,
            points,
            rank: (idx + 1) as u32,
        })
        .collect()
}

/// Count, median and mean of the scope's points.
pub fn scope_stats(entries: &[LeaderboardEntry]) -> ScopeStats {
    if entries.is_empty() {
        return ScopeStats::empty();
    }

    let mut points: Vec<Decimal> = entries.iter().map(|e| e.points).collect();
    points.sort();

    let n = points.len();
    let median = if n % 2 == 0 {
        (points[n / 2 - 1] + points[n / 2]) / Decimal::from(2)
    } else {
        points[n / 2]
    };
    let total: Decimal = points.iter().sum();
    let average = total / Decimal::from(n as i64);

    ScopeStats {
        total_accounts: n as u32,
        median: median.round_dp(STATS_SCALE),
        average: average.round_dp(STATS_SCALE),
    }
}

/// Rank, points and top-percentile of `account` within ranked `entries`.
pub fn standing(entries: &[LeaderboardEntry], account: &AccountId) -> Option<AccountStanding> {
    let total = entries.len() as f64;
    entries
        .iter()
        .find(|e| &e.account_id == account)
        .map(|e| {
            let top = (1.0 - (e.rank as f64 - 1.0) / total) * 100.0;
            AccountStanding {
                rank: e.rank,
                points: e.points,
                top_percentile: top.round().clamp(0.0, 100.0) as u8,
            }
        })
}
