//! Leaderboard cache keys and rows.

use super::{AccountId, CategoryId, Decimal, SeasonId, WeekId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition key of the leaderboard cache.
///
/// `(season)` is the season aggregate, `(season, week)` the week total and
/// `(season, week, category)` one category slice of that week.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardScope {
    pub season_id: SeasonId,
    pub week_id: Option<WeekId>,
    pub category_id: Option<CategoryId>,
}

impl LeaderboardScope {
    pub fn season(season_id: SeasonId) -> Self {
        Self {
            season_id,
            week_id: None,
            category_id: None,
        }
    }

    pub fn week(season_id: SeasonId, week_id: WeekId) -> Self {
        Self {
            season_id,
            week_id: Some(week_id),
            category_id: None,
        }
    }

    pub fn category(season_id: SeasonId, week_id: WeekId, category_id: CategoryId) -> Self {
        Self {
            season_id,
            week_id: Some(week_id),
            category_id: Some(category_id),
        }
    }

    /// The unit of population this scope is written with.
    ///
    /// Category scopes are materialized in the same pass as their week.
    pub fn partition(&self) -> PartitionKey {
        PartitionKey {
            season_id: self.season_id.clone(),
            week_id: self.week_id.clone(),
        }
    }
}

impl fmt::Display for LeaderboardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "season={}", self.season_id)?;
        if let Some(week) = &self.week_id {
            write!(f, " week={}", week)?;
        }
        if let Some(category) = &self.category_id {
            write!(f, " category={}", category)?;
        }
        Ok(())
    }
}

/// Single-writer unit: a season aggregate or one week with all its categories.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub season_id: SeasonId,
    pub week_id: Option<WeekId>,
}

impl PartitionKey {
    pub fn season(season_id: SeasonId) -> Self {
        Self {
            season_id,
            week_id: None,
        }
    }

    pub fn week(season_id: SeasonId, week_id: WeekId) -> Self {
        Self {
            season_id,
            week_id: Some(week_id),
        }
    }

    /// The top-level scope of this partition (season aggregate or week total).
    pub fn root_scope(&self) -> LeaderboardScope {
        LeaderboardScope {
            season_id: self.season_id.clone(),
            week_id: self.week_id.clone(),
            category_id: None,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.week_id {
            Some(week) => write!(f, "season={} week={}", self.season_id, week),
            None => write!(f, "season={}", self.season_id),
        }
    }
}

/// One ranked row; unique per `(scope, account_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub scope: LeaderboardScope,
    pub account_id: AccountId,
    pub points: Decimal,
    /// Dense, 1-based.
    pub rank: u32,
}

/// Summary statistics for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeStats {
    pub total_accounts: u32,
    pub median: Decimal,
    pub average: Decimal,
}

impl ScopeStats {
    pub fn empty() -> Self {
        Self {
            total_accounts: 0,
            median: Decimal::zero(),
            average: Decimal::zero(),
        }
    }
}

/// Where one account sits within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStanding {
    pub rank: u32,
    pub points: Decimal,
    /// `100` for first place, approaching `0` for last.
    pub top_percentile: u8,
}

/// One materialized scope: ranked rows plus their stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeBoard {
    pub entries: Vec<LeaderboardEntry>,
    pub stats: ScopeStats,
}

/// Population state of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeState {
    Stale,
    Populating,
    Fresh,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeState::Stale => write!(f, "stale"),
            ScopeState::Populating => write!(f, "populating"),
            ScopeState::Fresh => write!(f, "fresh"),
        }
    }
}
