//! Cohort rows fed into percentile ranking and multiplier application.

use super::{AccountId, Decimal};
use serde::{Deserialize, Serialize};

/// One account in a ranking cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortEntry {
    pub account_id: AccountId,
    /// Time-weighted average holding over the week.
    pub balance: Decimal,
    pub weekly_points: Decimal,
}

impl CohortEntry {
    pub fn new(account_id: AccountId, balance: Decimal, weekly_points: Decimal) -> Self {
        Self {
            account_id,
            balance,
            weekly_points,
        }
    }
}

/// Percentile and multiplier for an eligible account.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplierResult {
    pub account_id: AccountId,
    /// Balance-weighted cumulative share, in `[0, 1]`.
    pub percentile: f64,
    /// Always within `[0.5, 3.0]`.
    pub multiplier: Decimal,
}

/// A cohort entry after multiplier application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustedEntry {
    #[serde(flatten)]
    pub entry: CohortEntry,
    /// `None` when the account was ineligible and its points passed through.
    pub multiplier: Option<MultiplierResult>,
    pub calculated_points: Decimal,
}

impl AdjustedEntry {
    /// The factor actually applied: the curve value, or 1 for pass-through.
    pub fn effective_multiplier(&self) -> Decimal {
        self.multiplier
            .as_ref()
            .map(|m| m.multiplier)
            .unwrap_or_else(Decimal::one)
    }
}
