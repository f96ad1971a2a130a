//! Balance-weighted cumulative percentile ranking within a cohort.

use crate::domain::{AccountId, CohortEntry, Decimal};
use std::collections::BTreeMap;

/// Ranks the eligible part of a cohort by cumulative share of total balance.
#[derive(Debug, Clone)]
pub struct CohortPercentileRanker {
    min_eligible_balance: Decimal,
}

impl CohortPercentileRanker {
    pub fn new(min_eligible_balance: Decimal) -> Self {
        Self {
            min_eligible_balance,
        }
    }

    pub fn is_eligible(&self, entry: &CohortEntry) -> bool {
        entry.balance >= self.min_eligible_balance
    }

    /// Percentile per eligible account.
    ///
    /// Eligible accounts are walked in ascending balance order (account id
    /// breaks ties); each gets `cumulative balance / total eligible balance`,
    /// inclusive of itself. Empty when the eligible total is zero.
    pub fn rank(&self, cohort: &[CohortEntry]) -> BTreeMap<AccountId, f64> {
        let mut eligible: Vec<&CohortEntry> =
            cohort.iter().filter(|e| self.is_eligible(e)).collect();
        eligible.sort_by(|a, b| {
            a.balance
                .cmp(&b.balance)
                .then_with(|| a.account_id.cmp(&b.account_id))
        });

        let total: Decimal = eligible.iter().map(|e| e.balance).sum();
        if !total.is_positive() {
            return BTreeMap::new();
        }

        let mut cumulative = Decimal::zero();
        let mut percentiles = BTreeMap::new();
        for entry in eligible {
            cumulative += entry.balance;
            let share = cumulative
                .checked_div(total)
                .map(|d| d.to_f64())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            percentiles.insert(entry.account_id.clone(), share);
        }
        percentiles
    }
}
