//! Multiplier application over a cohort.

use super::curve::MultiplierCurve;
use super::percentile::CohortPercentileRanker;
use crate::domain::{AdjustedEntry, CohortEntry, Decimal, MultiplierResult};

/// Combines the percentile ranker and the multiplier curve.
///
/// Pure: persistence is the caller's job.
#[derive(Debug, Clone)]
pub struct PointsApplier {
    ranker: CohortPercentileRanker,
    curve: MultiplierCurve,
}

impl PointsApplier {
    pub fn new(min_eligible_balance: Decimal) -> Self {
        Self::with_curve(min_eligible_balance, MultiplierCurve::default())
    }

    pub fn with_curve(min_eligible_balance: Decimal, curve: MultiplierCurve) -> Self {
        Self {
            ranker: CohortPercentileRanker::new(min_eligible_balance),
            curve,
        }
    }

    pub fn ranker(&self) -> &CohortPercentileRanker {
        &self.ranker
    }

    /// Scale each eligible account's weekly points by its curve multiplier.
    ///
    /// Accounts without a percentile (below threshold, or a cohort with zero
    /// eligible balance) keep their weekly points unchanged. Output order
    /// matches input order.
    pub fn apply(&self, cohort: &[CohortEntry]) -> Vec<AdjustedEntry> {
        let percentiles = self.ranker.rank(cohort);

        cohort
            .iter()
            .map(|entry| {
                let multiplier = percentiles.get(&entry.account_id).map(|&percentile| {
                    MultiplierResult {
                        account_id: entry.account_id.clone(),
                        percentile,
                        multiplier: self.curve.multiplier(percentile),
                    }
                });
                let calculated_points = match &multiplier {
                    Some(m) => entry.weekly_points * m.multiplier,
                    None => entry.weekly_points,
                };
                AdjustedEntry {
                    entry: entry.clone(),
                    multiplier,
                    calculated_points,
                }
            })
            .collect()
    }
}

/// Apply the default curve with the given eligibility threshold.
pub fn apply_multipliers(cohort: &[CohortEntry], min_eligible_balance: Decimal) -> Vec<AdjustedEntry> {
    PointsApplier::new(min_eligible_balance).apply(cohort)
}
