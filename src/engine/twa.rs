//! Time-weighted average balance over a normalized series.

use super::normalize::normalize_events;
use crate::domain::{BalanceEvent, Decimal, NormalizedEventSeries, TimeMs};
use crate::error::EngineError;

/// `Σ(balance × seconds) / Σ(seconds)` over the series' intervals.
///
/// Zero total duration (empty, single event, or all events at one instant)
/// yields 0.
///
/// # Errors
/// Returns `InvariantViolation` if the weighted sum leaves the decimal range.
pub fn time_weighted_average(series: &NormalizedEventSeries) -> Result<Decimal, EngineError> {
    let (weighted_sum, total_seconds) = series
        .intervals()
        .try_fold(
            (Decimal::zero(), Decimal::zero()),
            |(weighted, seconds), interval| {
                let duration = interval.duration_seconds();
                let weighted = interval
                    .balance
                    .checked_mul(duration)
                    .and_then(|w| weighted.checked_add(w))?;
                Some((weighted, seconds.checked_add(duration)?))
            },
        )
        .ok_or_else(|| {
            EngineError::InvariantViolation("time-weighted balance sum overflows".to_string())
        })?;

    Ok(weighted_sum
        .checked_div(total_seconds)
        .unwrap_or_else(Decimal::zero))
}

/// Normalize raw events for the period and compute their time-weighted average.
///
/// # Errors
/// Returns `InvariantViolation` if the history contains a negative balance or
/// its weighted sum overflows.
pub fn compute_time_weighted_average(
    events: Vec<BalanceEvent>,
    period_end: TimeMs,
) -> Result<Decimal, EngineError> {
    let series = normalize_events(events, period_end)?;
    time_weighted_average(&series)
}
