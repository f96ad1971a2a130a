//! Balance event normalization: sort, collapse duplicate timestamps, pad to period end.

use crate::domain::{BalanceEvent, NormalizedEventSeries, TimeMs};
use crate::error::EngineError;

/// Normalize one account's raw history so it covers the period up to `period_end`.
///
/// Events sharing a timestamp collapse to the one that came last in the input
/// (last-write-wins). If the final event precedes `period_end`, a synthetic
/// event carrying its balance is appended at `period_end`.
///
/// # Errors
/// Returns `InvariantViolation` if any balance is negative.
pub fn normalize_events(
    mut events: Vec<BalanceEvent>,
    period_end: TimeMs,
) -> Result<NormalizedEventSeries, EngineError> {
    if let Some(bad) = events.iter().find(|e| e.balance.is_negative()) {
        return Err(EngineError::InvariantViolation(format!(
            "negative balance {} at {}",
            bad.balance, bad.timestamp
        )));
    }

    // Stable: equal timestamps keep input order, so the last one wins below.
    events.sort_by_key(|e| e.timestamp);

    let mut normalized: Vec<BalanceEvent> = Vec::with_capacity(events.len() + 1);
    for event in events {
        match normalized.last_mut() {
            Some(last) if last.timestamp == event.timestamp => *last = event,
            _ => normalized.push(event),
        }
    }

    if let Some(last) = normalized.last().copied() {
        if last.timestamp < period_end {
            normalized.push(BalanceEvent::new(period_end, last.balance));
        }
    }

    Ok(NormalizedEventSeries::from_sorted(normalized))
}
