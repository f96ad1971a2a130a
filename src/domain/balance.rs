//! Balance history types consumed by the time-weighted average pipeline.

use super::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};

/// A point-in-time balance for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub timestamp: TimeMs,
    pub balance: Decimal,
}

impl BalanceEvent {
    pub fn new(timestamp: TimeMs, balance: Decimal) -> Self {
        Self { timestamp, balance }
    }
}

/// Sorted, duplicate-free events covering `[first event, period end]`.
///
/// Only `engine::normalize_events` builds one, so holders can rely on
/// strictly increasing timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedEventSeries {
    events: Vec<BalanceEvent>,
}

impl NormalizedEventSeries {
    pub(crate) fn from_sorted(events: Vec<BalanceEvent>) -> Self {
        debug_assert!(events.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        Self { events }
    }

    pub fn events(&self) -> &[BalanceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The `n - 1` intervals between consecutive events.
    pub fn intervals(&self) -> impl Iterator<Item = TimeInterval> + '_ {
        self.events.windows(2).map(|pair| TimeInterval {
            start: pair[0].timestamp,
            end: pair[1].timestamp,
            balance: pair[0].balance,
        })
    }
}

/// `balance` held over `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub start: TimeMs,
    pub end: TimeMs,
    pub balance: Decimal,
}

impl TimeInterval {
    /// Exact duration in seconds; never negative.
    pub fn duration_seconds(&self) -> Decimal {
        Decimal::from_millis_as_seconds(self.start.millis_until(self.end).max(0))
    }
}
