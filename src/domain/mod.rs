//! Domain types for the points-multiplier and leaderboard engine.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, identifiers, Week
//! - Balance history, cohort and leaderboard row types

pub mod balance;
pub mod cohort;
pub mod decimal;
pub mod leaderboard;
pub mod primitives;

pub use balance::{BalanceEvent, NormalizedEventSeries, TimeInterval};
pub use cohort::{AdjustedEntry, CohortEntry, MultiplierResult};
pub use decimal::Decimal;
pub use leaderboard::{
    AccountStanding, LeaderboardEntry, LeaderboardScope, PartitionKey, ScopeBoard, ScopeState,
    ScopeStats,
};
pub use primitives::{AccountId, ActivityId, CategoryId, SeasonId, TimeMs, Week, WeekId};
