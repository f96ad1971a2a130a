pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::Config;
pub use datasource::{BalanceHistorySource, MockDataSource, PointsSource, SourceError};
pub use db::{init_db, Repository};
pub use domain::{
    AccountId, CategoryId, CohortEntry, Decimal, LeaderboardEntry, LeaderboardScope, ScopeState,
    SeasonId, TimeMs, WeekId,
};
pub use engine::{apply_multipliers, compute_multiplier, compute_time_weighted_average};
pub use error::EngineError;
pub use orchestration::{LeaderboardCache, PopulateOptions, PopulateSummary};
