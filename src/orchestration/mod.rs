//! Population runs: cohort assembly and the leaderboard cache.

pub mod cache;
pub mod cohort;
pub mod snapshot;

pub use cache::{
    LeaderboardCache, PartitionOutcome, PartitionReport, PopulateOptions, PopulateSummary,
};
pub use cohort::{AssemblyReport, CohortAssembler, WeekCohort};
pub use snapshot::{partition_digest, PartitionSnapshot};
