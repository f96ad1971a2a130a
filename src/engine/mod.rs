//! Pure, synchronous computation pipeline: normalize → TWA → percentile → curve → points → rank.

pub mod curve;
pub mod normalize;
pub mod percentile;
pub mod points;
pub mod ranking;
pub mod twa;

pub use curve::{compute_multiplier, MultiplierCurve, MULTIPLIER_CAP, MULTIPLIER_FLOOR};
pub use normalize::normalize_events;
pub use percentile::CohortPercentileRanker;
pub use points::{apply_multipliers, PointsApplier};
pub use ranking::{rank_scope, scope_stats, standing};
pub use twa::{compute_time_weighted_average, time_weighted_average};
