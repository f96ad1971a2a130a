//! Bounded logistic curve mapping a percentile to a points multiplier.

use crate::domain::Decimal;

pub const MULTIPLIER_FLOOR: f64 = 0.5;
pub const MULTIPLIER_CAP: f64 = 3.0;

/// Decimal places kept when converting the curve output back to `Decimal`.
const MULTIPLIER_SCALE: u32 = 8;

/// `floor + (cap - floor) / (1 + e^{-k(q - q0)})`, pinned to the floor below
/// `lower_cutoff` and to the cap at or above `upper_cutoff`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiplierCurve {
    pub k: f64,
    pub q0: f64,
    pub lower_cutoff: f64,
    pub upper_cutoff: f64,
}

impl Default for MultiplierCurve {
    fn default() -> Self {
        Self {
            k: 15.0,
            q0: 0.18,
            lower_cutoff: 0.02,
            upper_cutoff: 0.5,
        }
    }
}

impl MultiplierCurve {
    /// Raw curve value in `[MULTIPLIER_FLOOR, MULTIPLIER_CAP]`. NaN maps to the floor.
    pub fn evaluate(&self, percentile: f64) -> f64 {
        if percentile.is_nan() || percentile < self.lower_cutoff {
            return MULTIPLIER_FLOOR;
        }
        if percentile >= self.upper_cutoff {
            return MULTIPLIER_CAP;
        }
        let span = MULTIPLIER_CAP - MULTIPLIER_FLOOR;
        let value = MULTIPLIER_FLOOR + span / (1.0 + (-self.k * (percentile - self.q0)).exp());
        value.clamp(MULTIPLIER_FLOOR, MULTIPLIER_CAP)
    }

    /// Curve value as a `Decimal`, rounded to 8 places.
    pub fn multiplier(&self, percentile: f64) -> Decimal {
        let value = self.evaluate(percentile);
        Decimal::from_f64(value)
            .unwrap_or_else(floor_decimal)
            .round_dp(MULTIPLIER_SCALE)
    }
}

fn floor_decimal() -> Decimal {
    Decimal::new(rust_decimal::Decimal::new(5, 1))
}

/// Multiplier for `percentile` on the default curve (`k = 15`, `q0 = 0.18`).
pub fn compute_multiplier(percentile: f64) -> Decimal {
    MultiplierCurve::default().multiplier(percentile)
}
