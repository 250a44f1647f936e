//! Diminishing-returns response curve.
//!
//! `saturation(spend) = spend^a / (spend^a + theta^a + ε)` is zero at zero
//! spend, monotone in spend, bounded in `[0, 1)`, and concave for `a < 1`.

use serde::{Deserialize, Serialize};

/// Keeps the denominator positive at zero spend and zero `theta`.
pub const SATURATION_EPS: f64 = 1e-12;

/// Fraction of the entity's saturation reached at `spend`.
pub fn saturation(spend: f64, a: f64, theta: f64) -> f64 {
    let spend = spend.max(0.0);
    let num = spend.powf(a);
    num / (num + theta.max(0.0).powf(a) + SATURATION_EPS)
}

/// Shape and half-saturation spend of an entity's response curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveParams {
    /// Shape; values below one give diminishing returns
    pub a: f64,
    /// Spend at which half of saturation is reached
    pub theta: f64,
}

impl CurveParams {
    /// Create curve parameters.
    pub fn new(a: f64, theta: f64) -> Self {
        Self { a, theta }
    }

    /// Fit `theta` as the median spend of a window, floored.
    ///
    /// `a` stays at the configured conservative shape.
    pub fn fit(spends: &[f64], shape: f64, theta_floor: f64) -> Self {
        let theta = median(spends).map_or(theta_floor, |m| theta_floor.max(m + 1e-9));
        Self { a: shape, theta }
    }

    /// Saturation at `spend` under these parameters.
    pub fn saturation(&self, spend: f64) -> f64 {
        saturation(spend, self.a, self.theta)
    }
}

/// Median of the finite values, `None` when there are none.
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}
