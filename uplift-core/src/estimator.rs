//! Bayesian grid estimator of per-entity uplift-per-spend.
//!
//! Each cycle moves every entity's belief one step:
//!
//! 1. Prior: Gaussian around last cycle's posterior (or the configured
//!    first-cycle prior).
//! 2. Likelihood: the trailing mean outcome is treated as Poisson-like with
//!    rate `baseline + uplift · saturation(spend)`.
//! 3. Proxies: only while outcome evidence is thin, each proxy adds a
//!    Gaussian term scaled by `1 / sigma²`.
//! 4. The grid posterior is normalized in log space, then blended with the
//!    prior in proportion to the evidence volume so short windows cannot
//!    produce overconfident jumps.

use statrs::function::erf::erfc;
use std::collections::BTreeMap;
use std::f64::consts::SQRT_2;
use tracing::{debug, info};

use crate::config::{ModelConfig, StabilityConfig, UpliftConfig};
use crate::curve::{median, CurveParams};
use crate::proxy::ProxyCatalog;
use crate::table::{BucketRow, UnifiedTable};
use crate::types::{FitDiagnostics, ModelState, OutcomeKind, PosteriorBelief};

const LOG_EPS: f64 = 1e-12;
const MIN_RATE: f64 = 1e-9;

/// Fixed-resolution grid of candidate uplift values.
#[derive(Debug, Clone, PartialEq)]
pub struct UpliftGrid {
    points: Vec<f64>,
}

impl UpliftGrid {
    /// `n` evenly spaced points over `[0, max]`.
    pub fn linspace(max: f64, n: usize) -> Self {
        let n = n.max(2);
        let step = max / (n - 1) as f64;
        Self {
            points: (0..n).map(|i| i as f64 * step).collect(),
        }
    }

    /// Grid points.
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Normalize a log density over the grid and return its mean and sd.
    ///
    /// The max is subtracted before exponentiating.
    pub fn moments(&self, log_density: &[f64]) -> (f64, f64) {
        let peak = log_density
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = log_density.iter().map(|lp| (lp - peak).exp()).collect();
        let total = weights.iter().sum::<f64>() + LOG_EPS;

        let mean = self
            .points
            .iter()
            .zip(&weights)
            .map(|(g, w)| g * w)
            .sum::<f64>()
            / total;
        let var = self
            .points
            .iter()
            .zip(&weights)
            .map(|(g, w)| (g - mean).powi(2) * w)
            .sum::<f64>()
            / total;
        (mean, var.max(LOG_EPS).sqrt())
    }
}

/// One-sided normal tail `P(U > threshold)` for `U ~ N(mean, sd²)`.
pub fn probability_above(mean: f64, sd: f64, threshold: f64) -> f64 {
    let z = (threshold - mean) / (sd + LOG_EPS);
    (0.5 * erfc(z / SQRT_2)).clamp(0.0, 1.0)
}

/// Evidence extracted from one entity's windowed rows.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvidence {
    /// Mean spend over the smoothing tail
    pub spend: f64,
    /// Mean outcome over the smoothing tail
    pub observed: f64,
    /// Median outcome over the whole window
    pub baseline: f64,
    /// Evidence volume: positive-revenue buckets or cumulative purchases
    pub information: f64,
    /// Whether proxies are consulted
    pub proxies_enabled: bool,
    /// Tail mean of each proxy with at least one observed value
    pub proxies: BTreeMap<String, f64>,
    /// Curve fitted on the window's spend
    pub curve: CurveParams,
}

/// Estimator result for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorOutput {
    /// New belief snapshot
    pub state: ModelState,
    /// Fit diagnostics
    pub diagnostics: FitDiagnostics,
}

impl EstimatorOutput {
    /// Whether the window held no entity.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

/// Grid-posterior uplift estimator.
#[derive(Debug, Clone)]
pub struct UpliftEstimator {
    model: ModelConfig,
    stability: StabilityConfig,
    default_tau: f64,
    grid: UpliftGrid,
}

impl UpliftEstimator {
    /// Create from the full configuration.
    pub fn from_config(config: &UpliftConfig) -> Self {
        Self {
            grid: UpliftGrid::linspace(config.model.grid_max, config.model.grid_points),
            model: config.model.clone(),
            stability: config.stability.clone(),
            default_tau: config.proxy.tau_w,
        }
    }

    /// Run one model-update cycle.
    ///
    /// An empty window yields an empty state, not an error.
    pub fn update(
        &self,
        table: &UnifiedTable,
        prior: &ModelState,
        catalog: &ProxyCatalog,
    ) -> EstimatorOutput {
        let window = table.window(self.model.fit_window_days);
        let outcome = window.outcome_kind();
        let last_bucket = window.last_bucket();

        if window.is_empty() {
            info!("No rows in fit window; no entities to update");
            return EstimatorOutput {
                state: ModelState::default(),
                diagnostics: FitDiagnostics {
                    outcome,
                    fit_window_days: self.model.fit_window_days,
                    n_entities: 0,
                    last_bucket: None,
                },
            };
        }

        let mut entities = BTreeMap::new();
        for (key, rows) in window.by_entity() {
            let evidence = self.gather_evidence(&rows, outcome, &window);
            let entity_last = rows.last().map(|r| r.bucket_start);
            let (mu0, sd0) = prior
                .entities
                .get(key)
                .map(|b| (b.mean, b.sd))
                .unwrap_or((self.model.prior_mean, self.model.prior_sd));

            let log_density = self.log_posterior(mu0, sd0, &evidence, catalog);
            let (mu_post, sd_post) = self.grid.moments(&log_density);
            let (mean, sd) = self.blend(mu0, sd0, mu_post, sd_post, evidence.information);
            let p_above_min = probability_above(mean, sd, self.model.u_min);

            debug!(
                entity = %key,
                mean,
                sd,
                p_above_min,
                information = evidence.information,
                proxies_enabled = evidence.proxies_enabled,
                "Updated belief"
            );

            entities.insert(
                key.clone(),
                PosteriorBelief {
                    mean,
                    sd,
                    p_above_min,
                    information_score: evidence.information,
                    proxies_enabled: evidence.proxies_enabled,
                    outcome,
                    curve: evidence.curve,
                    last_bucket: entity_last,
                },
            );
        }

        info!(
            entities = entities.len(),
            outcome = outcome.as_str(),
            "Model state updated"
        );

        EstimatorOutput {
            diagnostics: FitDiagnostics {
                outcome,
                fit_window_days: self.model.fit_window_days,
                n_entities: entities.len(),
                last_bucket,
            },
            state: ModelState {
                updated_at: last_bucket,
                entities,
            },
        }
    }

    /// Summarize one entity's rows (time-ordered) into model evidence.
    pub fn gather_evidence(
        &self,
        rows: &[&BucketRow],
        outcome: OutcomeKind,
        window: &UnifiedTable,
    ) -> EntityEvidence {
        let tail_len = self.stability.smoothing_buckets.max(1).min(rows.len());
        let tail = &rows[rows.len() - tail_len..];
        let n_tail = tail.len().max(1) as f64;
        let spend = tail.iter().map(|r| r.spend).sum::<f64>() / n_tail;
        let observed = tail.iter().map(|r| r.outcome(outcome)).sum::<f64>() / n_tail;

        let outcomes: Vec<f64> = rows.iter().map(|r| r.outcome(outcome)).collect();
        let baseline = median(&outcomes).unwrap_or(0.0);

        let (information, proxies_enabled) = match outcome {
            OutcomeKind::Revenue => {
                let buckets = rows.iter().filter(|r| r.revenue > 0.0).count() as f64;
                (buckets, buckets < f64::from(self.model.min_buckets_with_revenue))
            }
            OutcomeKind::Purchases => {
                let total: f64 = rows.iter().map(|r| r.purchases).sum();
                (total, total < self.model.min_purchases_sum)
            }
        };

        let mut proxies = BTreeMap::new();
        for name in window.proxy_names() {
            let seen: Vec<f64> = tail.iter().filter_map(|r| r.proxy(name)).collect();
            if !seen.is_empty() {
                proxies.insert(name.clone(), seen.iter().sum::<f64>() / seen.len() as f64);
            }
        }

        let spends: Vec<f64> = rows.iter().map(|r| r.spend).collect();
        let curve = CurveParams::fit(&spends, self.model.curve_shape, self.model.theta_floor);

        EntityEvidence {
            spend,
            observed,
            baseline,
            information,
            proxies_enabled,
            proxies,
            curve,
        }
    }

    /// Unnormalized log posterior over the grid.
    pub fn log_posterior(
        &self,
        mu0: f64,
        sd0: f64,
        evidence: &EntityEvidence,
        catalog: &ProxyCatalog,
    ) -> Vec<f64> {
        let var0 = sd0 * sd0;
        let m = evidence.curve.saturation(evidence.spend);

        // Proxies that have a catalog entry, with their noise and coupling.
        let active: Vec<(f64, f64, f64)> = if evidence.proxies_enabled {
            evidence
                .proxies
                .iter()
                .filter_map(|(name, value)| {
                    let cred = catalog.get(name)?;
                    let tau = if cred.tau > 0.0 { cred.tau } else { self.default_tau };
                    Some((*value, cred.sigma, tau))
                })
                .collect()
        } else {
            Vec::new()
        };

        self.grid
            .points()
            .iter()
            .map(|&u| {
                let prior_ll = -0.5 * (u - mu0).powi(2) / (var0 + LOG_EPS);

                let rate = (evidence.baseline + u * m).max(MIN_RATE);
                let outcome_ll = evidence.observed * rate.ln() - rate;

                let proxy_ll: f64 = active
                    .iter()
                    // unit coupling weight: the proxy tracks u directly
                    .map(|&(value, sigma, tau)| {
                        -0.5 * (value - u).powi(2) / (sigma * sigma + LOG_EPS)
                            - 0.5 / (tau * tau + LOG_EPS)
                    })
                    .sum();

                prior_ll + outcome_ll + proxy_ll
            })
            .collect()
    }

    /// Blend the fresh posterior with the prior by evidence ratio.
    ///
    /// The sd never drops below `(1 - blend) · prior_sd`.
    pub fn blend(
        &self,
        mu0: f64,
        sd0: f64,
        mu_post: f64,
        sd_post: f64,
        information: f64,
    ) -> (f64, f64) {
        let ratio = (information / self.stability.info_for_full_update.max(1e-9)).clamp(0.0, 1.0);
        let weight = self.stability.min_update_weight.max(ratio);
        let mean = (1.0 - weight) * mu0 + weight * mu_post;
        let sd = sd_post.max((1.0 - weight) * sd0);
        (mean, sd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyCredibility;
    use crate::types::EntityKey;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 13, 0, 0, 0).unwrap() + Duration::hours(12 * i)
    }

    fn catalog() -> ProxyCatalog {
        let mut c = ProxyCatalog::new();
        c.insert(
            "proxy_clicks".to_string(),
            ProxyCredibility {
                sigma: 3.0,
                tau: 0.03,
                missing_rate: 0.0,
                lead_outcome_corr: 0.0,
            },
        );
        c
    }

    #[test]
    fn test_grid_moments_of_flat_density() {
        let grid = UpliftGrid::linspace(1.0, 3);
        let (mean, sd) = grid.moments(&[0.0, 0.0, 0.0]);
        assert!((mean - 0.5).abs() < 1e-9);
        assert!((sd - (1.0f64 / 6.0).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_probability_above() {
        assert!((probability_above(0.02, 0.01, 0.02) - 0.5).abs() < 1e-12);
        assert!(probability_above(0.2, 0.001, 0.02) > 0.999);
        assert!(probability_above(0.0, 0.001, 0.02) < 1e-6);
    }

    #[test]
    fn test_proxy_gate_follows_information() {
        let high = EntityKey::new("ga", "A", "high");
        let low = EntityKey::new("ga", "A", "low");
        let mut rows: Vec<BucketRow> = (0..6)
            .map(|i| {
                BucketRow::new(at(i), high.clone(), 1.0, 1.0, 50.0)
                    .with_proxy("proxy_clicks", Some((i + 1) as f64))
            })
            .collect();
        rows.push(BucketRow::new(at(7), low.clone(), 0.0, 0.0, 20.0).with_proxy("proxy_clicks", Some(4.0)));

        let estimator = UpliftEstimator::from_config(&UpliftConfig::default());
        let out = estimator.update(&UnifiedTable::new(rows), &ModelState::default(), &catalog());

        assert_eq!(out.diagnostics.outcome, OutcomeKind::Revenue);
        assert!(!out.state.entities[&high].proxies_enabled);
        assert!(out.state.entities[&low].proxies_enabled);
        assert_eq!(out.state.entities[&high].information_score, 6.0);
    }

    #[test]
    fn test_low_information_stays_near_prior() {
        let key = EntityKey::new("ga", "Paid Search", "c1");
        let rows: Vec<BucketRow> = [1.0, 0.0, 0.0, 0.0]
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                BucketRow::new(at(i as i64), key.clone(), 0.0, p, 50.0)
                    .with_proxy("proxy_clicks", Some(10.0))
            })
            .collect();

        let mut prior = ModelState::default();
        prior.entities.insert(
            key.clone(),
            PosteriorBelief {
                mean: 0.02,
                sd: 0.03,
                p_above_min: 0.5,
                information_score: 0.0,
                proxies_enabled: true,
                outcome: OutcomeKind::Purchases,
                curve: CurveParams::new(0.8, 50.0),
                last_bucket: None,
            },
        );

        let estimator = UpliftEstimator::from_config(&UpliftConfig::default());
        let out = estimator.update(&UnifiedTable::new(rows), &prior, &catalog());
        let belief = &out.state.entities[&key];

        assert_eq!(belief.outcome, OutcomeKind::Purchases);
        assert!(belief.proxies_enabled);
        assert!(belief.mean >= 0.0);
        assert!((belief.mean - 0.02).abs() < 0.02);
        // blend weight 0.2 keeps at least 80% of the prior sd
        assert!(belief.sd >= 0.8 * 0.03 - 1e-12);
    }

    #[test]
    fn test_last_bucket_is_per_entity() {
        let active = EntityKey::new("ga", "Paid Search", "active");
        let stale = EntityKey::new("ga", "Paid Search", "stale");
        let mut rows: Vec<BucketRow> = (0..6)
            .map(|i| BucketRow::new(at(i), active.clone(), 1.0, 1.0, 50.0))
            .collect();
        rows.push(BucketRow::new(at(1), stale.clone(), 1.0, 1.0, 50.0));

        let estimator = UpliftEstimator::from_config(&UpliftConfig::default());
        let out = estimator.update(&UnifiedTable::new(rows), &ModelState::default(), &ProxyCatalog::new());

        assert_eq!(out.state.entities[&active].last_bucket, Some(at(5)));
        assert_eq!(out.state.entities[&stale].last_bucket, Some(at(1)));
        assert_eq!(out.state.updated_at, Some(at(5)));
        assert_eq!(out.diagnostics.last_bucket, Some(at(5)));
    }

    #[test]
    fn test_empty_table_yields_no_entities() {
        let estimator = UpliftEstimator::from_config(&UpliftConfig::default());
        let out = estimator.update(&UnifiedTable::empty(), &ModelState::default(), &ProxyCatalog::new());
        assert!(out.is_empty());
        assert_eq!(out.diagnostics.n_entities, 0);
        assert_eq!(out.diagnostics.last_bucket, None);
    }

    #[test]
    fn test_all_zero_outcomes_give_valid_posterior() {
        let key = EntityKey::new("ga", "Display", "quiet");
        let rows: Vec<BucketRow> = (0..5)
            .map(|i| BucketRow::new(at(i), key.clone(), 0.0, 0.0, 0.0))
            .collect();
        let config = UpliftConfig::default();
        let estimator = UpliftEstimator::from_config(&config);
        let out = estimator.update(&UnifiedTable::new(rows), &ModelState::default(), &ProxyCatalog::new());

        let belief = &out.state.entities[&key];
        assert!(belief.mean.is_finite() && belief.mean >= 0.0);
        assert!(belief.sd.is_finite() && belief.sd > 0.0);
        assert!((0.0..=1.0).contains(&belief.p_above_min));
        assert!(belief.proxies_enabled);
        assert_eq!(belief.curve.theta, config.model.theta_floor);
    }

    #[test]
    fn test_blend_limits_sd_shrinkage() {
        let estimator = UpliftEstimator::from_config(&UpliftConfig::default());
        let (mean, sd) = estimator.blend(0.02, 0.03, 0.10, 0.001, 0.0);
        assert!((mean - (0.8 * 0.02 + 0.2 * 0.10)).abs() < 1e-12);
        assert!((sd - 0.8 * 0.03).abs() < 1e-12);

        let (mean, sd) = estimator.blend(0.02, 0.03, 0.10, 0.001, 24.0);
        assert!((mean - 0.10).abs() < 1e-12);
        assert!((sd - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_strong_revenue_signal_moves_mean_up() {
        let key = EntityKey::new("ga", "Paid Search", "strong");
        let rows: Vec<BucketRow> = (0..12)
            .map(|i| {
                let revenue = if i < 8 { 1.0 } else { 20.0 };
                BucketRow::new(at(i), key.clone(), revenue, 1.0, 200.0)
            })
            .collect();
        let estimator = UpliftEstimator::from_config(&UpliftConfig::default());
        let out = estimator.update(&UnifiedTable::new(rows), &ModelState::default(), &ProxyCatalog::new());
        let belief = &out.state.entities[&key];
        assert!(!belief.proxies_enabled);
        assert!(belief.mean > 0.02);
    }
}
