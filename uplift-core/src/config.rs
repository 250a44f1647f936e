//! Configuration for the uplift allocator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{EntityKey, OutcomeKind, Result, UpliftError};

/// Immutable configuration passed into every component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpliftConfig {
    /// Estimator configuration
    pub model: ModelConfig,
    /// Posterior stability blend
    pub stability: StabilityConfig,
    /// Proxy credibility tracking
    pub proxy: ProxyConfig,
    /// Allocator weights and limits
    pub allocator: AllocatorConfig,
    /// Budget, bounds and caps
    pub constraints: ConstraintsConfig,
    /// Monetary value per outcome unit
    pub value: ValueConfig,
    /// Budget-target search
    pub search: SearchConfig,
    /// Verifier thresholds
    pub verify: VerifyConfig,
    /// Paid-channel classification
    pub channel_policy: ChannelPolicyConfig,
}

impl UpliftConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(UpliftError::ConfigError(msg));

        if !(self.constraints.budget_total >= 0.0) {
            return fail(format!(
                "budget_total must be non-negative, got {}",
                self.constraints.budget_total
            ));
        }
        if !(0.0..=1.0).contains(&self.allocator.alpha_gate) {
            return fail(format!(
                "alpha_gate must lie in [0, 1], got {}",
                self.allocator.alpha_gate
            ));
        }
        if self.allocator.step_pct_limit < 0.0 {
            return fail("step_pct_limit must be non-negative".to_string());
        }
        if self.allocator.quanta == 0 {
            return fail("allocator.quanta must be positive".to_string());
        }
        if self.proxy.sigma_floor <= 0.0 || self.proxy.sigma_floor > self.proxy.sigma_ceiling {
            return fail(format!(
                "proxy sigma bounds invalid: floor={} ceiling={}",
                self.proxy.sigma_floor, self.proxy.sigma_ceiling
            ));
        }
        if self.model.grid_points < 2 || self.model.grid_max <= 0.0 {
            return fail("model grid needs at least 2 points over a positive range".to_string());
        }
        if self.model.prior_sd <= 0.0 {
            return fail("model.prior_sd must be positive".to_string());
        }
        if self.search.grid_points < 2 {
            return fail("search.grid_points must be at least 2".to_string());
        }
        for (key, bounds) in &self.constraints.entity_bounds {
            if let (Some(min), Some(max)) = (bounds.min, bounds.max) {
                if min < 0.0 || max < 0.0 {
                    return fail(format!("negative bounds for {}", key));
                }
            }
        }
        Ok(())
    }
}

/// Uplift estimator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Trailing window fitted each cycle (days)
    pub fit_window_days: u32,
    /// Buckets with positive revenue needed before proxies are switched off
    pub min_buckets_with_revenue: u32,
    /// Cumulative purchases needed before proxies are switched off
    pub min_purchases_sum: f64,
    /// Minimum-viability uplift threshold
    pub u_min: f64,
    /// Response curve shape `a`
    pub curve_shape: f64,
    /// Floor for the half-saturation spend `theta`
    pub theta_floor: f64,
    /// Number of uplift grid points
    pub grid_points: usize,
    /// Upper end of the uplift grid
    pub grid_max: f64,
    /// First-cycle prior mean
    pub prior_mean: f64,
    /// First-cycle prior standard deviation
    pub prior_sd: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            fit_window_days: 28,
            min_buckets_with_revenue: 6,
            min_purchases_sum: 10.0,
            u_min: 0.02,
            curve_shape: 0.8,
            theta_floor: 50.0,
            grid_points: 501,
            grid_max: 0.25,
            prior_mean: 0.02,
            prior_sd: 0.03,
        }
    }
}

/// Posterior stability blend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Trailing buckets averaged for the observed outcome and spend
    pub smoothing_buckets: usize,
    /// Minimum weight given to the fresh posterior
    pub min_update_weight: f64,
    /// Information score at which the fresh posterior fully replaces the prior
    pub info_for_full_update: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            smoothing_buckets: 4,
            min_update_weight: 0.20,
            info_for_full_update: 12.0,
        }
    }
}

/// Proxy credibility configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Coupling-tightness prior for new proxies
    pub tau_w: f64,
    /// Noise scale for new proxies
    pub sigma_init: f64,
    /// Most trusted a proxy can become
    pub sigma_floor: f64,
    /// Least trusted a proxy can become
    pub sigma_ceiling: f64,
    /// Missing rate below which a proxy can earn trust
    pub max_missing_rate: f64,
    /// Lead-outcome correlation above which a proxy can earn trust
    pub min_lead_corr: f64,
    /// Multiplicative sigma factor when trust increases
    pub trust_decay: f64,
    /// Multiplicative sigma factor when trust decreases
    pub distrust_growth: f64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            tau_w: 0.03,
            sigma_init: 3.0,
            sigma_floor: 1.0,
            sigma_ceiling: 8.0,
            max_missing_rate: 0.2,
            min_lead_corr: 0.15,
            trust_decay: 0.97,
            distrust_growth: 1.05,
        }
    }
}

/// Allocator weights and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Largest relative change per entity per cycle
    pub step_pct_limit: f64,
    /// Uncertainty gate: increases need `p_above_min >= 1 - alpha_gate`
    pub alpha_gate: f64,
    /// Risk-aversion weight on posterior sd
    pub gamma_risk: f64,
    /// Quadratic penalty on moving away from the previous budget
    pub lambda_inertia: f64,
    /// Quantum is `max(1, budget_total / quanta)`
    pub quanta: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            step_pct_limit: 0.05,
            alpha_gate: 0.1,
            gamma_risk: 0.5,
            lambda_inertia: 0.0,
            quanta: 2000,
        }
    }
}

/// Budget bounds for an entity. `max = None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Default for Bounds {
    fn default() -> Self {
        Self { min: 0.0, max: None }
    }
}

/// Per-entity override of the default bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundsOverride {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Budget, bounds and caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintsConfig {
    /// Budget to distribute each cycle
    pub budget_total: f64,
    /// Bounds applied to every entity
    pub bounds_default: Bounds,
    /// Per-entity bound overrides; can only tighten the defaults
    pub entity_bounds: BTreeMap<EntityKey, BoundsOverride>,
    /// Per-channel spend caps
    pub channel_caps: BTreeMap<String, f64>,
}

impl Default for ConstraintsConfig {
    fn default() -> Self {
        Self {
            budget_total: 1000.0,
            bounds_default: Bounds::default(),
            entity_bounds: BTreeMap::new(),
            channel_caps: BTreeMap::new(),
        }
    }
}

impl ConstraintsConfig {
    /// Configured `[min, max]` for an entity after overrides.
    ///
    /// An inverted interval collapses to a point at the lower bound.
    pub fn bounds_for(&self, key: &EntityKey) -> (f64, f64) {
        let mut min_b = self.bounds_default.min;
        let mut max_b = self.bounds_default.max.unwrap_or(f64::INFINITY);

        if let Some(over) = self.entity_bounds.get(key) {
            if let Some(min) = over.min {
                min_b = min_b.max(min);
            }
            if let Some(max) = over.max {
                max_b = max_b.min(max);
            }
        }

        if max_b < min_b {
            max_b = min_b;
        }
        (min_b, max_b)
    }

    /// Cap for a channel, infinite when none is configured.
    pub fn channel_cap(&self, channel: &str) -> f64 {
        self.channel_caps.get(channel).copied().unwrap_or(f64::INFINITY)
    }
}

/// Monetary value per outcome unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueConfig {
    /// Value of one unit of revenue
    pub per_revenue: f64,
    /// Value of one purchase
    pub per_purchase: f64,
}

impl Default for ValueConfig {
    fn default() -> Self {
        Self {
            per_revenue: 1.0,
            per_purchase: 100.0,
        }
    }
}

impl ValueConfig {
    /// Value per unit of the given outcome.
    pub fn value_for(&self, outcome: OutcomeKind) -> f64 {
        match outcome {
            OutcomeKind::Revenue => self.per_revenue,
            OutcomeKind::Purchases => self.per_purchase,
        }
    }
}

/// Budget-target search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// z-score for optimistic/conservative postures
    pub z_score: f64,
    /// Budget grid size; raised to at least 5
    pub grid_points: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            z_score: 1.28,
            grid_points: 41,
        }
    }
}

/// Verifier thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Largest acceptable churn per cycle
    pub churn_limit: f64,
    /// Relative tolerance for the budget total check
    pub budget_rel_tolerance: f64,
    /// Purchases below this (with zero revenue) count as very low signal
    pub low_signal_purchases: f64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            churn_limit: 0.10,
            budget_rel_tolerance: 1e-6,
            low_signal_purchases: 5.0,
        }
    }
}

/// Keyword and exact-list policy deciding which entities are paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPolicyConfig {
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub exact_paid_channels: Vec<String>,
    pub exact_unpaid_channels: Vec<String>,
}

impl Default for ChannelPolicyConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            include_keywords: words(&[
                "paid",
                "cpc",
                "ppc",
                "display",
                "shopping",
                "affiliate",
                "sponsored",
                "ads",
                "retarget",
                "prospecting",
                "meta",
                "facebook",
                "instagram",
                "tiktok",
                "linkedin",
                "youtube",
                "google ads",
                "bing ads",
                "snapchat",
                "pinterest",
            ]),
            exclude_keywords: words(&[
                "organic",
                "direct",
                "referral",
                "seo",
                "unassigned",
                "(none)",
            ]),
            exact_paid_channels: vec![],
            exact_unpaid_channels: vec![],
        }
    }
}
