//! Proxy credibility tracking.
//!
//! Proxy signals (clicks, impressions, ...) never drive the model causally.
//! Each one carries a noise scale `sigma` that shrinks while the signal
//! keeps predicting the next bucket's outcome and grows otherwise, always
//! within `[sigma_floor, sigma_ceiling]`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, info};

use crate::config::{ProxyConfig, UpliftConfig};
use crate::table::UnifiedTable;

/// Trust state of one proxy signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyCredibility {
    /// Noise scale; lower means more trusted
    pub sigma: f64,
    /// Coupling-tightness prior
    pub tau: f64,
    /// Share of rows where the signal was missing
    #[serde(default)]
    pub missing_rate: f64,
    /// Correlation with the next bucket's outcome
    #[serde(default)]
    pub lead_outcome_corr: f64,
}

/// Credibility by proxy column name.
pub type ProxyCatalog = BTreeMap<String, ProxyCredibility>;

/// Updated catalog plus a human-readable report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEvaluation {
    pub catalog: ProxyCatalog,
    pub report: String,
}

/// Updates proxy noise scales from retrospective predictive correlation.
#[derive(Debug, Clone)]
pub struct ProxyCredibilityTracker {
    config: ProxyConfig,
}

impl ProxyCredibilityTracker {
    /// Create a tracker.
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// Create from the full configuration.
    pub fn from_config(config: &UpliftConfig) -> Self {
        Self::new(config.proxy.clone())
    }

    /// Re-evaluate every proxy column of the table against the prior catalog.
    ///
    /// Catalog entries for proxies absent from the table are carried over
    /// unchanged.
    pub fn evaluate(&self, table: &UnifiedTable, prior: &ProxyCatalog) -> ProxyEvaluation {
        let mut catalog = prior.clone();

        if table.proxy_names().is_empty() {
            return ProxyEvaluation {
                catalog,
                report: "# Proxy report\n\nNo proxy columns present.\n".to_string(),
            };
        }

        let outcome = table.outcome_kind();
        let groups = table.by_entity();
        let mut report = String::from("# Proxy report (secondary signals only)\n\n");

        for name in table.proxy_names() {
            let missing = table
                .rows()
                .iter()
                .filter(|r| r.proxy(name).is_none())
                .count();
            let missing_rate = missing as f64 / table.len().max(1) as f64;

            let mut pairs = Vec::new();
            for rows in groups.values() {
                for (row, next) in rows.iter().zip(rows.iter().skip(1)) {
                    if let Some(p) = row.proxy(name) {
                        pairs.push((p, next.outcome(outcome)));
                    }
                }
            }
            let corr = pearson(&pairs).unwrap_or(0.0);

            let entry = catalog
                .entry(name.clone())
                .or_insert_with(|| ProxyCredibility {
                    sigma: self.config.sigma_init,
                    tau: self.config.tau_w,
                    missing_rate: 0.0,
                    lead_outcome_corr: 0.0,
                });

            let earns_trust =
                missing_rate < self.config.max_missing_rate && corr > self.config.min_lead_corr;
            let before = entry.sigma;
            entry.sigma = if earns_trust {
                (entry.sigma * self.config.trust_decay).max(self.config.sigma_floor)
            } else {
                (entry.sigma * self.config.distrust_growth).min(self.config.sigma_ceiling)
            }
            .clamp(self.config.sigma_floor, self.config.sigma_ceiling);
            entry.missing_rate = missing_rate;
            entry.lead_outcome_corr = corr;

            debug!(
                proxy = %name,
                missing_rate,
                lead_corr = corr,
                sigma_before = before,
                sigma_after = entry.sigma,
                "Evaluated proxy"
            );

            let _ = writeln!(report, "## {}", name);
            let _ = writeln!(report, "- missing_rate: {:.3}", missing_rate);
            let _ = writeln!(report, "- lead_outcome_corr: {:.3}", corr);
            let _ = writeln!(report, "- sigma (higher = less trust): {:.3}", entry.sigma);
            report.push('\n');
        }

        info!(
            proxies = table.proxy_names().len(),
            outcome = outcome.as_str(),
            "Proxy credibility updated"
        );

        ProxyEvaluation { catalog, report }
    }
}

/// Pearson correlation; `None` with fewer than two pairs or zero variance.
fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for &(x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    let r = sxy / (sxx * syy).sqrt();
    r.is_finite().then_some(r.clamp(-1.0, 1.0))
}
