//! Budget-target search.
//!
//! Sweeps the total budget across the step-limited feasible range, re-runs
//! the allocator at every grid point and reports, per value posture, the
//! smallest budget whose plan reaches a target incremental value.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use tracing::{debug, info};

use crate::allocator::Allocator;
use crate::config::{SearchConfig, UpliftConfig, ValueConfig};
use crate::types::{
    AllocationPlan, BudgetPoints, BudgetSearchResult, CandidateEvaluation, ChannelRange,
    EntityKey, Feasibility, ModelState, Posture, PostureValues, Result, SearchBounds,
    UpliftError,
};

/// Smallest sweep resolution.
pub const MIN_GRID_POINTS: usize = 5;

/// Sequential budget sweep over the allocator.
#[derive(Debug, Clone)]
pub struct BudgetTargetSearch {
    allocator: Allocator,
    search: SearchConfig,
    value: ValueConfig,
    step_pct_limit: f64,
}

impl BudgetTargetSearch {
    /// Create from the full configuration.
    pub fn from_config(config: &UpliftConfig) -> Self {
        Self {
            allocator: Allocator::from_config(config),
            search: config.search.clone(),
            value: config.value.clone(),
            step_pct_limit: config.allocator.step_pct_limit,
        }
    }

    /// Total-budget range reachable from the previous budgets.
    pub fn bounds(&self, state: &ModelState, previous: &BTreeMap<EntityKey, f64>) -> SearchBounds {
        let (mut min, mut max) = (0.0, 0.0);
        for key in state.entities.keys() {
            let prev = previous.get(key).copied().unwrap_or(0.0);
            let step = self.step_pct_limit * prev.max(1.0);
            min += (prev - step).max(0.0);
            max += prev + step;
        }
        SearchBounds {
            min,
            max: f64::max(max, min),
        }
    }

    /// Candidate total budgets, ascending.
    pub fn grid(&self, bounds: SearchBounds) -> Vec<f64> {
        if (bounds.max - bounds.min).abs() < 1e-9 {
            return vec![bounds.min];
        }
        let n = self.search.grid_points.max(MIN_GRID_POINTS);
        let span = bounds.max - bounds.min;
        (0..n)
            .map(|i| bounds.min + span * i as f64 / (n - 1) as f64)
            .collect()
    }

    /// Incremental value of a plan under each posture.
    pub fn evaluate(&self, plan: &AllocationPlan, state: &ModelState) -> PostureValues {
        let z = self.search.z_score;
        let mut values = PostureValues::default();
        for entry in &plan.entities {
            let Some(belief) = state.entities.get(&entry.entity_id) else {
                continue;
            };
            let g = belief.curve.saturation(entry.recommended_budget);
            let v = self.value.value_for(belief.outcome);
            values.expected += v * belief.mean * g;
            values.optimistic += v * (belief.mean + z * belief.sd).max(0.0) * g;
            values.conservative += v * (belief.mean - z * belief.sd).max(0.0) * g;
        }
        values
    }

    /// Find the budget points meeting `target` under each posture.
    ///
    /// Fails with [`UpliftError::NoEntities`] when the state is empty.
    pub fn run(
        &self,
        state: &ModelState,
        previous: &BTreeMap<EntityKey, f64>,
        target: f64,
        horizon: &str,
    ) -> Result<BudgetSearchResult> {
        if state.is_empty() {
            return Err(UpliftError::NoEntities(
                "no paid entities available for budget search".to_string(),
            ));
        }

        let bounds = self.bounds(state, previous);
        let mut sweep: Vec<(CandidateEvaluation, AllocationPlan)> = Vec::new();
        for budget in self.grid(bounds) {
            let plan = self
                .allocator
                .solve_for_budget(state, previous, budget, horizon);
            let values = self.evaluate(&plan, state);
            debug!(
                budget,
                expected = values.expected,
                conservative = values.conservative,
                "Evaluated candidate budget"
            );
            sweep.push((CandidateEvaluation { budget, values }, plan));
        }

        let first_hit = |posture: Posture| {
            sweep
                .iter()
                .position(|(c, _)| c.values.get(posture) >= target)
        };
        let optimistic = first_hit(Posture::Optimistic);
        let expected = first_hit(Posture::Expected);
        let conservative = first_hit(Posture::Conservative);

        let last = sweep.len() - 1;
        let expected_idx = expected.unwrap_or(last);
        let low_plan = &sweep[expected_idx].1;
        let high_plan = &sweep[conservative.unwrap_or(expected_idx)].1;

        let result = BudgetSearchResult {
            target_incremental_value: target,
            feasibility: Feasibility {
                optimistic: optimistic.is_some(),
                expected: expected.is_some(),
                conservative: conservative.is_some(),
            },
            budget_points: BudgetPoints {
                optimistic_budget: optimistic.map(|i| sweep[i].0.budget),
                expected_budget: sweep[expected_idx].0.budget,
                conservative_budget: conservative.map(|i| sweep[i].0.budget),
                search_bounds: bounds,
            },
            channel_budget_ranges: channel_ranges(low_plan, high_plan),
            candidates: sweep.iter().map(|(c, _)| *c).collect(),
        };

        info!(
            target,
            expected_budget = result.budget_points.expected_budget,
            expected_feasible = result.feasibility.expected,
            candidates = result.candidates.len(),
            "Budget search finished"
        );
        Ok(result)
    }

    /// Markdown summary of a search result.
    pub fn explain(&self, result: &BudgetSearchResult) -> String {
        let points = &result.budget_points;
        let mut out = String::from("# Optimal budget range for target incremental value\n\n");
        let _ = writeln!(out, "- Target incremental value: {:.2}", result.target_incremental_value);
        let _ = writeln!(
            out,
            "- Budget search bounds: [{:.2}, {:.2}]",
            points.search_bounds.min, points.search_bounds.max
        );
        let _ = writeln!(
            out,
            "- Optimistic budget point: {}",
            fmt_point(points.optimistic_budget)
        );
        let _ = writeln!(
            out,
            "- Expected budget point: {:.2}{}",
            points.expected_budget,
            if result.feasibility.expected {
                ""
            } else {
                " (fallback max budget; target not reached)"
            }
        );
        let _ = writeln!(
            out,
            "- Conservative budget point: {}",
            fmt_point(points.conservative_budget)
        );
        out.push_str("- Channel ranges span the expected-to-conservative plans.\n");
        out
    }
}

fn fmt_point(point: Option<f64>) -> String {
    point.map_or_else(|| "not reachable".to_string(), |b| format!("{b:.2}"))
}

/// Per-channel band between two plans, ordered so min <= max.
fn channel_ranges(low: &AllocationPlan, high: &AllocationPlan) -> Vec<ChannelRange> {
    let low = low.channel_totals();
    let high = high.channel_totals();
    let channels: BTreeSet<&String> = low.keys().chain(high.keys()).collect();
    channels
        .into_iter()
        .map(|ch| {
            let a = low.get(ch).copied().unwrap_or(0.0);
            let b = high.get(ch).copied().unwrap_or(a);
            ChannelRange {
                channel_id: ch.clone(),
                min_recommended: a.min(b),
                max_recommended: a.max(b),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CurveParams;
    use crate::types::{OutcomeKind, PosteriorBelief};

    fn belief(mean: f64, sd: f64) -> PosteriorBelief {
        PosteriorBelief {
            mean,
            sd,
            p_above_min: 1.0,
            information_score: 12.0,
            proxies_enabled: false,
            outcome: OutcomeKind::Revenue,
            curve: CurveParams::new(0.8, 50.0),
            last_bucket: None,
        }
    }

    fn fixture() -> (ModelState, BTreeMap<EntityKey, f64>) {
        let search = EntityKey::new("ga", "Paid Search", "brand");
        let social = EntityKey::new("ga", "Paid Social", "retarget");
        let state = ModelState {
            updated_at: None,
            entities: BTreeMap::from([
                (search.clone(), belief(0.05, 0.01)),
                (social.clone(), belief(0.03, 0.02)),
            ]),
        };
        let previous = BTreeMap::from([(search, 100.0), (social, 200.0)]);
        (state, previous)
    }

    #[test]
    fn test_bounds_from_previous_budgets() {
        let (state, previous) = fixture();
        let search = BudgetTargetSearch::from_config(&UpliftConfig::default());
        let bounds = search.bounds(&state, &previous);
        assert!((bounds.min - 285.0).abs() < 1e-9);
        assert!((bounds.max - 315.0).abs() < 1e-9);
        assert_eq!(search.grid(bounds).len(), 41);
    }

    #[test]
    fn test_zero_target_takes_first_grid_point() {
        let (state, previous) = fixture();
        let search = BudgetTargetSearch::from_config(&UpliftConfig::default());
        let result = search.run(&state, &previous, 0.0, "12h").unwrap();

        assert!(result.feasibility.expected);
        assert!(result.feasibility.conservative);
        assert_eq!(result.budget_points.expected_budget, result.candidates[0].budget);
        assert_eq!(result.budget_points.optimistic_budget, Some(result.candidates[0].budget));
    }

    #[test]
    fn test_unreachable_target_falls_back_to_max_budget() {
        let (state, previous) = fixture();
        let search = BudgetTargetSearch::from_config(&UpliftConfig::default());
        let result = search.run(&state, &previous, 1e9, "12h").unwrap();

        assert!(!result.feasibility.expected);
        assert!(!result.feasibility.optimistic);
        assert_eq!(result.budget_points.conservative_budget, None);
        let last = result.candidates.last().unwrap().budget;
        assert_eq!(result.budget_points.expected_budget, last);
        assert!(search.explain(&result).contains("target not reached"));
    }

    #[test]
    fn test_channel_ranges_ordered() {
        let (state, previous) = fixture();
        let search = BudgetTargetSearch::from_config(&UpliftConfig::default());
        let target = {
            let probe = search.run(&state, &previous, 0.0, "12h").unwrap();
            probe.candidates[probe.candidates.len() / 2].values.expected
        };
        let result = search.run(&state, &previous, target, "12h").unwrap();

        assert_eq!(result.channel_budget_ranges.len(), 2);
        for range in &result.channel_budget_ranges {
            assert!(range.min_recommended <= range.max_recommended);
        }
        assert!(result
            .candidates
            .windows(2)
            .all(|w| w[0].budget < w[1].budget));
    }

    #[test]
    fn test_postures_ordered() {
        let (state, previous) = fixture();
        let search = BudgetTargetSearch::from_config(&UpliftConfig::default());
        let result = search.run(&state, &previous, 0.0, "12h").unwrap();
        for c in &result.candidates {
            assert!(c.values.conservative <= c.values.expected + 1e-12);
            assert!(c.values.expected <= c.values.optimistic + 1e-12);
        }
    }

    #[test]
    fn test_degenerate_range_single_candidate() {
        let search = BudgetTargetSearch::from_config(&UpliftConfig::default());
        let bounds = SearchBounds { min: 10.0, max: 10.0 };
        assert_eq!(search.grid(bounds), vec![10.0]);
    }

    #[test]
    fn test_empty_state_is_error() {
        let search = BudgetTargetSearch::from_config(&UpliftConfig::default());
        let err = search
            .run(&ModelState::default(), &BTreeMap::new(), 10.0, "12h")
            .unwrap_err();
        assert!(matches!(err, UpliftError::NoEntities(_)));
    }
}
