//! Constrained greedy budget allocator.
//!
//! Budget is handed out in quanta to whichever entity gains the most from
//! the next quantum under a risk- and inertia-adjusted objective. Bounds,
//! step limits and channel caps limit which entities may take a quantum;
//! an uncertainty gate then rejects increases the belief cannot support.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, info};

use crate::config::{AllocatorConfig, ConstraintsConfig, UpliftConfig, ValueConfig};
use crate::curve::CurveParams;
use crate::policy::channel_of;
use crate::types::{
    AllocationPlan, BindingConstraint, EntityAllocation, EntityKey, ModelState, PlanTotals,
    PosteriorBelief,
};

const TOL: f64 = 1e-9;

/// Working state of one entity during a solve.
#[derive(Debug, Clone)]
struct Slot<'a> {
    key: &'a EntityKey,
    belief: &'a PosteriorBelief,
    channel: String,
    value: f64,
    prev: f64,
    lo: f64,
    hi: f64,
    budget: f64,
}

impl Slot<'_> {
    fn curve(&self) -> CurveParams {
        self.belief.curve
    }

    fn headroom(&self) -> f64 {
        (self.hi - self.budget).max(0.0)
    }
}

/// Greedy quantized allocator.
#[derive(Debug, Clone)]
pub struct Allocator {
    params: AllocatorConfig,
    constraints: ConstraintsConfig,
    value: ValueConfig,
}

impl Allocator {
    /// Create from the full configuration.
    pub fn from_config(config: &UpliftConfig) -> Self {
        Self {
            params: config.allocator.clone(),
            constraints: config.constraints.clone(),
            value: config.value.clone(),
        }
    }

    /// Allocate the configured `budget_total`.
    pub fn solve(
        &self,
        state: &ModelState,
        previous: &BTreeMap<EntityKey, f64>,
        horizon: &str,
    ) -> AllocationPlan {
        self.solve_for_budget(state, previous, self.constraints.budget_total, horizon)
    }

    /// Allocate an explicit total budget.
    pub fn solve_for_budget(
        &self,
        state: &ModelState,
        previous: &BTreeMap<EntityKey, f64>,
        budget: f64,
        horizon: &str,
    ) -> AllocationPlan {
        if state.is_empty() {
            info!(budget, "No entities to allocate");
            return AllocationPlan::empty(budget, horizon);
        }

        let prev = self.previous_budgets(state, previous, budget);
        let mut slots: Vec<Slot<'_>> = state
            .entities
            .iter()
            .map(|(key, belief)| {
                let b_prev = prev.get(key).copied().unwrap_or(0.0);
                let (lo, hi) = self.effective_bounds(key, b_prev);
                Slot {
                    key,
                    belief,
                    channel: channel_of(key).to_string(),
                    value: self.value.value_for(belief.outcome),
                    prev: b_prev,
                    lo,
                    hi,
                    budget: lo,
                }
            })
            .collect();

        let mut channel_spend: BTreeMap<String, f64> = BTreeMap::new();
        for slot in &slots {
            *channel_spend.entry(slot.channel.clone()).or_insert(0.0) += slot.budget;
        }

        let floor_total: f64 = slots.iter().map(|s| s.budget).sum();
        let mut remaining = (budget - floor_total).max(0.0);
        let quantum = (budget / f64::from(self.params.quanta.max(1))).max(1.0);
        let mut steps = 0usize;

        while remaining > TOL {
            let inc = quantum.min(remaining);
            let pick = self
                .best_gain(&slots, &channel_spend, inc)
                .or_else(|| self.largest_slack(&slots, &channel_spend, inc));

            let (idx, amount) = match pick {
                Some(idx) => (idx, inc),
                None => match self.top_up_target(&slots, &channel_spend) {
                    Some((idx, room)) => (idx, room.min(remaining)),
                    None => break,
                },
            };

            slots[idx].budget += amount;
            *channel_spend.entry(slots[idx].channel.clone()).or_insert(0.0) += amount;
            remaining -= amount;
            steps += 1;
        }

        debug!(steps, quantum, remaining, "Greedy fill finished");

        let plan = self.finish(&slots, &channel_spend, budget, horizon);
        info!(
            budget_total = plan.totals.budget_total,
            allocated = plan.totals.budget_allocated,
            gap = plan.totals.budget_gap,
            churn = plan.totals.churn,
            entities = plan.entities.len(),
            "Allocation solved"
        );
        plan
    }

    /// Previous budget per entity, bootstrapped on cold start.
    ///
    /// With no known previous spend, the budget is split proportionally to
    /// `1 + mean` so the first cycle starts from a feasible point.
    pub fn previous_budgets(
        &self,
        state: &ModelState,
        previous: &BTreeMap<EntityKey, f64>,
        budget: f64,
    ) -> BTreeMap<EntityKey, f64> {
        let known: f64 = state
            .entities
            .keys()
            .map(|k| previous.get(k).copied().unwrap_or(0.0))
            .sum();

        if known > TOL {
            return state
                .entities
                .keys()
                .map(|k| (k.clone(), previous.get(k).copied().unwrap_or(0.0)))
                .collect();
        }

        let weights: Vec<(&EntityKey, f64)> = state
            .entities
            .iter()
            .map(|(k, b)| (k, b.mean.max(1e-6) + 1.0))
            .collect();
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        debug!(entities = weights.len(), budget, "Cold start: bootstrapping previous budgets");
        weights
            .into_iter()
            .map(|(k, w)| (k.clone(), budget * w / total.max(TOL)))
            .collect()
    }

    /// Step size allowed around a previous budget.
    pub fn step_size(&self, previous: f64) -> f64 {
        self.params.step_pct_limit * previous.max(1.0)
    }

    /// Step-limited interval intersected with configured bounds.
    ///
    /// An empty intersection collapses to its lower end.
    pub fn effective_bounds(&self, key: &EntityKey, previous: f64) -> (f64, f64) {
        let step = self.step_size(previous);
        let (min_b, max_b) = self.constraints.bounds_for(key);
        let lo = (previous - step).max(0.0).max(min_b);
        let hi = (previous + step).min(max_b);
        (lo, hi.max(lo))
    }

    /// Risk- and inertia-adjusted objective of one entity at budget `b`.
    fn objective(&self, slot: &Slot<'_>, b: f64) -> f64 {
        let sat = slot.curve().saturation(b);
        let incremental = slot.value * slot.belief.mean * sat;
        let uncertainty = slot.value * slot.belief.sd * sat;
        incremental
            - self.params.gamma_risk * uncertainty
            - self.params.lambda_inertia * (b - slot.prev).powi(2)
    }

    fn can_add(&self, slot: &Slot<'_>, channel_spend: &BTreeMap<String, f64>, add: f64) -> bool {
        if slot.budget + add > slot.hi + TOL {
            return false;
        }
        let cap = self.constraints.channel_cap(&slot.channel);
        let spent = channel_spend.get(&slot.channel).copied().unwrap_or(0.0);
        spent + add <= cap + TOL
    }

    /// Eligible entity with the largest positive marginal gain; first wins ties.
    fn best_gain(
        &self,
        slots: &[Slot<'_>],
        channel_spend: &BTreeMap<String, f64>,
        inc: f64,
    ) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, slot) in slots.iter().enumerate() {
            if !self.can_add(slot, channel_spend, inc) {
                continue;
            }
            let gain = self.objective(slot, slot.budget + inc) - self.objective(slot, slot.budget);
            if best.map_or(true, |(_, g)| gain > g) {
                best = Some((idx, gain));
            }
        }
        best.filter(|(_, g)| *g > 0.0).map(|(idx, _)| idx)
    }

    /// Force-fill: eligible entity with the most slack to its upper bound.
    fn largest_slack(
        &self,
        slots: &[Slot<'_>],
        channel_spend: &BTreeMap<String, f64>,
        inc: f64,
    ) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, slot) in slots.iter().enumerate() {
            if !self.can_add(slot, channel_spend, inc) {
                continue;
            }
            let slack = slot.headroom();
            if best.map_or(true, |(_, s)| slack > s) {
                best = Some((idx, slack));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Entity that can still absorb a partial increment, with its room.
    fn top_up_target(
        &self,
        slots: &[Slot<'_>],
        channel_spend: &BTreeMap<String, f64>,
    ) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, slot) in slots.iter().enumerate() {
            let cap = self.constraints.channel_cap(&slot.channel);
            let spent = channel_spend.get(&slot.channel).copied().unwrap_or(0.0);
            let room = slot.headroom().min((cap - spent).max(0.0));
            if room > TOL && best.map_or(true, |(_, r)| room > r) {
                best = Some((idx, room));
            }
        }
        best
    }

    /// Apply the uncertainty gate and assemble the plan.
    fn finish(
        &self,
        slots: &[Slot<'_>],
        channel_spend: &BTreeMap<String, f64>,
        budget: f64,
        horizon: &str,
    ) -> AllocationPlan {
        let confidence = 1.0 - self.params.alpha_gate;
        let mut entities = Vec::with_capacity(slots.len());
        let (mut churn_num, mut churn_den) = (0.0, 0.0);

        for slot in slots {
            let mut recommended = slot.budget;
            let mut bindings = Vec::new();

            if recommended > slot.prev + TOL && slot.belief.p_above_min < confidence {
                recommended = slot.prev.clamp(slot.lo, slot.hi);
                bindings.push(BindingConstraint::UncertaintyGate);
                debug!(
                    entity = %slot.key,
                    p_above_min = slot.belief.p_above_min,
                    reverted_to = recommended,
                    "Uncertainty gate rejected increase"
                );
            } else {
                if slot.hi > slot.lo + TOL && recommended >= slot.hi - TOL {
                    bindings.push(BindingConstraint::UpperBound);
                }
                let cap = self.constraints.channel_cap(&slot.channel);
                let spent = channel_spend.get(&slot.channel).copied().unwrap_or(0.0);
                if cap.is_finite() && spent >= cap - TOL && recommended < slot.hi - TOL {
                    bindings.push(BindingConstraint::ChannelCap);
                }
            }

            churn_num += (recommended - slot.prev).abs();
            churn_den += slot.prev.max(TOL);

            entities.push(EntityAllocation::new(
                slot.key.clone(),
                recommended,
                slot.prev,
                bindings,
                slot.belief.snapshot(),
            ));
        }

        let allocated: f64 = entities.iter().map(|e| e.recommended_budget).sum();
        AllocationPlan {
            horizon: horizon.to_string(),
            totals: PlanTotals {
                budget_total: budget,
                budget_allocated: allocated,
                budget_gap: budget - allocated,
                churn: churn_num / churn_den.max(TOL),
            },
            entities,
        }
    }

    /// Markdown summary of a plan.
    pub fn explain(&self, plan: &AllocationPlan) -> String {
        let mut out = String::from("# Allocation explanation\n\n");
        let t = &plan.totals;
        let _ = writeln!(out, "- Horizon: {}", plan.horizon);
        let _ = writeln!(out, "- Total budget target: {:.2}", t.budget_total);
        if plan.entities.is_empty() {
            out.push_str("- No paid entities available.\n");
            return out;
        }
        let _ = writeln!(out, "- Allocated: {:.2}", t.budget_allocated);
        let _ = writeln!(out, "- Budget gap: {:.2}", t.budget_gap);
        let _ = writeln!(out, "- Churn: {:.4}", t.churn);
        out.push_str("- Objective: outcome uplift (proxies secondary; gated)\n");
        let _ = writeln!(
            out,
            "- Controls: uncertainty gate (alpha {:.2}), step limit {:.0}%, risk {:.2}, inertia {:.2}, bounds/caps",
            self.params.alpha_gate,
            self.params.step_pct_limit * 100.0,
            self.params.gamma_risk,
            self.params.lambda_inertia,
        );

        let gated: Vec<&EntityAllocation> = plan
            .entities
            .iter()
            .filter(|e| e.binding_constraints.contains(&BindingConstraint::UncertaintyGate))
            .collect();
        if !gated.is_empty() {
            out.push_str("\n## Held by uncertainty gate\n\n");
            for e in gated {
                let _ = writeln!(
                    out,
                    "- {} (p_above_min {:.3})",
                    e.entity_id, e.posterior_snapshot.p_above_min
                );
            }
        }
        out
    }
}
