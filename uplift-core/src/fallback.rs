//! Share-based allocation used when no spend-level model is available.
//!
//! Without ad-account entities there is no spend to fit a response curve
//! to, so the budget is split by smoothed outcome shares and every entity
//! is held at its share.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::info;

use crate::policy::PaidPredicate;
use crate::table::UnifiedTable;
use crate::types::{
    AllocationPlan, BindingConstraint, EntityAllocation, EntityKey, PlanTotals,
    PosteriorSnapshot, Result, UpliftError,
};

/// Splits a budget across paid entities by `outcome_sum + 1` weights.
#[derive(Debug, Clone, Default)]
pub struct ShareAllocator;

impl ShareAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Allocate `budget` over the paid entities of `table`.
    ///
    /// An empty table gives an empty plan; a table with no paid entity is
    /// an error.
    pub fn allocate<P: PaidPredicate + ?Sized>(
        &self,
        table: &UnifiedTable,
        budget: f64,
        predicate: &P,
        horizon: &str,
    ) -> Result<AllocationPlan> {
        if table.is_empty() {
            info!(budget, "Empty table; share plan has no entities");
            return Ok(AllocationPlan::empty(budget, horizon));
        }

        let outcome = table.outcome_kind();
        let mut sums: BTreeMap<&EntityKey, f64> = BTreeMap::new();
        for row in table.rows() {
            if predicate.is_paid(&row.entity) {
                *sums.entry(&row.entity).or_insert(0.0) += row.outcome(outcome);
            }
        }
        if sums.is_empty() {
            return Err(UpliftError::NoEntities(
                "no paid entities found; allocation only supports paid channels".to_string(),
            ));
        }

        let total_weight: f64 = sums.values().map(|s| s + 1.0).sum();
        let zero = PosteriorSnapshot {
            mean: 0.0,
            sd: 0.0,
            p_above_min: 0.0,
        };
        let entities: Vec<EntityAllocation> = sums
            .into_iter()
            .map(|(key, sum)| {
                let share = budget * (sum + 1.0) / total_weight;
                EntityAllocation::new(
                    key.clone(),
                    share,
                    share,
                    vec![BindingConstraint::ShareFallback],
                    zero,
                )
            })
            .collect();

        let allocated: f64 = entities.iter().map(|e| e.recommended_budget).sum();
        info!(
            budget,
            entities = entities.len(),
            outcome = outcome.as_str(),
            "Share-based plan built"
        );
        Ok(AllocationPlan {
            horizon: horizon.to_string(),
            totals: PlanTotals {
                budget_total: budget,
                budget_allocated: allocated,
                budget_gap: budget - allocated,
                churn: 0.0,
            },
            entities,
        })
    }

    /// Markdown summary of a share plan.
    pub fn explain(&self, plan: &AllocationPlan, table: &UnifiedTable) -> String {
        let mut out = String::from("# Share-based allocation (no ad accounts registered)\n\n");
        let _ = writeln!(out, "- Total budget: {:.2}", plan.totals.budget_total);
        if plan.entities.is_empty() {
            out.push_str("- Outcome basis: none (no rows)\n");
            return out;
        }
        let _ = writeln!(out, "- Outcome basis: {}", table.outcome_kind().as_str());
        out.push_str("- Method: smoothed outcome shares, every entity held.\n");
        out.push_str("- Register ad-account entities to enable spend-level modeling.\n");
        out
    }
}
