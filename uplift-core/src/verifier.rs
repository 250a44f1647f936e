//! Post-hoc plan verification.
//!
//! Re-checks a finished plan against the contract the allocator must hold.
//! Hard findings mean the plan must not be applied; warnings are advisory.

use tracing::{info, warn};

use crate::config::UpliftConfig;
use crate::policy::PaidPredicate;
use crate::proxy::ProxyCatalog;
use crate::table::UnifiedTable;
use crate::types::{Alert, AlertKind, AllocationPlan, VerificationReport};

/// Read-only checker for allocation plans.
#[derive(Debug, Clone)]
pub struct PlanVerifier {
    budget_total: f64,
    step_pct_limit: f64,
    sigma_floor: f64,
    churn_limit: f64,
    budget_rel_tolerance: f64,
    low_signal_purchases: f64,
}

impl PlanVerifier {
    /// Create from the full configuration.
    pub fn from_config(config: &UpliftConfig) -> Self {
        Self {
            budget_total: config.constraints.budget_total,
            step_pct_limit: config.allocator.step_pct_limit,
            sigma_floor: config.proxy.sigma_floor,
            churn_limit: config.verify.churn_limit,
            budget_rel_tolerance: config.verify.budget_rel_tolerance,
            low_signal_purchases: config.verify.low_signal_purchases,
        }
    }

    /// Verify a plan. The plan and the inputs are not modified.
    pub fn verify<P: PaidPredicate + ?Sized>(
        &self,
        plan: &AllocationPlan,
        table: &UnifiedTable,
        catalog: &ProxyCatalog,
        predicate: &P,
    ) -> VerificationReport {
        let mut report = VerificationReport::default();

        let total: f64 = plan.entities.iter().map(|e| e.recommended_budget).sum();
        let target = self.budget_total;
        if (total - target).abs() > self.budget_rel_tolerance * target.max(1.0) {
            report.push(Alert::hard(
                AlertKind::BudgetTotalMismatch,
                format!("sum={total}, expected={target}"),
            ));
        }

        for entry in &plan.entities {
            if !predicate.is_paid(&entry.entity_id) {
                report.push(Alert::hard(
                    AlertKind::UnpaidChannelAllocation,
                    entry.entity_id.to_string(),
                ));
            }

            let step = self.step_pct_limit * entry.previous_budget.max(1.0);
            if (entry.recommended_budget - entry.previous_budget).abs() > step + 1e-9 {
                report.push(Alert::hard(
                    AlertKind::StepLimitViolation,
                    entry.entity_id.to_string(),
                ));
            }
        }

        if plan.totals.churn > self.churn_limit {
            report.push(Alert::hard(
                AlertKind::ChurnLimitViolation,
                format!("churn={:.4}", plan.totals.churn),
            ));
        }

        for (name, cred) in catalog {
            if cred.sigma <= self.sigma_floor {
                report.push(Alert::warn(
                    AlertKind::ProxyTooTrusted,
                    format!("{name} sigma={}", cred.sigma),
                ));
            }
        }

        if table.revenue_total() <= 0.0 && table.purchases_total() < self.low_signal_purchases {
            report.push(Alert::warn(
                AlertKind::VeryLowSignal,
                "outcomes sparse; allocator will mostly hold due to gating",
            ));
        }

        if report.hard_fail {
            warn!(alerts = report.alerts.len(), "Plan failed verification");
        } else {
            info!(alerts = report.alerts.len(), "Plan verified");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ChannelPolicy;
    use crate::proxy::ProxyCredibility;
    use crate::table::BucketRow;
    use crate::types::{EntityAllocation, EntityKey, PlanTotals, PosteriorSnapshot, Severity};
    use chrono::{TimeZone, Utc};

    fn snapshot() -> PosteriorSnapshot {
        PosteriorSnapshot {
            mean: 0.02,
            sd: 0.03,
            p_above_min: 0.5,
        }
    }

    fn plan(entries: &[(&str, f64, f64)], budget: f64, churn: f64) -> AllocationPlan {
        let entities: Vec<EntityAllocation> = entries
            .iter()
            .map(|(id, rec, prev)| {
                EntityAllocation::new(EntityKey::parse(id).unwrap(), *rec, *prev, vec![], snapshot())
            })
            .collect();
        let allocated = entities.iter().map(|e| e.recommended_budget).sum::<f64>();
        AllocationPlan {
            horizon: "12h".to_string(),
            totals: PlanTotals {
                budget_total: budget,
                budget_allocated: allocated,
                budget_gap: budget - allocated,
                churn,
            },
            entities,
        }
    }

    fn signal_table() -> UnifiedTable {
        let t = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
        UnifiedTable::new(vec![BucketRow::new(
            t,
            EntityKey::new("ga", "A", "c1"),
            100.0,
            10.0,
            50.0,
        )])
    }

    fn verifier(budget: f64) -> PlanVerifier {
        let mut config = UpliftConfig::default();
        config.constraints.budget_total = budget;
        PlanVerifier::from_config(&config)
    }

    #[test]
    fn test_budget_mismatch_is_hard() {
        let plan = plan(&[("ga|A|c1", 10.0, 10.0)], 20.0, 0.0);
        let t = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
        let table = UnifiedTable::new(vec![BucketRow::new(t, EntityKey::new("ga", "A", "c1"), 1.0, 1.0, 0.0)]);

        let everything_paid = |_: &EntityKey| true;
        let report = verifier(20.0).verify(&plan, &table, &ProxyCatalog::new(), &everything_paid);
        assert!(report.hard_fail);
        assert!(report.has(AlertKind::BudgetTotalMismatch));
    }

    #[test]
    fn test_clean_plan_passes() {
        let plan = plan(
            &[("ga|Paid Search|a", 102.0, 100.0), ("ga|Paid Search|b", 98.0, 100.0)],
            200.0,
            0.02,
        );
        let report = verifier(200.0).verify(&plan, &signal_table(), &ProxyCatalog::new(), &ChannelPolicy::default());
        assert!(!report.hard_fail);
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn test_step_violation_and_unpaid_entity() {
        let plan = plan(
            &[("ga|Paid Search|a", 150.0, 100.0), ("ga|Organic Search|b", 50.0, 100.0)],
            200.0,
            0.0,
        );
        let report = verifier(200.0).verify(&plan, &signal_table(), &ProxyCatalog::new(), &ChannelPolicy::default());
        assert!(report.hard_fail);
        assert!(report.has(AlertKind::StepLimitViolation));
        assert!(report.has(AlertKind::UnpaidChannelAllocation));
        assert!(!report.has(AlertKind::BudgetTotalMismatch));
    }

    #[test]
    fn test_churn_limit() {
        let plan = plan(&[("ga|Paid Search|a", 100.0, 100.0)], 100.0, 0.25);
        let report = verifier(100.0).verify(&plan, &signal_table(), &ProxyCatalog::new(), &ChannelPolicy::default());
        assert!(report.hard_fail);
        assert!(report.has(AlertKind::ChurnLimitViolation));
    }

    #[test]
    fn test_soft_findings_do_not_fail() {
        let plan = plan(&[("ga|Paid Search|a", 100.0, 100.0)], 100.0, 0.0);
        let mut catalog = ProxyCatalog::new();
        catalog.insert(
            "proxy_clicks".to_string(),
            ProxyCredibility {
                sigma: 1.0,
                tau: 0.03,
                missing_rate: 0.0,
                lead_outcome_corr: 0.9,
            },
        );
        let t = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
        let quiet = UnifiedTable::new(vec![BucketRow::new(t, EntityKey::new("ga", "A", "c1"), 0.0, 2.0, 0.0)]);

        let report = verifier(100.0).verify(&plan, &quiet, &catalog, &ChannelPolicy::default());
        assert!(!report.hard_fail);
        assert!(report.has(AlertKind::ProxyTooTrusted));
        assert!(report.has(AlertKind::VeryLowSignal));
        assert!(report.alerts.iter().all(|a| a.severity == Severity::Warn));
    }

    #[test]
    fn test_verification_is_idempotent() {
        let plan = plan(&[("ga|Organic|a", 90.0, 100.0)], 100.0, 0.3);
        let before = plan.clone();
        let verifier = verifier(100.0);
        let policy = ChannelPolicy::default();
        let first = verifier.verify(&plan, &signal_table(), &ProxyCatalog::new(), &policy);
        let second = verifier.verify(&plan, &signal_table(), &ProxyCatalog::new(), &policy);
        assert_eq!(first, second);
        assert_eq!(plan, before);
    }
}
