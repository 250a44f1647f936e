//! Scheduled-run pipeline.
//!
//! Each step reads the prior snapshot it depends on from the artifact
//! directory, runs one core component and writes a new snapshot. `run`
//! chains proxies, model, allocate and verify, and optionally the budget
//! search.

use std::collections::BTreeMap;
use tracing::{info, warn};

use uplift_core::{
    Allocator, AllocationPlan, BudgetSearchResult, BudgetTargetSearch, ChannelPolicy, EntityKey,
    ModelState, PlanVerifier, ProxyCatalog, ProxyCredibilityTracker, ShareAllocator,
    UnifiedTable, UpliftEstimator, VerificationReport,
};

use crate::config::NodeConfig;
use crate::store::{ArtifactStore, RunManifest};
use crate::table_io::read_table;

pub const PROXIES_CATALOG: &str = "proxies_catalog.json";
pub const PROXY_REPORT: &str = "proxy_report.md";
pub const MODEL_STATE: &str = "model_state.json";
pub const FIT_DIAGNOSTICS: &str = "fit_diagnostics.json";
pub const ALLOCATION_PLAN: &str = "allocation_plan.json";
pub const ALLOCATION_EXPLANATIONS: &str = "allocation_explanations.md";
pub const ALERTS: &str = "alerts.json";
pub const OPTIMAL_BUDGET_RANGE: &str = "optimal_budget_range.json";
pub const OPTIMAL_BUDGET_EXPLANATIONS: &str = "optimal_budget_explanations.md";

/// Outcome of a full `run`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub plan: AllocationPlan,
    pub report: VerificationReport,
    pub search: Option<BudgetSearchResult>,
}

/// One pipeline invocation over an artifact directory.
pub struct Pipeline {
    config: NodeConfig,
    policy: ChannelPolicy,
    store: ArtifactStore,
}

impl Pipeline {
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let store = ArtifactStore::open(config.runner.artifacts_dir.clone())?;
        let policy = ChannelPolicy::from_config(&config.uplift.channel_policy);
        Ok(Self {
            config,
            policy,
            store,
        })
    }

    pub fn load_table(&self) -> anyhow::Result<UnifiedTable> {
        read_table(&self.config.runner.table_path)
    }

    /// Re-evaluate proxy credibility.
    pub fn proxies(&mut self, table: &UnifiedTable) -> anyhow::Result<ProxyCatalog> {
        let prior: ProxyCatalog = self.store.read_json_or_default(PROXIES_CATALOG)?;
        let eval = ProxyCredibilityTracker::from_config(&self.config.uplift).evaluate(table, &prior);
        self.store.write_json(PROXIES_CATALOG, &eval.catalog)?;
        self.store.write_text(PROXY_REPORT, &eval.report)?;
        Ok(eval.catalog)
    }

    /// Update the belief snapshot.
    pub fn model(&mut self, table: &UnifiedTable) -> anyhow::Result<ModelState> {
        let catalog: ProxyCatalog = self.store.read_json_or_default(PROXIES_CATALOG)?;
        let prior: ModelState = self.store.read_json_or_default(MODEL_STATE)?;
        let out = UpliftEstimator::from_config(&self.config.uplift).update(table, &prior, &catalog);
        if out.is_empty() {
            info!("No entities in fit window");
        }
        self.store.write_json(MODEL_STATE, &out.state)?;
        self.store.write_json(FIT_DIAGNOSTICS, &out.diagnostics)?;
        Ok(out.state)
    }

    /// Produce and verify a new allocation plan.
    ///
    /// Without registered ad entities the share-based fallback is used.
    pub fn allocate(
        &mut self,
        table: &UnifiedTable,
        horizon: &str,
    ) -> anyhow::Result<(AllocationPlan, VerificationReport)> {
        let budget = self.config.uplift.constraints.budget_total;

        let (plan, explanation) = if self.config.has_ad_entities() {
            let state = self.paid_state()?;
            let previous = self.previous_budgets()?;
            let allocator = Allocator::from_config(&self.config.uplift);
            let plan = allocator.solve(&state, &previous, horizon);
            let explanation = allocator.explain(&plan);
            (plan, explanation)
        } else {
            info!("No ad entities registered; using share-based allocation");
            let fallback = ShareAllocator::new();
            let plan = fallback.allocate(table, budget, &self.policy, horizon)?;
            let explanation = fallback.explain(&plan, table);
            (plan, explanation)
        };

        self.store.write_json(ALLOCATION_PLAN, &plan)?;
        self.store.write_text(ALLOCATION_EXPLANATIONS, &explanation)?;

        let report = self.verify_plan(&plan, table)?;
        Ok((plan, report))
    }

    /// Verify the stored plan against the current inputs.
    pub fn verify(&mut self, table: &UnifiedTable) -> anyhow::Result<VerificationReport> {
        let plan: AllocationPlan = self.store.read_json_or_default(ALLOCATION_PLAN)?;
        self.verify_plan(&plan, table)
    }

    fn verify_plan(
        &mut self,
        plan: &AllocationPlan,
        table: &UnifiedTable,
    ) -> anyhow::Result<VerificationReport> {
        let catalog: ProxyCatalog = self.store.read_json_or_default(PROXIES_CATALOG)?;
        let report = PlanVerifier::from_config(&self.config.uplift).verify(plan, table, &catalog, &self.policy);
        if report.hard_fail {
            warn!(alerts = report.alerts.len(), "Plan has hard violations");
        }
        self.store.write_json(ALERTS, &report)?;
        Ok(report)
    }

    /// Search for the budget range reaching `target`.
    pub fn optimize_budget(
        &mut self,
        target: f64,
        horizon: &str,
    ) -> anyhow::Result<BudgetSearchResult> {
        let state = self.paid_state()?;
        let previous = self.previous_budgets()?;
        let search = BudgetTargetSearch::from_config(&self.config.uplift);
        let result = search.run(&state, &previous, target, horizon)?;
        self.store.write_json(OPTIMAL_BUDGET_RANGE, &result)?;
        self.store.write_text(OPTIMAL_BUDGET_EXPLANATIONS, &search.explain(&result))?;
        Ok(result)
    }

    /// Full cycle: proxies, model, allocate, verify, optional search.
    pub fn run(&mut self, horizon: &str, target: Option<f64>) -> anyhow::Result<RunSummary> {
        let table = self.load_table()?;
        self.proxies(&table)?;
        self.model(&table)?;
        let (plan, report) = self.allocate(&table, horizon)?;
        let search = match target {
            Some(target) => Some(self.optimize_budget(target, horizon)?),
            None => None,
        };
        Ok(RunSummary {
            plan,
            report,
            search,
        })
    }

    /// Write the run manifest.
    pub fn finish(self, command: &str) -> anyhow::Result<RunManifest> {
        self.store.finish(command)
    }

    fn paid_state(&self) -> anyhow::Result<ModelState> {
        let state: ModelState = self.store.read_json_or_default(MODEL_STATE)?;
        Ok(state.retain_paid(&self.policy))
    }

    fn previous_budgets(&self) -> anyhow::Result<BTreeMap<EntityKey, f64>> {
        let plan: AllocationPlan = self.store.read_json_or_default(ALLOCATION_PLAN)?;
        Ok(plan.budget_map())
    }
}
