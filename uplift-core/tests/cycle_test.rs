//! Full-cycle integration tests: table -> proxies -> beliefs -> plan -> checks

use chrono::{Duration, TimeZone, Utc};
use std::collections::BTreeMap;

use uplift_core::{
    Allocator, BucketRow, BudgetTargetSearch, ChannelPolicy, EntityKey, ModelState,
    PlanVerifier, ProxyCatalog, ProxyCredibilityTracker, UnifiedTable, UpliftConfig,
    UpliftEstimator,
};

fn table(days: i64) -> UnifiedTable {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let entities = [
        EntityKey::new("ga", "Paid Search", "brand"),
        EntityKey::new("ga", "Paid Social", "prospecting"),
        EntityKey::new("ga", "Direct", "(none)"),
    ];
    let mut rows = Vec::new();
    for bucket in 0..days * 2 {
        let at = start + Duration::hours(12 * bucket);
        for (i, key) in entities.iter().enumerate() {
            let spend = 80.0 + 20.0 * i as f64;
            let revenue = 10.0 + (bucket % 4) as f64 + 3.0 * i as f64;
            rows.push(
                BucketRow::new(at, key.clone(), revenue, 1.0, spend)
                    .with_proxy("proxy_clicks", Some(revenue * 2.0)),
            );
        }
    }
    UnifiedTable::new(rows)
}

fn config() -> UpliftConfig {
    let mut config = UpliftConfig::default();
    config.constraints.budget_total = 5000.0;
    config.allocator.alpha_gate = 1.0;
    config
}

#[test]
fn test_full_cycle_produces_verified_plan() {
    let config = config();
    let table = table(14);
    let policy = ChannelPolicy::from_config(&config.channel_policy);

    let catalog = ProxyCredibilityTracker::from_config(&config)
        .evaluate(&table, &ProxyCatalog::new())
        .catalog;
    let out = UpliftEstimator::from_config(&config).update(&table, &ModelState::default(), &catalog);
    assert_eq!(out.diagnostics.n_entities, 3);

    let state = out.state.retain_paid(&policy);
    assert_eq!(state.entities.len(), 2);

    let plan = Allocator::from_config(&config).solve(&state, &BTreeMap::new(), "12h");
    assert!((plan.totals.budget_allocated - 5000.0).abs() < 1e-6);

    let report = PlanVerifier::from_config(&config).verify(&plan, &table, &catalog, &policy);
    assert!(!report.hard_fail, "alerts: {:?}", report.alerts);
}

#[test]
fn test_beliefs_carry_across_cycles() {
    let config = config();
    let estimator = UpliftEstimator::from_config(&config);
    let catalog = ProxyCatalog::new();

    let first = estimator.update(&table(7), &ModelState::default(), &catalog).state;
    let second = estimator.update(&table(14), &first, &catalog).state;

    for (key, belief) in &second.entities {
        assert!(belief.sd > 0.0);
        assert!(belief.mean >= 0.0 && belief.mean <= config.model.grid_max);
        assert!(first.entities.contains_key(key));
    }
}

#[test]
fn test_search_and_allocator_agree_at_expected_budget() {
    let config = config();
    let table = table(14);
    let policy = ChannelPolicy::default();
    let state = UpliftEstimator::from_config(&config)
        .update(&table, &ModelState::default(), &ProxyCatalog::new())
        .state
        .retain_paid(&policy);

    let previous = Allocator::from_config(&config)
        .solve(&state, &BTreeMap::new(), "12h")
        .budget_map();

    let search = BudgetTargetSearch::from_config(&config);
    let result = search.run(&state, &previous, 0.0, "12h").unwrap();
    let bounds = result.budget_points.search_bounds;
    assert!(bounds.min <= result.budget_points.expected_budget);
    assert!(result.budget_points.expected_budget <= bounds.max);

    let plan = Allocator::from_config(&config).solve_for_budget(
        &state,
        &previous,
        result.budget_points.expected_budget,
        "12h",
    );
    let value = search.evaluate(&plan, &state);
    assert_eq!(value, result.candidates[0].values);
}
