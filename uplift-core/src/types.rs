//! Core types for the uplift allocator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::curve::CurveParams;
use crate::policy::PaidPredicate;

/// Composite identity of an addressable spend unit.
///
/// The `source|channel|campaign` string form exists only at I/O and
/// logging boundaries; in memory the key is always the typed record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EntityKey {
    /// Data source (e.g. the analytics property)
    pub source: String,
    /// Channel the entity belongs to; used for caps and aggregation
    pub channel: String,
    /// Campaign within the channel
    pub campaign: String,
}

impl EntityKey {
    /// Separator used by the boundary string form.
    pub const SEPARATOR: char = '|';

    /// Create a new key.
    pub fn new(
        source: impl Into<String>,
        channel: impl Into<String>,
        campaign: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            channel: channel.into(),
            campaign: campaign.into(),
        }
    }

    /// Parse the `source|channel|campaign` boundary form.
    ///
    /// The campaign component may itself contain the separator.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(3, Self::SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(source), Some(channel), Some(campaign)) if !source.is_empty() => {
                Ok(Self::new(source, channel, campaign))
            }
            _ => Err(UpliftError::InvalidEntityId(raw.to_string())),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.source,
            self.channel,
            self.campaign,
            sep = Self::SEPARATOR
        )
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for EntityKey {
    type Error = UpliftError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

/// Which outcome column drives the model this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Attributed revenue
    #[default]
    Revenue,
    /// Purchase count
    Purchases,
}

impl OutcomeKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Revenue => "revenue",
            OutcomeKind::Purchases => "purchases",
        }
    }
}

/// Posterior belief about one entity's uplift-per-spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorBelief {
    /// Posterior mean uplift
    pub mean: f64,
    /// Posterior standard deviation
    pub sd: f64,
    /// Probability that true uplift exceeds the minimum-viability threshold
    pub p_above_min: f64,
    /// Evidence volume behind this belief
    pub information_score: f64,
    /// Whether proxy signals were incorporated this cycle
    pub proxies_enabled: bool,
    /// Outcome column the belief was fitted on
    pub outcome: OutcomeKind,
    /// Response curve fitted for this entity
    pub curve: CurveParams,
    /// Last bucket observed for this entity
    pub last_bucket: Option<DateTime<Utc>>,
}

impl PosteriorBelief {
    /// Compact view carried inside allocation plans.
    pub fn snapshot(&self) -> PosteriorSnapshot {
        PosteriorSnapshot {
            mean: self.mean,
            sd: self.sd,
            p_above_min: self.p_above_min,
        }
    }
}

/// Per-entity belief snapshot produced by one model-update cycle.
///
/// The previous snapshot is the prior of the next cycle; nothing older
/// is retained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    /// Last bucket covered by the update
    pub updated_at: Option<DateTime<Utc>>,
    /// Beliefs keyed by entity
    #[serde(default)]
    pub entities: BTreeMap<EntityKey, PosteriorBelief>,
}

impl ModelState {
    /// Whether the state holds no entity.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Keep only entities accepted by the paid predicate.
    pub fn retain_paid<P: PaidPredicate + ?Sized>(&self, predicate: &P) -> ModelState {
        ModelState {
            updated_at: self.updated_at,
            entities: self
                .entities
                .iter()
                .filter(|(key, _)| predicate.is_paid(key))
                .map(|(key, belief)| (key.clone(), belief.clone()))
                .collect(),
        }
    }
}

/// Diagnostics emitted alongside a model update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// Outcome column chosen for the cycle
    pub outcome: OutcomeKind,
    /// Fit window length in days
    pub fit_window_days: u32,
    /// Number of entities updated
    pub n_entities: usize,
    /// Last bucket in the window
    pub last_bucket: Option<DateTime<Utc>>,
}

/// Mean/sd/threshold-probability copied into a plan entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSnapshot {
    pub mean: f64,
    pub sd: f64,
    pub p_above_min: f64,
}

/// Direction of a recommended change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// Budget unchanged
    Hold,
    /// Budget raised
    Increase,
    /// Budget lowered
    Decrease,
}

impl GateStatus {
    /// Classify a change from `previous` to `recommended`.
    pub fn classify(previous: f64, recommended: f64) -> Self {
        if (recommended - previous).abs() < 1e-9 {
            GateStatus::Hold
        } else if recommended > previous {
            GateStatus::Increase
        } else {
            GateStatus::Decrease
        }
    }
}

/// Constraint that shaped an entity's recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingConstraint {
    /// Increase rejected because the belief is not confident enough
    UncertaintyGate,
    /// Budget sits at the entity's effective upper bound
    UpperBound,
    /// The entity's channel has no remaining cap
    ChannelCap,
    /// Budget produced by the share-based fallback allocator
    ShareFallback,
}

/// One entity's line in an allocation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAllocation {
    /// Entity identity
    pub entity_id: EntityKey,
    /// Recommended budget for the coming period
    pub recommended_budget: f64,
    /// Budget in force before this plan
    pub previous_budget: f64,
    /// `recommended_budget - previous_budget`
    pub delta: f64,
    /// Relative change against the previous budget
    pub delta_pct: f64,
    /// Direction of change
    pub gate_status: GateStatus,
    /// Constraints that bound this recommendation
    pub binding_constraints: Vec<BindingConstraint>,
    /// Belief the recommendation was made from
    pub posterior_snapshot: PosteriorSnapshot,
}

impl EntityAllocation {
    /// Build an entry, deriving delta and gate status.
    pub fn new(
        entity_id: EntityKey,
        recommended_budget: f64,
        previous_budget: f64,
        binding_constraints: Vec<BindingConstraint>,
        posterior_snapshot: PosteriorSnapshot,
    ) -> Self {
        let delta = recommended_budget - previous_budget;
        Self {
            entity_id,
            recommended_budget,
            previous_budget,
            delta,
            delta_pct: delta / previous_budget.max(1e-9),
            gate_status: GateStatus::classify(previous_budget, recommended_budget),
            binding_constraints,
            posterior_snapshot,
        }
    }
}

/// Plan-level totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanTotals {
    /// Requested budget
    pub budget_total: f64,
    /// Sum of recommended budgets
    pub budget_allocated: f64,
    /// `budget_total - budget_allocated`
    pub budget_gap: f64,
    /// Relative reallocation against the previous plan
    pub churn: f64,
}

/// Budget recommendation for every entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    /// Planning horizon label (e.g. `12h`)
    pub horizon: String,
    /// Totals
    pub totals: PlanTotals,
    /// Per-entity recommendations
    #[serde(default)]
    pub entities: Vec<EntityAllocation>,
}

impl AllocationPlan {
    /// A plan with no entity. The whole budget is reported as gap.
    pub fn empty(budget_total: f64, horizon: impl Into<String>) -> Self {
        Self {
            horizon: horizon.into(),
            totals: PlanTotals {
                budget_total,
                budget_allocated: 0.0,
                budget_gap: budget_total,
                churn: 0.0,
            },
            entities: vec![],
        }
    }

    /// Recommended budgets keyed by entity; the prior of the next cycle.
    pub fn budget_map(&self) -> BTreeMap<EntityKey, f64> {
        self.entities
            .iter()
            .map(|e| (e.entity_id.clone(), e.recommended_budget))
            .collect()
    }

    /// Recommended budget summed per channel.
    pub fn channel_totals(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for entry in &self.entities {
            *out.entry(crate::policy::channel_of(&entry.entity_id).to_string())
                .or_insert(0.0) += entry.recommended_budget;
        }
        out
    }

    /// Look up one entity's entry.
    pub fn get(&self, key: &EntityKey) -> Option<&EntityAllocation> {
        self.entities.iter().find(|e| &e.entity_id == key)
    }
}

/// Value posture used when evaluating a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    /// `mean + z·sd`
    Optimistic,
    /// Posterior mean
    Expected,
    /// `max(0, mean - z·sd)`
    Conservative,
}

/// Incremental value of one plan under each posture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PostureValues {
    pub optimistic: f64,
    pub expected: f64,
    pub conservative: f64,
}

impl PostureValues {
    /// Value for one posture.
    pub fn get(&self, posture: Posture) -> f64 {
        match posture {
            Posture::Optimistic => self.optimistic,
            Posture::Expected => self.expected,
            Posture::Conservative => self.conservative,
        }
    }
}

/// Whether each posture reached the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feasibility {
    pub optimistic: bool,
    pub expected: bool,
    pub conservative: bool,
}

/// Swept total-budget range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub min: f64,
    pub max: f64,
}

/// Budget points located by the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetPoints {
    /// First budget meeting the target optimistically
    pub optimistic_budget: Option<f64>,
    /// First budget meeting the target in expectation, else the largest swept budget
    pub expected_budget: f64,
    /// First budget meeting the target conservatively
    pub conservative_budget: Option<f64>,
    /// Swept range
    pub search_bounds: SearchBounds,
}

/// Recommended spend band for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRange {
    pub channel_id: String,
    pub min_recommended: f64,
    pub max_recommended: f64,
}

/// One evaluated grid point of the budget sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvaluation {
    pub budget: f64,
    pub values: PostureValues,
}

/// Outcome of a budget-target search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSearchResult {
    /// Target incremental value
    pub target_incremental_value: f64,
    /// Per-posture feasibility
    pub feasibility: Feasibility,
    /// Located budget points
    pub budget_points: BudgetPoints,
    /// Per-channel recommended ranges
    pub channel_budget_ranges: Vec<ChannelRange>,
    /// Every evaluated grid point, ascending by budget
    pub candidates: Vec<CandidateEvaluation>,
}

/// Alert type raised by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    BudgetTotalMismatch,
    UnpaidChannelAllocation,
    StepLimitViolation,
    ChurnLimitViolation,
    ProxyTooTrusted,
    VeryLowSignal,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Plan must not be applied
    Hard,
    /// Advisory only
    Warn,
}

/// One verifier finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub detail: String,
}

impl Alert {
    /// Create a hard alert.
    pub fn hard(kind: AlertKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Hard,
            detail: detail.into(),
        }
    }

    /// Create an advisory alert.
    pub fn warn(kind: AlertKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warn,
            detail: detail.into(),
        }
    }
}

/// Verifier output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Set when any hard alert was raised
    pub hard_fail: bool,
    /// Every finding, hard and soft
    pub alerts: Vec<Alert>,
}

impl VerificationReport {
    /// Record an alert, raising `hard_fail` for hard ones.
    pub fn push(&mut self, alert: Alert) {
        if alert.severity == Severity::Hard {
            self.hard_fail = true;
        }
        self.alerts.push(alert);
    }

    /// Whether an alert of the given kind was raised.
    pub fn has(&self, kind: AlertKind) -> bool {
        self.alerts.iter().any(|a| a.kind == kind)
    }
}

/// Error types for the uplift core.
#[derive(Debug, thiserror::Error)]
pub enum UpliftError {
    /// Entity id not in `source|channel|campaign` form
    #[error("Invalid entity id: {0}")]
    InvalidEntityId(String),

    /// Nothing left to allocate
    #[error("No entities available: {0}")]
    NoEntities(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Malformed unified table
    #[error("Table error: {0}")]
    TableError(String),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, UpliftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_roundtrip() {
        let key = EntityKey::parse("ga|Paid Search|brand|exact").unwrap();
        assert_eq!(key.source, "ga");
        assert_eq!(key.channel, "Paid Search");
        assert_eq!(key.campaign, "brand|exact");
        assert_eq!(key.to_string(), "ga|Paid Search|brand|exact");
    }

    #[test]
    fn test_entity_key_rejects_short_ids() {
        assert!(EntityKey::parse("ga|Paid Search").is_err());
        assert!(EntityKey::parse("").is_err());
    }

    #[test]
    fn test_entity_key_as_json_map_key() {
        let mut map = BTreeMap::new();
        map.insert(EntityKey::new("ga", "Display", "c1"), 1.5);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"ga|Display|c1":1.5}"#);

        let parsed: BTreeMap<EntityKey, f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, map);
    }

    #[test]
    fn test_outcome_kind_defaults_to_revenue() {
        assert_eq!(OutcomeKind::default(), OutcomeKind::Revenue);
        assert_eq!(OutcomeKind::default().as_str(), "revenue");
    }

    #[test]
    fn test_gate_status_classification() {
        assert_eq!(GateStatus::classify(100.0, 100.0), GateStatus::Hold);
        assert_eq!(GateStatus::classify(100.0, 101.0), GateStatus::Increase);
        assert_eq!(GateStatus::classify(100.0, 99.0), GateStatus::Decrease);
    }

    #[test]
    fn test_alert_wire_names() {
        let alert = Alert::hard(AlertKind::StepLimitViolation, "ga|Display|c1");
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "step_limit_violation");
        assert_eq!(json["severity"], "hard");
    }

    #[test]
    fn test_report_push_sets_hard_fail() {
        let mut report = VerificationReport::default();
        report.push(Alert::warn(AlertKind::VeryLowSignal, "sparse"));
        assert!(!report.hard_fail);
        report.push(Alert::hard(AlertKind::ChurnLimitViolation, "churn=0.5"));
        assert!(report.hard_fail);
        assert!(report.has(AlertKind::VeryLowSignal));
    }

    #[test]
    fn test_empty_plan_reports_full_gap() {
        let plan = AllocationPlan::empty(500.0, "12h");
        assert_eq!(plan.totals.budget_gap, 500.0);
        assert!(plan.budget_map().is_empty());
    }
}
