//! Unified per-bucket, per-entity observation table.
//!
//! Ingestion and normalization of raw exports happen upstream; this module
//! only holds the resulting rows and the window/grouping views the
//! estimator and the proxy tracker need.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{EntityKey, OutcomeKind};

/// Column prefix marking a secondary proxy signal.
pub const PROXY_PREFIX: &str = "proxy_";

/// One entity's observations for one time bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRow {
    /// Start of the time bucket
    pub bucket_start: DateTime<Utc>,
    /// Entity observed
    pub entity: EntityKey,
    /// Attributed revenue
    pub revenue: f64,
    /// Purchase count
    pub purchases: f64,
    /// Spend in the bucket
    pub spend: f64,
    /// Proxy signals by column name; `None` when missing
    pub proxies: BTreeMap<String, Option<f64>>,
}

impl BucketRow {
    /// Create a row without proxy signals.
    pub fn new(
        bucket_start: DateTime<Utc>,
        entity: EntityKey,
        revenue: f64,
        purchases: f64,
        spend: f64,
    ) -> Self {
        Self {
            bucket_start,
            entity,
            revenue,
            purchases,
            spend,
            proxies: BTreeMap::new(),
        }
    }

    /// Attach a proxy value. Non-finite values are recorded as missing.
    pub fn with_proxy(mut self, name: impl Into<String>, value: Option<f64>) -> Self {
        self.proxies
            .insert(name.into(), value.filter(|v| v.is_finite()));
        self
    }

    /// Value of the given outcome column.
    pub fn outcome(&self, kind: OutcomeKind) -> f64 {
        match kind {
            OutcomeKind::Revenue => self.revenue,
            OutcomeKind::Purchases => self.purchases,
        }
    }

    /// Value of a proxy column, `None` if absent or missing.
    pub fn proxy(&self, name: &str) -> Option<f64> {
        self.proxies.get(name).copied().flatten()
    }
}

/// Rows ordered by bucket then entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnifiedTable {
    rows: Vec<BucketRow>,
    proxy_names: BTreeSet<String>,
}

impl UnifiedTable {
    /// Build a table, sorting rows by bucket then entity.
    pub fn new(mut rows: Vec<BucketRow>) -> Self {
        rows.sort_by(|a, b| {
            a.bucket_start
                .cmp(&b.bucket_start)
                .then_with(|| a.entity.cmp(&b.entity))
        });
        let proxy_names = rows
            .iter()
            .flat_map(|r| r.proxies.keys().cloned())
            .collect();
        Self { rows, proxy_names }
    }

    /// A table with no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the table holds no row.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// All rows in bucket order.
    pub fn rows(&self) -> &[BucketRow] {
        &self.rows
    }

    /// Every proxy column seen in any row.
    pub fn proxy_names(&self) -> &BTreeSet<String> {
        &self.proxy_names
    }

    /// Latest bucket start.
    pub fn last_bucket(&self) -> Option<DateTime<Utc>> {
        self.rows.iter().map(|r| r.bucket_start).max()
    }

    /// Rows within `days` of the latest bucket (inclusive).
    pub fn window(&self, days: u32) -> UnifiedTable {
        let Some(end) = self.last_bucket() else {
            return UnifiedTable::empty();
        };
        let start = end - Duration::days(i64::from(days));
        UnifiedTable {
            rows: self
                .rows
                .iter()
                .filter(|r| r.bucket_start >= start)
                .cloned()
                .collect(),
            proxy_names: self.proxy_names.clone(),
        }
    }

    /// Total revenue.
    pub fn revenue_total(&self) -> f64 {
        self.rows.iter().map(|r| r.revenue).sum()
    }

    /// Total purchases.
    pub fn purchases_total(&self) -> f64 {
        self.rows.iter().map(|r| r.purchases).sum()
    }

    /// Revenue when any revenue was recorded, purchases otherwise.
    pub fn outcome_kind(&self) -> OutcomeKind {
        if self.revenue_total() > 0.0 {
            OutcomeKind::Revenue
        } else {
            OutcomeKind::Purchases
        }
    }

    /// Time-ordered rows per entity.
    pub fn by_entity(&self) -> BTreeMap<&EntityKey, Vec<&BucketRow>> {
        let mut out: BTreeMap<&EntityKey, Vec<&BucketRow>> = BTreeMap::new();
        for row in &self.rows {
            out.entry(&row.entity).or_default().push(row);
        }
        out
    }
}

impl FromIterator<BucketRow> for UnifiedTable {
    fn from_iter<I: IntoIterator<Item = BucketRow>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
