//! Uplift Core - Bayesian uplift estimation and budget allocation
//!
//! Splits a fixed spend budget across marketing entities on a recurring
//! cadence, using noisy outcome signals and optional proxy signals:
//!
//! - **Response curve**: diminishing-returns saturation per entity
//! - **Proxy credibility**: per-signal noise scale learned from lead correlation
//! - **Uplift estimator**: grid posterior over each entity's uplift-per-spend
//! - **Allocator**: greedy quantized budget split under bounds, caps and gating
//! - **Budget search**: smallest budget reaching a target incremental value
//! - **Plan verifier**: re-checks a plan against the allocator's contract
//!
//! # Data flow
//!
//! ```text
//!  UnifiedTable ──► ProxyCredibilityTracker ──► ProxyCatalog
//!       │                                            │
//!       └──────────────► UpliftEstimator ◄───────────┘
//!                              │
//!                         ModelState
//!                              │
//!              ┌───────────────┼────────────────┐
//!              ▼               ▼                ▼
//!         Allocator ◄── BudgetTargetSearch   PlanVerifier
//!              │                                ▲
//!              └──────── AllocationPlan ────────┘
//! ```
//!
//! Every component is built from an immutable [`UpliftConfig`] and is a
//! synchronous transformation over its inputs.

pub mod allocator;
pub mod config;
pub mod curve;
pub mod estimator;
pub mod fallback;
pub mod policy;
pub mod proxy;
pub mod search;
pub mod table;
pub mod types;
pub mod verifier;

// Re-export main types
pub use allocator::Allocator;
pub use config::UpliftConfig;
pub use curve::{saturation, CurveParams};
pub use estimator::{EstimatorOutput, UpliftEstimator};
pub use fallback::ShareAllocator;
pub use policy::{channel_of, ChannelPolicy, PaidPredicate};
pub use proxy::{ProxyCatalog, ProxyCredibility, ProxyCredibilityTracker, ProxyEvaluation};
pub use search::BudgetTargetSearch;
pub use table::{BucketRow, UnifiedTable, PROXY_PREFIX};
pub use types::*;
pub use verifier::PlanVerifier;
